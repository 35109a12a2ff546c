//! In-memory document store for tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ocrflow_core::{ArtifactVariant, Document, DocumentId, DocumentStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::backend::{DocumentStore, StatusChange, StorageError};

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
    artifacts: RwLock<HashMap<(DocumentId, ArtifactVariant), Vec<u8>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, document: &Document) -> Result<(), StorageError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document.id) {
            return Err(StorageError::AlreadyExists(document.id.to_string()));
        }
        documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StorageError> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Document>, StorageError> {
        let documents = self.documents.read().await;
        let mut owned: Vec<_> = documents
            .values()
            .filter(|d| d.is_owned_by(owner_id))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn transition(&self, id: DocumentId, change: StatusChange) -> Result<Document, StorageError> {
        let mut documents = self.documents.write().await;
        let current = documents
            .get(&id)
            .ok_or_else(|| StorageError::document_not_found(id))?;
        let next = change.apply_to(current, Utc::now())?;
        documents.insert(id, next.clone());
        Ok(next)
    }

    async fn touch(&self, id: DocumentId) -> Result<bool, StorageError> {
        let mut documents = self.documents.write().await;
        match documents.get_mut(&id) {
            Some(doc) => {
                doc.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_stale(
        &self,
        statuses: &[DocumentStatus],
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Document>, StorageError> {
        let documents = self.documents.read().await;
        let mut stale: Vec<_> = documents
            .values()
            .filter(|d| statuses.contains(&d.status) && d.updated_at < updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|d| d.updated_at);
        Ok(stale)
    }

    async fn put_artifact(
        &self,
        id: DocumentId,
        variant: ArtifactVariant,
        content: &[u8],
    ) -> Result<(), StorageError> {
        if !self.documents.read().await.contains_key(&id) {
            return Err(StorageError::document_not_found(id));
        }
        self.artifacts
            .write()
            .await
            .insert((id, variant), content.to_vec());
        Ok(())
    }

    async fn get_artifact(
        &self,
        id: DocumentId,
        variant: ArtifactVariant,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.artifacts.read().await.get(&(id, variant)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transition_and_artifacts() {
        let store = MemoryDocumentStore::new();
        let doc = Document::new("u1", "a.png", "image/png", 3);
        store.insert(&doc).await.unwrap();
        store
            .put_artifact(doc.id, ArtifactVariant::Original, b"abc")
            .await
            .unwrap();

        let updated = store
            .transition(doc.id, StatusChange::to(DocumentStatus::QueuedPreprocessing))
            .await
            .unwrap();
        assert_eq!(updated.status, DocumentStatus::QueuedPreprocessing);

        let illegal = store
            .transition(doc.id, StatusChange::to(DocumentStatus::Completed))
            .await;
        assert!(matches!(illegal, Err(StorageError::InvalidTransition(_))));

        assert_eq!(
            store
                .get_artifact(doc.id, ArtifactVariant::Original)
                .await
                .unwrap()
                .as_deref(),
            Some(&b"abc"[..])
        );
        assert!(store
            .get_artifact(doc.id, ArtifactVariant::Preprocessed)
            .await
            .unwrap()
            .is_none());
    }
}
