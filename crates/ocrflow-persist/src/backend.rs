//! Document store trait and error types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ocrflow_core::{ArtifactVariant, Document, DocumentId, DocumentStatus, InvalidTransition};

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn document_not_found(id: DocumentId) -> Self {
        Self::NotFound(format!("document {}", id))
    }
}

/// How a status change treats a nullable column
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Field {
    #[default]
    Keep,
    Clear,
    Set(String),
}

impl Field {
    pub fn apply(&self, current: Option<String>) -> Option<String> {
        match self {
            Self::Keep => current,
            Self::Clear => None,
            Self::Set(value) => Some(value.clone()),
        }
    }
}

/// A validated status write plus the columns that move with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: DocumentStatus,
    pub error_message: Field,
    pub ocr_text: Field,
}

impl StatusChange {
    pub fn to(status: DocumentStatus) -> Self {
        Self {
            status,
            error_message: Field::Keep,
            ocr_text: Field::Keep,
        }
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Field::Set(message.into());
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Field::Clear;
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.ocr_text = Field::Set(text.into());
        self
    }

    pub fn clear_text(mut self) -> Self {
        self.ocr_text = Field::Clear;
        self
    }

    /// Apply to `document`, rejecting transitions the state machine forbids
    pub fn apply_to(&self, document: &Document, now: DateTime<Utc>) -> Result<Document, InvalidTransition> {
        let status = document.status.transition(self.status)?;
        let mut next = document.clone();
        next.status = status;
        next.error_message = self.error_message.apply(next.error_message.take());
        next.ocr_text = self.ocr_text.apply(next.ocr_text.take());
        next.updated_at = now;
        Ok(next)
    }
}

/// Durable document records and their binary artifacts
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, document: &Document) -> Result<(), StorageError>;

    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StorageError>;

    /// Newest first
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Document>, StorageError>;

    /// Validate and apply a status change, returning the updated record
    async fn transition(&self, id: DocumentId, change: StatusChange) -> Result<Document, StorageError>;

    /// Bump `updated_at` without changing anything else
    async fn touch(&self, id: DocumentId) -> Result<bool, StorageError>;

    /// Documents in one of `statuses` not updated since `updated_before`
    async fn list_stale(
        &self,
        statuses: &[DocumentStatus],
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Document>, StorageError>;

    /// Store (or replace) one binary variant
    async fn put_artifact(
        &self,
        id: DocumentId,
        variant: ArtifactVariant,
        content: &[u8],
    ) -> Result<(), StorageError>;

    async fn get_artifact(
        &self,
        id: DocumentId,
        variant: ArtifactVariant,
    ) -> Result<Option<Vec<u8>>, StorageError>;
}
