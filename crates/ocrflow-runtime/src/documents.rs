//! Document service: every status write plus the lifecycle event it implies

use ocrflow_core::{
    ArtifactVariant, Document, DocumentEvent, DocumentId, DocumentStatus, EventType,
};
use ocrflow_persist::{DocumentStore, StatusChange};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::PipelineError;

pub const NOT_FOUND_OR_DENIED: &str = "Document not found or access denied";
pub const NOT_PREPROCESSED: &str = "Document must be preprocessed first";

const PREVIEW_CHARS: usize = 200;

/// Partial-success result of a batch requeue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed_ids: Vec<DocumentId>,
    /// Requested id -> reason it was not queued
    pub errors: BTreeMap<String, String>,
}

impl BatchSummary {
    pub fn is_empty(&self) -> bool {
        self.processed_ids.is_empty()
    }
}

pub struct DocumentService {
    documents: Arc<dyn DocumentStore>,
    broker: Arc<dyn Broker>,
    events_topic: String,
    max_upload_bytes: usize,
}

impl DocumentService {
    pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

    pub fn new(
        documents: Arc<dyn DocumentStore>,
        broker: Arc<dyn Broker>,
        events_topic: impl Into<String>,
    ) -> Self {
        Self {
            documents,
            broker,
            events_topic: events_topic.into(),
            max_upload_bytes: Self::DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    async fn publish(
        &self,
        event_type: EventType,
        document: &Document,
        payload: serde_json::Value,
    ) -> Result<(), PipelineError> {
        let event = DocumentEvent::new(event_type, document.id, &document.owner_id, Some(payload));
        let value = serde_json::to_value(&event)?;
        let item_id = self.broker.enqueue(&self.events_topic, &value).await?;
        info!(
            document_id = %document.id,
            event_type = %event_type,
            item_id = %item_id,
            "Published document event"
        );
        Ok(())
    }

    async fn require(&self, id: DocumentId) -> Result<Document, PipelineError> {
        self.documents
            .get(id)
            .await?
            .ok_or(PipelineError::DocumentNotFound(id))
    }

    /// Store a new upload in `uploaded`. Processing starts on an explicit requeue.
    pub async fn register_upload(
        &self,
        owner_id: &str,
        filename: &str,
        content_type: &str,
        content: &[u8],
    ) -> Result<Document, PipelineError> {
        if content.is_empty() {
            return Err(PipelineError::EmptyUpload);
        }
        if content.len() > self.max_upload_bytes {
            return Err(PipelineError::UploadTooLarge {
                size: content.len(),
                limit: self.max_upload_bytes,
            });
        }

        let document = Document::new(owner_id, filename, content_type, content.len() as i64);
        self.documents.insert(&document).await?;
        self.documents
            .put_artifact(document.id, ArtifactVariant::Original, content)
            .await?;

        info!(
            document_id = %document.id,
            owner_id,
            size_bytes = document.size_bytes,
            "Registered upload"
        );
        Ok(document)
    }

    /// The document when it exists and belongs to `owner_id`
    pub async fn get_owned(
        &self,
        owner_id: &str,
        id: DocumentId,
    ) -> Result<Option<Document>, PipelineError> {
        Ok(self
            .documents
            .get(id)
            .await?
            .filter(|d| d.is_owned_by(owner_id)))
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Document>, PipelineError> {
        Ok(self.documents.list_by_owner(owner_id).await?)
    }

    pub async fn artifact(
        &self,
        id: DocumentId,
        variant: ArtifactVariant,
    ) -> Result<Vec<u8>, PipelineError> {
        self.documents
            .get_artifact(id, variant)
            .await?
            .ok_or(PipelineError::MissingArtifact {
                document_id: id,
                variant: variant.as_str(),
            })
    }

    pub async fn mark_in_progress(
        &self,
        id: DocumentId,
        status: DocumentStatus,
    ) -> Result<Document, PipelineError> {
        Ok(self
            .documents
            .transition(id, StatusChange::to(status))
            .await?)
    }

    /// Persist the preprocessed image and hand the document to OCR
    pub async fn store_preprocessed(
        &self,
        id: DocumentId,
        content: &[u8],
    ) -> Result<Document, PipelineError> {
        self.require(id).await?;
        self.documents
            .put_artifact(id, ArtifactVariant::Preprocessed, content)
            .await?;
        let document = self
            .documents
            .transition(id, StatusChange::to(DocumentStatus::QueuedOcr).clear_error())
            .await?;
        self.publish(
            EventType::DocumentPreprocessed,
            &document,
            json!({ "variant": ArtifactVariant::Preprocessed.as_str() }),
        )
        .await?;
        Ok(document)
    }

    pub async fn store_ocr_text(&self, id: DocumentId, text: &str) -> Result<Document, PipelineError> {
        let document = self
            .documents
            .transition(
                id,
                StatusChange::to(DocumentStatus::Completed)
                    .text(text)
                    .clear_error(),
            )
            .await?;
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        self.publish(
            EventType::DocumentOcrCompleted,
            &document,
            json!({ "characters": text.chars().count(), "preview": preview }),
        )
        .await?;
        Ok(document)
    }

    pub async fn mark_failed(&self, id: DocumentId, message: &str) -> Result<Document, PipelineError> {
        let document = self
            .documents
            .transition(id, StatusChange::to(DocumentStatus::Failed).error(message))
            .await?;
        self.publish(
            EventType::DocumentFailed,
            &document,
            json!({ "error_message": message }),
        )
        .await?;
        Ok(document)
    }

    async fn restart_preprocessing(
        &self,
        id: DocumentId,
        reason: &str,
    ) -> Result<Document, PipelineError> {
        let document = self
            .documents
            .transition(
                id,
                StatusChange::to(DocumentStatus::QueuedPreprocessing)
                    .clear_error()
                    .clear_text(),
            )
            .await?;
        self.publish(EventType::DocumentUploaded, &document, json!({ "reason": reason }))
            .await?;
        Ok(document)
    }

    async fn restart_ocr(&self, id: DocumentId, reason: &str) -> Result<Document, PipelineError> {
        let document = self
            .documents
            .transition(id, StatusChange::to(DocumentStatus::QueuedOcr).clear_error())
            .await?;
        self.publish(
            EventType::DocumentPreprocessed,
            &document,
            json!({ "reason": reason }),
        )
        .await?;
        Ok(document)
    }

    /// Restart one owned document from preprocessing
    pub async fn requeue(&self, owner_id: &str, id: DocumentId) -> Result<Document, PipelineError> {
        if self.get_owned(owner_id, id).await?.is_none() {
            return Err(PipelineError::DocumentNotFound(id));
        }
        self.restart_preprocessing(id, "manual_requeue").await
    }

    pub async fn requeue_batch(&self, owner_id: &str, ids: &[String]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for raw in ids {
            match self.owned_from_raw(owner_id, raw).await {
                Some(document) => {
                    match self
                        .restart_preprocessing(document.id, "batch_processing_request")
                        .await
                    {
                        Ok(_) => summary.processed_ids.push(document.id),
                        Err(e) => {
                            warn!(document_id = %document.id, error = %e, "Batch requeue failed");
                            summary.errors.insert(raw.clone(), e.to_string());
                        }
                    }
                }
                None => {
                    summary.errors.insert(raw.clone(), NOT_FOUND_OR_DENIED.to_string());
                }
            }
        }
        summary
    }

    /// Restart OCR for documents that already have a preprocessed artifact
    pub async fn requeue_batch_ocr(&self, owner_id: &str, ids: &[String]) -> BatchSummary {
        const OCR_READY: [DocumentStatus; 4] = [
            DocumentStatus::QueuedOcr,
            DocumentStatus::Ocr,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ];

        let mut summary = BatchSummary::default();
        for raw in ids {
            let Some(document) = self.owned_from_raw(owner_id, raw).await else {
                summary.errors.insert(raw.clone(), NOT_FOUND_OR_DENIED.to_string());
                continue;
            };
            if !OCR_READY.contains(&document.status) {
                summary.errors.insert(raw.clone(), NOT_PREPROCESSED.to_string());
                continue;
            }
            match self.restart_ocr(document.id, "batch_ocr_request").await {
                Ok(_) => summary.processed_ids.push(document.id),
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "Batch OCR requeue failed");
                    summary.errors.insert(raw.clone(), e.to_string());
                }
            }
        }
        summary
    }

    /// Re-emit the event that restarts a stalled stage and bump `updated_at`
    pub async fn restart_stalled(&self, document: &Document) -> Result<(), PipelineError> {
        let event_type = match document.status {
            DocumentStatus::QueuedPreprocessing | DocumentStatus::Preprocessing => {
                EventType::DocumentUploaded
            }
            DocumentStatus::QueuedOcr | DocumentStatus::Ocr => EventType::DocumentPreprocessed,
            _ => return Ok(()),
        };
        self.publish(event_type, document, json!({ "reason": "reconcile" }))
            .await?;
        self.documents.touch(document.id).await?;
        Ok(())
    }

    async fn owned_from_raw(&self, owner_id: &str, raw: &str) -> Option<Document> {
        let id = Uuid::parse_str(raw).ok()?;
        match self.get_owned(owner_id, id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(document_id = %id, error = %e, "Document lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use ocrflow_persist::MemoryDocumentStore;
    use ocrflow_queue::{MemoryQueueStore, QueueConfig, QueueManager, TopicDefinitions};

    struct Fixture {
        service: DocumentService,
        queue: Arc<QueueManager>,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(QueueManager::new(
            Arc::new(MemoryQueueStore::new()),
            QueueConfig::default(),
            TopicDefinitions::default(),
        ));
        let service = DocumentService::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(LocalBroker::new(queue.clone())),
            "document_events",
        )
        .with_max_upload_bytes(16);
        Fixture { service, queue }
    }

    async fn next_event(queue: &QueueManager) -> DocumentEvent {
        let item = queue.claim("document_events").await.unwrap().expect("event");
        DocumentEvent::decode(&item.payload).unwrap()
    }

    #[tokio::test]
    async fn test_upload_limits() {
        let f = fixture();
        assert!(matches!(
            f.service.register_upload("u1", "a.png", "image/png", b"").await,
            Err(PipelineError::EmptyUpload)
        ));
        assert!(matches!(
            f.service
                .register_upload("u1", "a.png", "image/png", &[0u8; 17])
                .await,
            Err(PipelineError::UploadTooLarge { size: 17, limit: 16 })
        ));

        let doc = f
            .service
            .register_upload("u1", "a.png", "image/png", b"png")
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert_eq!(
            f.service.artifact(doc.id, ArtifactVariant::Original).await.unwrap(),
            b"png"
        );
        assert!(f.queue.claim("document_events").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_requeue_emits_uploaded_event() {
        let f = fixture();
        let doc = f
            .service
            .register_upload("u1", "a.png", "image/png", b"png")
            .await
            .unwrap();

        assert!(matches!(
            f.service.requeue("intruder", doc.id).await,
            Err(PipelineError::DocumentNotFound(_))
        ));

        let requeued = f.service.requeue("u1", doc.id).await.unwrap();
        assert_eq!(requeued.status, DocumentStatus::QueuedPreprocessing);

        let event = next_event(&f.queue).await;
        assert_eq!(event.event_type, EventType::DocumentUploaded);
        assert_eq!(event.document_id, doc.id);
        assert_eq!(event.owner_id, "u1");
        assert_eq!(event.payload.unwrap()["reason"], "manual_requeue");
    }

    #[tokio::test]
    async fn test_ocr_text_preview_is_truncated() {
        let f = fixture();
        let doc = f
            .service
            .register_upload("u1", "a.png", "image/png", b"png")
            .await
            .unwrap();
        f.service.requeue("u1", doc.id).await.unwrap();
        f.service.store_preprocessed(doc.id, b"gray").await.unwrap();

        let text = "x".repeat(250);
        let done = f.service.store_ocr_text(doc.id, &text).await.unwrap();
        assert_eq!(done.status, DocumentStatus::Completed);
        assert_eq!(done.ocr_text.as_deref(), Some(text.as_str()));

        next_event(&f.queue).await;
        let preprocessed = next_event(&f.queue).await;
        assert_eq!(preprocessed.event_type, EventType::DocumentPreprocessed);
        assert_eq!(preprocessed.payload.unwrap()["variant"], "preprocessed");

        let completed = next_event(&f.queue).await;
        assert_eq!(completed.event_type, EventType::DocumentOcrCompleted);
        let payload = completed.payload.unwrap();
        assert_eq!(payload["characters"], 250);
        assert_eq!(payload["preview"].as_str().unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_batch_requeue_partial_success() {
        let f = fixture();
        let mine = f
            .service
            .register_upload("u1", "a.png", "image/png", b"png")
            .await
            .unwrap();
        let theirs = f
            .service
            .register_upload("u2", "b.png", "image/png", b"png")
            .await
            .unwrap();

        let ids = vec![mine.id.to_string(), theirs.id.to_string(), "not-a-uuid".to_string()];
        let summary = f.service.requeue_batch("u1", &ids).await;

        assert_eq!(summary.processed_ids, vec![mine.id]);
        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.errors[&theirs.id.to_string()], NOT_FOUND_OR_DENIED);

        let stored = f.service.store().get(theirs.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Uploaded);
        let stored = f.service.store().get(mine.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::QueuedPreprocessing);
    }

    #[tokio::test]
    async fn test_batch_ocr_requires_preprocessing() {
        let f = fixture();
        let fresh = f
            .service
            .register_upload("u1", "a.png", "image/png", b"png")
            .await
            .unwrap();
        let ready = f
            .service
            .register_upload("u1", "b.png", "image/png", b"png")
            .await
            .unwrap();
        f.service.requeue("u1", ready.id).await.unwrap();
        f.service.store_preprocessed(ready.id, b"gray").await.unwrap();
        f.service.mark_in_progress(ready.id, DocumentStatus::Ocr).await.unwrap();
        f.service.mark_failed(ready.id, "engine crashed").await.unwrap();

        let ids = vec![fresh.id.to_string(), ready.id.to_string()];
        let summary = f.service.requeue_batch_ocr("u1", &ids).await;
        assert_eq!(summary.processed_ids, vec![ready.id]);
        assert_eq!(summary.errors[&fresh.id.to_string()], NOT_PREPROCESSED);

        let stored = f.service.store().get(ready.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::QueuedOcr);
        assert!(stored.error_message.is_none());
    }
}
