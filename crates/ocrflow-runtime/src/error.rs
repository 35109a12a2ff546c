//! Runtime error types

use ocrflow_core::{DocumentId, MalformedJob};
use ocrflow_persist::StorageError;
use ocrflow_queue::QueueError;

/// Failure talking to the broker, in-process or over HTTP
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    #[error("Broker returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Broker response decode error: {0}")]
    Decode(String),
}

/// Failure inside an opaque stage transform
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Failed to decode input: {0}")]
    Decode(String),

    #[error("Failed to encode output: {0}")]
    Encode(String),

    #[error("Stage engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Stage engine failed: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    MalformedJob(#[from] MalformedJob),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("No {variant} artifact for document {document_id}")]
    MissingArtifact {
        document_id: DocumentId,
        variant: &'static str,
    },

    #[error("Empty upload")]
    EmptyUpload,

    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    UploadTooLarge { size: usize, limit: usize },
}

impl From<QueueError> for PipelineError {
    fn from(e: QueueError) -> Self {
        Self::Broker(BrokerError::Queue(e))
    }
}
