//! Document records and the processing state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Document identifier
pub type DocumentId = Uuid;

/// Processing status of a document.
///
/// ```text
/// uploaded -> queued_preprocessing -> preprocessing -> queued_ocr -> ocr -> completed
///                     \________________ any in-progress ________________/ -> failed
/// ```
///
/// `failed` is restartable: a requeue moves the document back to
/// `queued_preprocessing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    QueuedPreprocessing,
    Preprocessing,
    QueuedOcr,
    Ocr,
    Completed,
    Failed,
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid document transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 7] = [
        Self::Uploaded,
        Self::QueuedPreprocessing,
        Self::Preprocessing,
        Self::QueuedOcr,
        Self::Ocr,
        Self::Completed,
        Self::Failed,
    ];

    /// States in which the pipeline still owes the document work.
    pub const IN_PROGRESS: [DocumentStatus; 4] = [
        Self::QueuedPreprocessing,
        Self::Preprocessing,
        Self::QueuedOcr,
        Self::Ocr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::QueuedPreprocessing => "queued_preprocessing",
            Self::Preprocessing => "preprocessing",
            Self::QueuedOcr => "queued_ocr",
            Self::Ocr => "ocr",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        Self::IN_PROGRESS.contains(self)
    }

    /// Whether `self -> next` is a legal write.
    ///
    /// Re-entering the current state is always allowed so that redelivered
    /// jobs can repeat their status writes.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;

        if *self == next {
            return true;
        }

        match next {
            // Manual or batch requeue restarts from anywhere.
            QueuedPreprocessing => true,
            Preprocessing => matches!(self, Uploaded | QueuedPreprocessing | Failed),
            // Preprocessed upload, or a batch OCR request on a document that
            // already went through preprocessing.
            QueuedOcr => matches!(
                self,
                QueuedPreprocessing | Preprocessing | Ocr | Completed | Failed
            ),
            Ocr => matches!(self, QueuedOcr | Failed),
            Completed => matches!(self, QueuedOcr | Ocr),
            Failed => self.is_in_progress(),
            Uploaded => false,
        }
    }

    /// Validate and return the next state.
    pub fn transition(self, next: DocumentStatus) -> Result<DocumentStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown document status '{}'", s))
    }
}

/// Stored binary variants of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactVariant {
    Original,
    Preprocessed,
}

impl ArtifactVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Preprocessed => "preprocessed",
        }
    }
}

impl fmt::Display for ArtifactVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub ocr_text: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// New document in the `uploaded` state
    pub fn new(owner_id: &str, filename: &str, content_type: &str, size_bytes: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size_bytes,
            status: DocumentStatus::Uploaded,
            ocr_text: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}
