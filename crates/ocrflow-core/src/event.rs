//! Document lifecycle events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::document::DocumentId;

/// Closed set of lifecycle event types.
///
/// Adding a variant forces every `match` in the dispatcher to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DocumentUploaded,
    DocumentPreprocessed,
    DocumentOcrCompleted,
    DocumentFailed,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        Self::DocumentUploaded,
        Self::DocumentPreprocessed,
        Self::DocumentOcrCompleted,
        Self::DocumentFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentUploaded => "document_uploaded",
            Self::DocumentPreprocessed => "document_preprocessed",
            Self::DocumentOcrCompleted => "document_ocr_completed",
            Self::DocumentFailed => "document_failed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An `event_type` string outside the known set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type '{0}'")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Why an event payload could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    /// Well-formed envelope with an `event_type` no handler knows.
    #[error(transparent)]
    UnknownType(#[from] UnknownEventType),
    /// Not an event at all: bad JSON, missing fields, wrong types.
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Immutable fact describing a lifecycle transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvent {
    pub event_type: EventType,
    pub document_id: DocumentId,
    pub owner_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl DocumentEvent {
    pub fn new(
        event_type: EventType,
        document_id: DocumentId,
        owner_id: &str,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            document_id,
            owner_id: owner_id.to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Decode a queue payload.
    ///
    /// The type tag is checked before the rest of the envelope so that an
    /// unroutable event is reported as [`EventDecodeError::UnknownType`] even
    /// when its other fields follow a schema we do not know.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventDecodeError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;

        if let Some(tag) = value.get("event_type").and_then(|t| t.as_str()) {
            tag.parse::<EventType>()?;
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Best-effort `error_message` from a `document_failed` payload.
    pub fn error_message(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("error_message"))
            .and_then(|m| m.as_str())
    }
}
