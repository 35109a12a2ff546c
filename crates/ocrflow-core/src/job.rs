//! Stage job payloads

use serde::{Deserialize, Serialize};

use crate::document::DocumentId;

/// Payload enqueued on a stage topic (`image_preprocess`, `ocr_extract`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageJob {
    pub document_id: DocumentId,
    #[serde(default)]
    pub owner_id: String,
}

/// A claimed stage item that does not carry the fields a worker needs
#[derive(Debug, thiserror::Error)]
#[error("malformed job payload: {0}")]
pub struct MalformedJob(#[from] pub serde_json::Error);

impl StageJob {
    pub fn new(document_id: DocumentId, owner_id: &str) -> Self {
        Self {
            document_id,
            owner_id: owner_id.to_string(),
        }
    }

    pub fn from_payload(bytes: &[u8]) -> Result<Self, MalformedJob> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_missing_document_id_is_malformed() {
        assert!(StageJob::from_payload(br#"{"owner_id": "u1"}"#).is_err());
    }

    #[test]
    fn test_owner_is_optional() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"document_id": "{}"}}"#, id);
        let job = StageJob::from_payload(raw.as_bytes()).unwrap();
        assert_eq!(job.document_id, id);
        assert!(job.owner_id.is_empty());
    }
}
