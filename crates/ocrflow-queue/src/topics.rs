//! Per-topic retry policy loaded from a JSON definitions file

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::backend::QueueError;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
        }
    }
}

/// One entry of the `topics` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDefinition {
    pub name: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECONDS
}

#[derive(Debug, Deserialize)]
struct DefinitionsFile {
    #[serde(default)]
    topics: Vec<TopicDefinition>,
}

/// Topic name -> retry policy. Unknown topics get [`RetryPolicy::default`].
#[derive(Debug, Clone, Default)]
pub struct TopicDefinitions {
    topics: HashMap<String, RetryPolicy>,
}

impl TopicDefinitions {
    pub fn new(definitions: impl IntoIterator<Item = TopicDefinition>) -> Self {
        let topics = definitions
            .into_iter()
            .map(|d| {
                (
                    d.name,
                    RetryPolicy {
                        max_retries: d.max_retries,
                        retry_delay_seconds: d.retry_delay_seconds,
                    },
                )
            })
            .collect();
        Self { topics }
    }

    /// Parse `{"topics": [...]}`
    pub fn from_json(raw: &str) -> Result<Self, QueueError> {
        let file: DefinitionsFile =
            serde_json::from_str(raw).map_err(|e| QueueError::Definitions(e.to_string()))?;
        Ok(Self::new(file.topics))
    }

    /// Load from disk. A missing file yields an empty set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Topic definitions not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(QueueError::Definitions(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn policy(&self, topic: &str) -> RetryPolicy {
        self.topics.get(topic).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_lookup_and_defaults() {
        let defs = TopicDefinitions::from_json(
            r#"{"topics": [
                {"name": "ocr_extract", "max_retries": 2, "retry_delay_seconds": 90},
                {"name": "image_preprocess"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(defs.len(), 2);
        assert_eq!(
            defs.policy("ocr_extract"),
            RetryPolicy {
                max_retries: 2,
                retry_delay_seconds: 90
            }
        );
        assert_eq!(defs.policy("image_preprocess"), RetryPolicy::default());
        assert_eq!(defs.policy("unknown").retry_delay_seconds, 30);
        assert_eq!(defs.policy("unknown").max_retries, 5);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let defs = TopicDefinitions::load("/nonexistent/ocrflow/topics.json").unwrap();
        assert!(defs.is_empty());
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(matches!(
            TopicDefinitions::from_json("{not json"),
            Err(QueueError::Definitions(_))
        ));
    }
}
