//! Queue manager: enqueue, claim, ack and fail on top of a [`QueueStore`]

use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::backend::{QueueDepth, QueueError, QueueStore};
use crate::item::{ItemId, QueueItem};
use crate::topics::{RetryPolicy, TopicDefinitions};

/// Suffix appended to a topic name to form its dead-letter topic
pub const DEAD_LETTER_SUFFIX: &str = ".dead_letter";

/// Queue manager configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Lease granted at claim time
    pub visibility_timeout: StdDuration,
    /// Move items to `<topic>.dead_letter` once `max_retries` is exhausted
    pub dead_letter: bool,
    /// Optional topic definitions file
    pub definitions_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: StdDuration::from_secs(120),
            dead_letter: true,
            definitions_path: None,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let visibility_secs: u64 = std::env::var("OCRFLOW_VISIBILITY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        let dead_letter = std::env::var("OCRFLOW_DEAD_LETTER")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        Self {
            visibility_timeout: StdDuration::from_secs(visibility_secs),
            dead_letter,
            definitions_path: std::env::var("OCRFLOW_DEFINITIONS_PATH")
                .ok()
                .map(PathBuf::from),
        }
    }

    /// Load the configured topic definitions, or an empty set when none is configured
    pub fn load_definitions(&self) -> Result<TopicDefinitions, QueueError> {
        match &self.definitions_path {
            Some(path) => TopicDefinitions::load(path),
            None => Ok(TopicDefinitions::default()),
        }
    }
}

/// What `fail` did with the item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Pending again on its own topic after the retry delay
    Requeued,
    /// Retries exhausted; moved to the named dead-letter topic
    DeadLettered { topic: String },
}

impl FailOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requeued => "requeued",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

pub struct QueueManager {
    store: Arc<dyn QueueStore>,
    config: QueueConfig,
    definitions: TopicDefinitions,
}

impl QueueManager {
    pub fn new(store: Arc<dyn QueueStore>, config: QueueConfig, definitions: TopicDefinitions) -> Self {
        Self {
            store,
            config,
            definitions,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn policy(&self, topic: &str) -> RetryPolicy {
        self.definitions.policy(topic)
    }

    /// Insert a pending item. Duplicate payloads are accepted.
    pub async fn enqueue(&self, topic: &str, payload: Vec<u8>) -> Result<ItemId, QueueError> {
        let item = QueueItem::new(topic, payload, Utc::now());
        self.store.insert(&item).await?;
        debug!(item_id = %item.id, topic, "Enqueued item");
        Ok(item.id)
    }

    /// Lease the oldest due item on `topic`. `None` means no work.
    pub async fn claim(&self, topic: &str) -> Result<Option<QueueItem>, QueueError> {
        let now = Utc::now();
        let lease_until = saturating_after(now, visibility(self.config.visibility_timeout));
        let claimed = self.store.claim_next(topic, now, lease_until).await?;
        if let Some(item) = &claimed {
            debug!(item_id = %item.id, topic, attempts = item.attempts, "Claimed item");
        }
        Ok(claimed)
    }

    /// Delete the item. False when it was already gone.
    pub async fn ack(&self, id: ItemId) -> Result<bool, QueueError> {
        let removed = self.store.delete(id).await?;
        if removed {
            debug!(item_id = %id, "Acknowledged item");
        } else {
            debug!(item_id = %id, "Ack for unknown item");
        }
        Ok(removed)
    }

    /// Return the item to pending after `retry_delay_seconds`, or dead-letter it
    /// when its topic's `max_retries` is exhausted. `None` for an unknown id.
    pub async fn fail(
        &self,
        id: ItemId,
        retry_delay_seconds: u64,
    ) -> Result<Option<FailOutcome>, QueueError> {
        let Some(item) = self.store.get(id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let policy = self.definitions.policy(&item.topic);

        if self.config.dead_letter
            && !item.topic.ends_with(DEAD_LETTER_SUFFIX)
            && item.attempts >= policy.max_retries
        {
            let dead_topic = format!("{}{}", item.topic, DEAD_LETTER_SUFFIX);
            if !self.store.reschedule(id, &dead_topic, now, now).await? {
                return Ok(None);
            }
            warn!(
                item_id = %id,
                topic = %item.topic,
                attempts = item.attempts,
                max_retries = policy.max_retries,
                "Retries exhausted, moved to dead-letter topic"
            );
            return Ok(Some(FailOutcome::DeadLettered { topic: dead_topic }));
        }

        let available_at = saturating_after(now, retry_delay(retry_delay_seconds));
        if !self.store.reschedule(id, &item.topic, available_at, now).await? {
            return Ok(None);
        }
        info!(
            item_id = %id,
            topic = %item.topic,
            attempts = item.attempts,
            retry_delay_seconds,
            "Requeued item"
        );
        Ok(Some(FailOutcome::Requeued))
    }

    /// [`fail`](Self::fail) using the item topic's configured retry delay
    pub async fn fail_with_policy(&self, id: ItemId) -> Result<Option<FailOutcome>, QueueError> {
        let Some(item) = self.store.get(id).await? else {
            return Ok(None);
        };
        let delay = self.definitions.policy(&item.topic).retry_delay_seconds;
        self.fail(id, delay).await
    }

    /// Return abandoned leases to pending
    pub async fn reap_expired(&self) -> Result<u64, QueueError> {
        let reaped = self.store.reap_expired(Utc::now()).await?;
        if reaped > 0 {
            warn!(count = reaped, "Reaped expired leases");
        }
        Ok(reaped)
    }

    pub async fn references_document(
        &self,
        topics: &[String],
        document_id: &str,
    ) -> Result<bool, QueueError> {
        self.store.references_document(topics, document_id).await
    }

    pub async fn depth(&self, topic: &str) -> Result<QueueDepth, QueueError> {
        self.store.depth(topic).await
    }
}

fn visibility(timeout: StdDuration) -> Duration {
    Duration::from_std(timeout).unwrap_or(Duration::MAX)
}

fn retry_delay(seconds: u64) -> Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// `now + delay`, pinned to the latest representable instant on overflow
fn saturating_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
