//! Queue store trait

use crate::item::{ItemId, QueueItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Item not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Topic definitions error: {0}")]
    Definitions(String),
}

/// Pending and leased counts for a topic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: u64,
    pub processing: u64,
}

/// Durable storage for queue items.
///
/// Implementations must make `claim_next` atomic: two concurrent callers
/// never receive the same item.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new item
    async fn insert(&self, item: &QueueItem) -> Result<(), QueueError>;

    /// Lease the oldest claimable item on `topic`, incrementing its attempts
    async fn claim_next(
        &self,
        topic: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueError>;

    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>, QueueError>;

    /// Remove an item. Returns false when it did not exist.
    async fn delete(&self, id: ItemId) -> Result<bool, QueueError>;

    /// Return an item to pending on `topic`, clearing its lease.
    /// Returns false when it did not exist.
    async fn reschedule(
        &self,
        id: ItemId,
        topic: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// Return every processing item whose lease ended before `now` to pending
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64, QueueError>;

    /// Whether any item on `topics` carries `document_id` in its JSON payload
    async fn references_document(
        &self,
        topics: &[String],
        document_id: &str,
    ) -> Result<bool, QueueError>;

    async fn depth(&self, topic: &str) -> Result<QueueDepth, QueueError>;
}
