//! In-memory queue store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::backend::{QueueDepth, QueueError, QueueStore};
use crate::item::{ItemId, ItemStatus, QueueItem};

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    item: QueueItem,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    items: HashMap<ItemId, Slot>,
}

/// Process-local store for tests and single-binary deployments.
///
/// Claims scan under the write lock, so they are serialized.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    inner: RwLock<Inner>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, item: &QueueItem) -> Result<(), QueueError> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.items.insert(
            item.id,
            Slot {
                seq,
                item: item.clone(),
            },
        );
        Ok(())
    }

    async fn claim_next(
        &self,
        topic: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueError> {
        let mut inner = self.inner.write().await;

        let next = inner
            .items
            .values()
            .filter(|slot| slot.item.topic == topic && slot.item.is_claimable(now))
            .min_by_key(|slot| (slot.item.created_at, slot.seq))
            .map(|slot| slot.item.id);

        let Some(id) = next else {
            return Ok(None);
        };

        match inner.items.get_mut(&id) {
            Some(slot) => {
                slot.item.claim(now, lease_until);
                Ok(Some(slot.item.clone()))
            }
            None => Ok(None),
        }
    }

    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>, QueueError> {
        let inner = self.inner.read().await;
        Ok(inner.items.get(&id).map(|slot| slot.item.clone()))
    }

    async fn delete(&self, id: ItemId) -> Result<bool, QueueError> {
        let mut inner = self.inner.write().await;
        Ok(inner.items.remove(&id).is_some())
    }

    async fn reschedule(
        &self,
        id: ItemId,
        topic: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let mut inner = self.inner.write().await;
        match inner.items.get_mut(&id) {
            Some(slot) => {
                slot.item.reschedule(topic, available_at, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        let mut inner = self.inner.write().await;
        let mut reaped = 0;
        for slot in inner.items.values_mut() {
            if slot.item.is_lease_expired(now) {
                let topic = slot.item.topic.clone();
                slot.item.reschedule(&topic, now, now);
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn references_document(
        &self,
        topics: &[String],
        document_id: &str,
    ) -> Result<bool, QueueError> {
        let inner = self.inner.read().await;
        Ok(inner.items.values().any(|slot| {
            topics.iter().any(|t| *t == slot.item.topic)
                && slot.item.document_ref().as_deref() == Some(document_id)
        }))
    }

    async fn depth(&self, topic: &str) -> Result<QueueDepth, QueueError> {
        let inner = self.inner.read().await;
        let mut depth = QueueDepth::default();
        for slot in inner.items.values().filter(|s| s.item.topic == topic) {
            match slot.item.status {
                ItemStatus::Pending => depth.pending += 1,
                ItemStatus::Processing => depth.processing += 1,
            }
        }
        Ok(depth)
    }
}
