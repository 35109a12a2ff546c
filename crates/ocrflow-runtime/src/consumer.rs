//! Cooperative poll loop shared by the dispatcher and the stage workers
//!
//! claim -> handle -> ack/fail -> sleep-if-idle, one item at a time.

use async_trait::async_trait;
use ocrflow_queue::{FailOutcome, ItemId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, ClaimedItem};
use crate::error::{BrokerError, PipelineError};

/// Processes one claimed item. `Ok` acks it, `Err` fails it for retry.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, item: &ClaimedItem) -> Result<(), PipelineError>;
}

/// Result of one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing claimable on the topic
    Idle,
    Acked(ItemId),
    /// Handler failed; the broker's verdict, `None` if the item vanished
    Failed(ItemId, Option<FailOutcome>),
    /// Shutdown arrived mid-item. The lease is left to expire.
    Cancelled(ItemId),
}

pub struct Consumer<H> {
    broker: Arc<dyn Broker>,
    topic: String,
    poll_interval: Duration,
    handler: H,
}

impl<H: ItemHandler> Consumer<H> {
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>, poll_interval: Duration, handler: H) -> Self {
        Self {
            broker,
            topic: topic.into(),
            poll_interval,
            handler,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Claim and process at most one item
    pub async fn poll_once(&self, shutdown: &CancellationToken) -> Result<PollOutcome, BrokerError> {
        let Some(item) = self.broker.claim(&self.topic).await? else {
            return Ok(PollOutcome::Idle);
        };

        debug!(
            consumer = self.handler.name(),
            item_id = %item.id,
            topic = %item.topic,
            attempts = item.attempts,
            "Processing item"
        );

        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                warn!(
                    consumer = self.handler.name(),
                    item_id = %item.id,
                    "Shutdown during processing, leaving item to lease expiry"
                );
                return Ok(PollOutcome::Cancelled(item.id));
            }
            result = self.handler.handle(&item) => result,
        };

        match result {
            Ok(()) => {
                if !self.broker.ack(item.id).await? {
                    warn!(item_id = %item.id, "Ack for item the broker no longer knows");
                }
                Ok(PollOutcome::Acked(item.id))
            }
            Err(e) => {
                error!(
                    consumer = self.handler.name(),
                    item_id = %item.id,
                    attempts = item.attempts,
                    error = %e,
                    "Item processing failed"
                );
                let outcome = self.broker.fail(item.id).await?;
                if outcome.is_none() {
                    warn!(item_id = %item.id, "Fail for item the broker no longer knows");
                }
                Ok(PollOutcome::Failed(item.id, outcome))
            }
        }
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            consumer = self.handler.name(),
            topic = %self.topic,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Consumer started"
        );

        while !shutdown.is_cancelled() {
            let idle = match self.poll_once(&shutdown).await {
                Ok(PollOutcome::Idle) => true,
                Ok(PollOutcome::Cancelled(_)) => break,
                Ok(_) => false,
                Err(e) => {
                    error!(consumer = self.handler.name(), error = %e, "Broker call failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!(consumer = self.handler.name(), topic = %self.topic, "Consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use ocrflow_queue::{
        ItemStatus, MemoryQueueStore, QueueConfig, QueueManager, QueueStore, TopicDefinitions,
    };
    use tokio::sync::Notify;

    /// Signals once it starts, then never finishes
    struct Stuck {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl ItemHandler for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn handle(&self, _item: &ClaimedItem) -> Result<(), PipelineError> {
            self.started.notify_one();
            std::future::pending().await
        }
    }

    fn queue() -> Arc<QueueManager> {
        Arc::new(QueueManager::new(
            Arc::new(MemoryQueueStore::new()),
            QueueConfig::default(),
            TopicDefinitions::default(),
        ))
    }

    #[tokio::test]
    async fn test_shutdown_mid_item_leaves_lease_untouched() {
        let queue = queue();
        let id = queue.enqueue("t", b"{}".to_vec()).await.unwrap();

        let started = Arc::new(Notify::new());
        let consumer = Arc::new(Consumer::new(
            Arc::new(LocalBroker::new(queue.clone())),
            "t",
            Duration::from_millis(10),
            Stuck {
                started: started.clone(),
            },
        ));
        let shutdown = CancellationToken::new();

        let handle = {
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.poll_once(&shutdown).await })
        };
        started.notified().await;
        shutdown.cancel();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled(id));

        let item = queue.store().get(id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Processing);
        assert_eq!(item.attempts, 1);
        assert!(item.claimed_until.is_some());
    }

    #[tokio::test]
    async fn test_idle_topic() {
        let consumer = Consumer::new(
            Arc::new(LocalBroker::new(queue())),
            "empty",
            Duration::from_millis(10),
            Stuck {
                started: Arc::new(Notify::new()),
            },
        );
        let outcome = consumer.poll_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, PollOutcome::Idle);
    }
}
