use ocrflow_queue::QueueManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Periodically returns leases abandoned by crashed workers to pending
pub struct Reaper {
    queue: Arc<QueueManager>,
    interval: Duration,
}

impl Reaper {
    pub fn new(queue: Arc<QueueManager>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Lease reaper started");
        loop {
            if let Err(e) = self.queue.reap_expired().await {
                error!(error = %e, "Lease reaping failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Lease reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocrflow_queue::{MemoryQueueStore, QueueConfig, TopicDefinitions};

    #[tokio::test]
    async fn test_reaper_releases_expired_lease() {
        let queue = Arc::new(QueueManager::new(
            Arc::new(MemoryQueueStore::new()),
            QueueConfig {
                visibility_timeout: Duration::from_millis(5),
                ..Default::default()
            },
            TopicDefinitions::default(),
        ));
        let id = queue.enqueue("t", b"{}".to_vec()).await.unwrap();
        queue.claim("t").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let token = CancellationToken::new();
        let reaper = Reaper::new(queue.clone(), Duration::from_millis(10));
        let handle = {
            let token = token.clone();
            tokio::spawn(async move { reaper.run(token).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        handle.await.unwrap();

        let item = queue.claim("t").await.unwrap().unwrap();
        assert_eq!(item.id, id);
        assert_eq!(item.attempts, 2);
    }
}
