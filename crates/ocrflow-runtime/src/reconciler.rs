//! Reconciler for documents stuck in an in-progress status
//!
//! Queue outcome and document status are written by different processes
//! without a shared transaction. A document whose status says work is owed,
//! but which no queue item references, is restarted from its stalled stage.

use chrono::{DateTime, Utc};
use ocrflow_core::DocumentStatus;
use ocrflow_queue::QueueManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::documents::DocumentService;
use crate::error::PipelineError;

pub struct Reconciler {
    queue: Arc<QueueManager>,
    documents: Arc<DocumentService>,
    topics: Vec<String>,
    interval: Duration,
    stale_after: Duration,
}

impl Reconciler {
    pub fn new(queue: Arc<QueueManager>, documents: Arc<DocumentService>, config: &PipelineConfig) -> Self {
        Self {
            queue,
            documents,
            topics: config.document_topics(),
            interval: config.reconcile_interval,
            stale_after: config.stale_after,
        }
    }

    /// One sweep. Returns how many documents were restarted.
    pub async fn reconcile_once(&self) -> Result<usize, PipelineError> {
        let cutoff = chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|stale_after| Utc::now().checked_sub_signed(stale_after))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self
            .documents
            .store()
            .list_stale(&DocumentStatus::IN_PROGRESS, cutoff)
            .await?;

        let mut restarted = 0;
        for document in stale {
            let id = document.id.to_string();
            if self.queue.references_document(&self.topics, &id).await? {
                debug!(document_id = %id, status = %document.status, "Stale document still has queued work");
                continue;
            }

            match self.documents.restart_stalled(&document).await {
                Ok(()) => {
                    warn!(document_id = %id, status = %document.status, "Restarted stalled document");
                    restarted += 1;
                }
                Err(e) => error!(document_id = %id, error = %e, "Failed to restart stalled document"),
            }
        }
        Ok(restarted)
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            stale_after_secs = self.stale_after.as_secs(),
            "Reconciler started"
        );
        loop {
            if let Err(e) = self.reconcile_once().await {
                error!(error = %e, "Reconciliation sweep failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Reconciler stopped");
    }
}
