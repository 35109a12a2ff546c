//! Application state shared across handlers

use ocrflow_queue::QueueManager;
use ocrflow_runtime::DocumentService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    queue: Arc<QueueManager>,
    documents: Arc<DocumentService>,
}

impl AppState {
    pub fn new(queue: Arc<QueueManager>, documents: Arc<DocumentService>) -> Self {
        Self { queue, documents }
    }

    /// Queue manager backing the broker routes
    pub fn queue(&self) -> Arc<QueueManager> {
        self.queue.clone()
    }

    pub fn documents(&self) -> Arc<DocumentService> {
        self.documents.clone()
    }
}
