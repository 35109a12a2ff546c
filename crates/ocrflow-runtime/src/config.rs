//! Pipeline configuration

use std::time::Duration;

/// Topics and loop intervals shared by the dispatcher, workers and maintenance loops
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lifecycle events consumed by the dispatcher
    pub events_topic: String,
    /// Jobs for the preprocessing workers
    pub preprocess_topic: String,
    /// Jobs for the OCR workers
    pub ocr_topic: String,
    /// Idle sleep of the dispatcher loop
    pub dispatcher_poll_interval: Duration,
    /// Idle sleep of the stage worker loops
    pub worker_poll_interval: Duration,
    /// Period of the lease reaper
    pub reap_interval: Duration,
    /// Period of the stalled-document reconciler
    pub reconcile_interval: Duration,
    /// Age after which an in-progress document counts as stalled
    pub stale_after: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            events_topic: "document_events".to_string(),
            preprocess_topic: "image_preprocess".to_string(),
            ocr_topic: "ocr_extract".to_string(),
            dispatcher_poll_interval: Duration::from_millis(2000),
            worker_poll_interval: Duration::from_millis(1000),
            reap_interval: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(600),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let poll_override = env_u64("OCRFLOW_POLL_INTERVAL_MS").map(Duration::from_millis);

        Self {
            events_topic: std::env::var("OCRFLOW_DOCUMENT_EVENTS_TOPIC")
                .unwrap_or(defaults.events_topic),
            preprocess_topic: std::env::var("OCRFLOW_PREPROCESS_TOPIC")
                .unwrap_or(defaults.preprocess_topic),
            ocr_topic: std::env::var("OCRFLOW_OCR_TOPIC").unwrap_or(defaults.ocr_topic),
            dispatcher_poll_interval: poll_override.unwrap_or(defaults.dispatcher_poll_interval),
            worker_poll_interval: poll_override.unwrap_or(defaults.worker_poll_interval),
            reap_interval: env_u64("OCRFLOW_REAP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_interval),
            reconcile_interval: env_u64("OCRFLOW_RECONCILE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            stale_after: env_u64("OCRFLOW_STALE_AFTER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
        }
    }

    /// Topics whose items can carry a document id
    pub fn document_topics(&self) -> Vec<String> {
        vec![
            self.events_topic.clone(),
            self.preprocess_topic.clone(),
            self.ocr_topic.clone(),
        ]
    }
}
