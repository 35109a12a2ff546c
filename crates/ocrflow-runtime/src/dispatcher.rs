//! Event dispatcher: turns lifecycle events into next-stage jobs

use async_trait::async_trait;
use ocrflow_core::{DocumentEvent, EventDecodeError, EventType, StageJob};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, ClaimedItem};
use crate::config::PipelineConfig;
use crate::consumer::{Consumer, ItemHandler};
use crate::error::PipelineError;

/// What an event asks of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Enqueue { topic: String, job: StageJob },
    Log,
}

/// Exhaustive routing table
pub fn route(event: &DocumentEvent, config: &PipelineConfig) -> Route {
    let job = || StageJob::new(event.document_id, &event.owner_id);
    match event.event_type {
        EventType::DocumentUploaded => Route::Enqueue {
            topic: config.preprocess_topic.clone(),
            job: job(),
        },
        EventType::DocumentPreprocessed => Route::Enqueue {
            topic: config.ocr_topic.clone(),
            job: job(),
        },
        EventType::DocumentOcrCompleted | EventType::DocumentFailed => Route::Log,
    }
}

pub struct EventRouter {
    broker: Arc<dyn Broker>,
    config: PipelineConfig,
}

impl EventRouter {
    pub fn new(broker: Arc<dyn Broker>, config: PipelineConfig) -> Self {
        Self { broker, config }
    }

    async fn dispatch(&self, event: &DocumentEvent) -> Result<(), PipelineError> {
        match route(event, &self.config) {
            Route::Enqueue { topic, job } => {
                info!(
                    document_id = %event.document_id,
                    event_type = %event.event_type,
                    topic = %topic,
                    "Enqueueing stage job"
                );
                let payload = serde_json::to_value(&job)?;
                let item_id = self.broker.enqueue(&topic, &payload).await?;
                debug!(item_id = %item_id, topic = %topic, "Queued stage item");
            }
            Route::Log => match event.event_type {
                EventType::DocumentFailed => error!(
                    document_id = %event.document_id,
                    error = event.error_message().unwrap_or("unknown"),
                    "Document failed to process"
                ),
                _ => info!(document_id = %event.document_id, "Document OCR completed"),
            },
        }
        Ok(())
    }
}

#[async_trait]
impl ItemHandler for EventRouter {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    async fn handle(&self, item: &ClaimedItem) -> Result<(), PipelineError> {
        let event = match DocumentEvent::decode(&item.payload) {
            Ok(event) => event,
            Err(EventDecodeError::UnknownType(e)) => {
                warn!(item_id = %item.id, event_type = %e.0, "No handler registered for event, dropping");
                return Ok(());
            }
            Err(EventDecodeError::Malformed(e)) => return Err(PipelineError::Serialization(e)),
        };
        self.dispatch(&event).await
    }
}

/// Consumer of the events topic
pub type Dispatcher = Consumer<EventRouter>;

pub fn dispatcher(broker: Arc<dyn Broker>, config: PipelineConfig) -> Dispatcher {
    let topic = config.events_topic.clone();
    let interval = config.dispatcher_poll_interval;
    Consumer::new(broker.clone(), topic, interval, EventRouter::new(broker, config))
}
