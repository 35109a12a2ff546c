//! Stage workers: preprocessing and OCR

use async_trait::async_trait;
use ocrflow_core::{ArtifactVariant, DocumentId, DocumentStatus, StageJob};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::{Broker, ClaimedItem};
use crate::config::PipelineConfig;
use crate::consumer::{Consumer, ItemHandler};
use crate::documents::DocumentService;
use crate::error::PipelineError;
use crate::stage::{OcrEngine, Preprocessor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Preprocess,
    Ocr,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Ocr => "ocr",
        }
    }

    /// Status written while the transform runs
    pub fn active_status(&self) -> DocumentStatus {
        match self {
            Self::Preprocess => DocumentStatus::Preprocessing,
            Self::Ocr => DocumentStatus::Ocr,
        }
    }

    pub fn topic<'a>(&self, config: &'a PipelineConfig) -> &'a str {
        match self {
            Self::Preprocess => &config.preprocess_topic,
            Self::Ocr => &config.ocr_topic,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preprocess" | "preprocessing" => Ok(Self::Preprocess),
            "ocr" => Ok(Self::Ocr),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

/// The transform a worker runs
#[derive(Clone)]
pub enum Stage {
    Preprocess(Arc<dyn Preprocessor>),
    Ocr(Arc<dyn OcrEngine>),
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Preprocess(_) => StageKind::Preprocess,
            Self::Ocr(_) => StageKind::Ocr,
        }
    }
}

pub struct StageHandler {
    documents: Arc<DocumentService>,
    stage: Stage,
}

impl StageHandler {
    pub fn new(documents: Arc<DocumentService>, stage: Stage) -> Self {
        Self { documents, stage }
    }

    async fn process(&self, id: DocumentId) -> Result<(), PipelineError> {
        match &self.stage {
            Stage::Preprocess(preprocessor) => {
                let original = self.documents.artifact(id, ArtifactVariant::Original).await?;
                let output = preprocessor.preprocess(&original).await?;
                self.documents.store_preprocessed(id, &output).await?;
                info!(document_id = %id, bytes = output.len(), "Preprocessing complete");
            }
            Stage::Ocr(engine) => {
                let image = self
                    .documents
                    .artifact(id, ArtifactVariant::Preprocessed)
                    .await?;
                let text = engine.extract_text(&image).await?;
                self.documents.store_ocr_text(id, &text).await?;
                info!(document_id = %id, characters = text.chars().count(), "OCR complete");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ItemHandler for StageHandler {
    fn name(&self) -> &'static str {
        match self.stage.kind() {
            StageKind::Preprocess => "preprocess-worker",
            StageKind::Ocr => "ocr-worker",
        }
    }

    async fn handle(&self, item: &ClaimedItem) -> Result<(), PipelineError> {
        let job = StageJob::from_payload(&item.payload)?;
        let id = job.document_id;
        let kind = self.stage.kind();

        if let Err(e) = self
            .documents
            .mark_in_progress(id, kind.active_status())
            .await
        {
            warn!(document_id = %id, stage = %kind, error = %e, "Failed to mark document in progress");
        }

        let result = self.process(id).await;
        if let Err(e) = &result {
            if let Err(mark_err) = self.documents.mark_failed(id, &e.to_string()).await {
                warn!(document_id = %id, error = %mark_err, "Failed to mark document as failed");
            }
        }
        result
    }
}

pub type StageWorker = Consumer<StageHandler>;

pub fn stage_worker(
    broker: Arc<dyn Broker>,
    documents: Arc<DocumentService>,
    stage: Stage,
    config: &PipelineConfig,
) -> StageWorker {
    let topic = stage.kind().topic(config).to_string();
    Consumer::new(
        broker,
        topic,
        config.worker_poll_interval,
        StageHandler::new(documents, stage),
    )
}
