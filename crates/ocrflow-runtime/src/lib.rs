//! # ocrflow runtime
//!
//! The moving parts of the pipeline, each a cooperative loop that stops on a
//! shared [`CancellationToken`](tokio_util::sync::CancellationToken):
//! - [`Dispatcher`]: lifecycle events -> next-stage jobs
//! - [`StageWorker`]: preprocessing and OCR transforms
//! - [`Reaper`]: abandoned leases back to pending
//! - [`Reconciler`]: stalled documents back into the pipeline
//!
//! All queue access goes through a [`Broker`]; all document status writes go
//! through the [`DocumentService`].

pub mod broker;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod documents;
pub mod error;
pub mod reaper;
pub mod reconciler;
pub mod stage;
pub mod worker;

pub use broker::{Broker, ClaimedItem, HttpBroker, LocalBroker};
pub use config::PipelineConfig;
pub use consumer::{Consumer, ItemHandler, PollOutcome};
pub use dispatcher::{dispatcher, route, Dispatcher, EventRouter, Route};
pub use documents::{BatchSummary, DocumentService, NOT_FOUND_OR_DENIED, NOT_PREPROCESSED};
pub use error::{BrokerError, PipelineError, StageError};
pub use reaper::Reaper;
pub use reconciler::Reconciler;
pub use stage::{ImagePreprocessor, OcrConfig, OcrEngine, Preprocessor, TesseractOcr};
pub use worker::{stage_worker, Stage, StageHandler, StageKind, StageWorker};
