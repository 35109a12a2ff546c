//! # ocrflow core
//!
//! Domain types shared by every ocrflow crate:
//! - [`Document`] and its [`DocumentStatus`] state machine
//! - [`DocumentEvent`] lifecycle facts carried on the event topic
//! - [`StageJob`] payloads for the preprocessing and OCR topics

pub mod document;
pub mod event;
pub mod job;

pub use document::{ArtifactVariant, Document, DocumentId, DocumentStatus, InvalidTransition};
pub use event::{DocumentEvent, EventDecodeError, EventType, UnknownEventType};
pub use job::{MalformedJob, StageJob};
