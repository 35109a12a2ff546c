//! # ocrflow queue
//!
//! Leased work queue that coordinates every pipeline process.
//!
//! Features:
//! - Pluggable [`QueueStore`] (memory here, SQLite/PostgreSQL in `ocrflow-persist`)
//! - Atomic claim: one row, one lease holder
//! - Per-topic retry policy with dead-lettering
//! - Reaping of leases abandoned by crashed workers

pub mod backend;
pub mod item;
pub mod manager;
pub mod memory;
pub mod topics;

pub use backend::{QueueDepth, QueueError, QueueStore};
pub use item::{ItemId, ItemStatus, QueueItem};
pub use manager::{FailOutcome, QueueConfig, QueueManager};
pub use memory::MemoryQueueStore;
pub use topics::{RetryPolicy, TopicDefinition, TopicDefinitions};
