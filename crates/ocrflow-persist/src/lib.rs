//! # ocrflow persistence
//!
//! Storage for the two durable state machines of the pipeline:
//! queue items and document records.
//!
//! Supports:
//! - In-memory documents (for testing)
//! - SQLite queue and documents (default)
//! - PostgreSQL queue (feature `postgres`)

pub mod backend;
pub mod document_store;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod queue;
pub mod sqlite;

pub use backend::{DocumentStore, Field, StatusChange, StorageError};
pub use document_store::SqliteDocumentStore;
pub use memory::MemoryDocumentStore;
#[cfg(feature = "postgres")]
pub use postgres::{PgQueueStore, PostgresBackend, PostgresConfig};
pub use queue::SqliteQueueStore;
pub use sqlite::{SqliteBackend, SqliteConfig};
