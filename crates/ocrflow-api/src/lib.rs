//! # ocrflow API
//!
//! HTTP surface of the pipeline:
//! - broker routes (`enqueue`, `claim`, `ack`, `fail`) at the root and under `/api`
//! - document routes under `/api/documents`
//! - request-id and tracing middleware, graceful shutdown

pub mod documents;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::api_router;
pub use server::{init_tracing, shutdown_signal, ApiServer, ServerConfig};
pub use state::AppState;
