//! Process configuration, read once at start-up

use ocrflow_api::ServerConfig;
#[cfg(feature = "postgres")]
use ocrflow_persist::PostgresConfig;
use ocrflow_persist::SqliteConfig;
use ocrflow_queue::QueueConfig;
use ocrflow_runtime::{OcrConfig, PipelineConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub sqlite: SqliteConfig,
    /// Queue store on PostgreSQL when `DATABASE_URL` is a postgres URL
    #[cfg(feature = "postgres")]
    pub postgres: Option<PostgresConfig>,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub ocr: OcrConfig,
    /// Remote broker root; unset means the in-process queue
    pub broker_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            queue: QueueConfig::from_env(),
            sqlite: SqliteConfig::from_env(),
            #[cfg(feature = "postgres")]
            postgres: PostgresConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            server: ServerConfig::from_env(),
            ocr: OcrConfig::from_env(),
            broker_url: std::env::var("OCRFLOW_BROKER_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        }
    }
}
