//! ocrflow API server with graceful shutdown

use axum::{middleware, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;

use crate::error::ApiError;
use crate::middleware::{body_limit_layer, request_id_middleware, timeout_layer, tracing_middleware};
use crate::routes::api_router;
use crate::state::AppState;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub timeout: Duration,
    /// Max request body size (bytes)
    pub max_body_size: usize,
    /// Max accepted document upload (bytes)
    pub max_upload_bytes: usize,
    pub compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8003)),
            timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024, // 1MB
            max_upload_bytes: 10 * 1024 * 1024,
            compression: true,
        }
    }
}

impl ServerConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port: u16 = std::env::var("OCRFLOW_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.addr.port());

        let timeout_secs: u64 = std::env::var("OCRFLOW_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(defaults.timeout.as_secs());

        let max_upload_bytes = std::env::var("OCRFLOW_MAX_UPLOAD_MB")
            .ok()
            .and_then(|m| m.parse::<usize>().ok())
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or(defaults.max_upload_bytes);

        let compression = std::env::var("OCRFLOW_COMPRESSION")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "off"))
            .unwrap_or(defaults.compression);

        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            timeout: Duration::from_secs(timeout_secs),
            max_upload_bytes,
            compression,
            ..defaults
        }
    }

    /// Body limit applied to every route; never below the upload limit
    pub fn effective_body_limit(&self) -> usize {
        self.max_body_size.max(self.max_upload_bytes)
    }
}

pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Routes plus the middleware stack (last layer runs first)
    pub fn router(&self) -> Router {
        let mut app = api_router(self.state.clone())
            .layer(body_limit_layer(self.config.effective_body_limit()))
            .layer(timeout_layer(self.config.timeout))
            .layer(middleware::from_fn(tracing_middleware))
            .layer(middleware::from_fn(request_id_middleware));

        if self.config.compression {
            app = app.layer(CompressionLayer::new());
        }
        app
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ApiError> {
        let listener = TcpListener::bind(self.config.addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), ApiError> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "ocrflow API listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Initialize tracing subscriber
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ocrflow=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
