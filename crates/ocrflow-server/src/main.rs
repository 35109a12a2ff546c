//! ocrflow - queue-driven document OCR pipeline
//!
//! # Usage
//!
//! ```bash
//! # HTTP broker + document API (with the lease reaper)
//! ocrflow broker
//!
//! # Event dispatcher and stage workers, against a remote broker
//! OCRFLOW_BROKER_URL=http://broker:8003 ocrflow dispatcher
//! OCRFLOW_BROKER_URL=http://broker:8003 ocrflow worker --stage preprocess
//! OCRFLOW_BROKER_URL=http://broker:8003 ocrflow worker --stage ocr --concurrency 4
//!
//! # Lease reaper + stalled-document reconciler
//! ocrflow maintenance
//!
//! # Everything in one process over the shared store
//! ocrflow all
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ocrflow_api::{ApiServer, AppState};
use ocrflow_persist::{DocumentStore, SqliteBackend};
use ocrflow_queue::{QueueManager, QueueStore};
use ocrflow_runtime::{
    dispatcher, stage_worker, Broker, DocumentService, HttpBroker, ImagePreprocessor,
    LocalBroker, Reaper, Reconciler, Stage, StageKind, TesseractOcr,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "ocrflow",
    version,
    about = "Queue-driven document OCR pipeline",
    long_about = "Every pipeline role runs as its own polling loop.\n\n\
                  Roles coordinate only through the shared queue, either\n\
                  in-process or through the HTTP broker (OCRFLOW_BROKER_URL)."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// HTTP broker and document API, plus the lease reaper
    Broker,

    /// Route document events to the stage topics
    Dispatcher,

    /// Run a stage worker
    Worker(WorkerArgs),

    /// Lease reaper and stalled-document reconciler
    Maintenance,

    /// Every role in one process
    All,
}

#[derive(Args)]
struct WorkerArgs {
    /// Stage to run: preprocess | ocr
    #[arg(long)]
    stage: StageKind,

    /// Independent polling loops in this process
    #[arg(long, default_value_t = 1, env = "OCRFLOW_WORKER_CONCURRENCY")]
    concurrency: usize,
}

/// Stores owned by this process
struct Local {
    queue: Arc<QueueManager>,
    documents: Arc<dyn DocumentStore>,
}

impl Local {
    async fn open(config: &AppConfig) -> Result<Self> {
        let definitions = config
            .queue
            .load_definitions()
            .context("loading topic definitions")?;
        let sqlite = SqliteBackend::new_with_config(config.sqlite.clone())
            .await
            .context("opening SQLite")?;
        let store = queue_store(config, &sqlite).await?;

        let queue = Arc::new(QueueManager::new(store, config.queue.clone(), definitions));
        Ok(Self {
            queue,
            documents: sqlite.document_store(),
        })
    }
}

#[cfg(feature = "postgres")]
async fn queue_store(config: &AppConfig, sqlite: &SqliteBackend) -> Result<Arc<dyn QueueStore>> {
    if let Some(pg) = &config.postgres {
        let backend = ocrflow_persist::PostgresBackend::new_with_config(pg.clone())
            .await
            .context("opening PostgreSQL")?;
        return Ok(backend.queue_store());
    }
    Ok(sqlite.queue_store())
}

#[cfg(not(feature = "postgres"))]
async fn queue_store(_config: &AppConfig, sqlite: &SqliteBackend) -> Result<Arc<dyn QueueStore>> {
    Ok(sqlite.queue_store())
}

/// HTTP broker when `OCRFLOW_BROKER_URL` is set, otherwise the local queue
fn connect_broker(config: &AppConfig, local: Option<&Local>) -> Result<Arc<dyn Broker>> {
    if let Some(url) = &config.broker_url {
        info!(broker_url = %url, "Using remote broker");
        return Ok(Arc::new(HttpBroker::new(url)?));
    }
    let local = local.context("no OCRFLOW_BROKER_URL and no local queue")?;
    Ok(Arc::new(LocalBroker::new(local.queue.clone())))
}

fn document_service(config: &AppConfig, documents: Arc<dyn DocumentStore>, broker: Arc<dyn Broker>) -> Arc<DocumentService> {
    Arc::new(
        DocumentService::new(documents, broker, config.pipeline.events_topic.clone())
            .with_max_upload_bytes(config.server.max_upload_bytes),
    )
}

fn stage(kind: StageKind, config: &AppConfig) -> Stage {
    match kind {
        StageKind::Preprocess => Stage::Preprocess(Arc::new(ImagePreprocessor::new())),
        StageKind::Ocr => Stage::Ocr(Arc::new(TesseractOcr::new(config.ocr.clone()))),
    }
}

/// Every task spawned for one command, stopped together
struct Tasks {
    set: JoinSet<Result<()>>,
    shutdown: CancellationToken,
}

impl Tasks {
    fn new(shutdown: CancellationToken) -> Self {
        Self {
            set: JoinSet::new(),
            shutdown,
        }
    }

    fn api(&mut self, config: &AppConfig, local: &Local, documents: Arc<DocumentService>) {
        let server = ApiServer::new(
            config.server.clone(),
            AppState::new(local.queue.clone(), documents),
        );
        let token = self.shutdown.clone();
        self.set.spawn(async move { Ok(server.run(token).await?) });
    }

    fn reaper(&mut self, config: &AppConfig, local: &Local) {
        let reaper = Reaper::new(local.queue.clone(), config.pipeline.reap_interval);
        let token = self.shutdown.clone();
        self.set.spawn(async move {
            reaper.run(token).await;
            Ok(())
        });
    }

    fn reconciler(&mut self, config: &AppConfig, local: &Local, documents: Arc<DocumentService>) {
        let reconciler = Reconciler::new(local.queue.clone(), documents, &config.pipeline);
        let token = self.shutdown.clone();
        self.set.spawn(async move {
            reconciler.run(token).await;
            Ok(())
        });
    }

    fn dispatcher(&mut self, config: &AppConfig, broker: Arc<dyn Broker>) {
        let dispatcher = dispatcher(broker, config.pipeline.clone());
        let token = self.shutdown.clone();
        self.set.spawn(async move {
            dispatcher.run(token).await;
            Ok(())
        });
    }

    fn workers(
        &mut self,
        config: &AppConfig,
        kind: StageKind,
        concurrency: usize,
        broker: Arc<dyn Broker>,
        documents: Arc<DocumentService>,
    ) {
        let stage = stage(kind, config);
        for _ in 0..concurrency.max(1) {
            let worker = stage_worker(broker.clone(), documents.clone(), stage.clone(), &config.pipeline);
            let token = self.shutdown.clone();
            self.set.spawn(async move {
                worker.run(token).await;
                Ok(())
            });
        }
    }

    /// Wait for every task; the first failure stops the rest
    async fn join(mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(joined) = self.set.join_next().await {
            let outcome = joined.map_err(anyhow::Error::from).and_then(|r| r);
            if let Err(e) = outcome {
                error!(error = %e, "Task failed, shutting down");
                self.shutdown.cancel();
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    ocrflow_api::init_tracing();

    let config = AppConfig::from_env();
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            ocrflow_api::shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let mut tasks = Tasks::new(shutdown);
    match cli.command {
        Command::Broker => {
            info!(addr = %config.server.addr, "Starting broker");
            let local = Local::open(&config).await?;
            let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new(local.queue.clone()));
            let documents = document_service(&config, local.documents.clone(), broker);
            tasks.api(&config, &local, documents);
            tasks.reaper(&config, &local);
        }
        Command::Dispatcher => {
            info!(topic = %config.pipeline.events_topic, "Starting dispatcher");
            let local = match config.broker_url {
                Some(_) => None,
                None => Some(Local::open(&config).await?),
            };
            let broker = connect_broker(&config, local.as_ref())?;
            tasks.dispatcher(&config, broker);
        }
        Command::Worker(args) => {
            info!(stage = %args.stage, concurrency = args.concurrency, "Starting stage worker");
            // Documents live in the shared database even when the queue is remote
            let local = Local::open(&config).await?;
            let broker = connect_broker(&config, Some(&local))?;
            let documents = document_service(&config, local.documents.clone(), broker.clone());
            tasks.workers(&config, args.stage, args.concurrency, broker, documents);
        }
        Command::Maintenance => {
            if config.broker_url.is_some() {
                warn!("OCRFLOW_BROKER_URL is ignored, maintenance runs against the local store");
            }
            let local = Local::open(&config).await?;
            let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new(local.queue.clone()));
            let documents = document_service(&config, local.documents.clone(), broker);
            tasks.reaper(&config, &local);
            tasks.reconciler(&config, &local, documents);
        }
        Command::All => {
            info!(addr = %config.server.addr, "Starting every role in one process");
            let local = Local::open(&config).await?;
            let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new(local.queue.clone()));
            let documents = document_service(&config, local.documents.clone(), broker.clone());
            tasks.api(&config, &local, documents.clone());
            tasks.reaper(&config, &local);
            tasks.reconciler(&config, &local, documents.clone());
            tasks.dispatcher(&config, broker.clone());
            for kind in [StageKind::Preprocess, StageKind::Ocr] {
                tasks.workers(&config, kind, 1, broker.clone(), documents.clone());
            }
        }
    }

    tasks.join().await?;
    info!("ocrflow stopped");
    Ok(())
}
