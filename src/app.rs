//! Component wiring shared by the CLI and the HTTP server.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::background::{BackgroundTasks, TaskFailure};
use crate::config::Config;
use crate::db;
use crate::discovery::Discoverer;
use crate::dispatcher::Dispatcher;
use crate::fetcher::{HttpFetcher, PageFetcher};
use crate::ingest::Ingestor;
use crate::migrate;
use crate::renderer::{ChromeRenderer, Renderer};
use crate::scheduler::DiscoveryScheduler;
use crate::store::{SqliteStore, Store};
use crate::worker::{WorkQueue, WorkerPool};

#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub ingestor: Ingestor,
    pub dispatcher: Dispatcher,
    pub discoverer: Arc<Discoverer>,
    pub workers: WorkerPool,
    pub tasks: BackgroundTasks,
}

impl App {
    /// Open the SQLite store (migrating it) with the HTTP fetcher and Chrome renderer.
    pub async fn open(config: Config) -> Result<(Self, mpsc::UnboundedReceiver<TaskFailure>)> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.ingest)?);
        let renderer: Arc<dyn Renderer> = Arc::new(ChromeRenderer::new(&config.ingest));
        Ok(Self::with_parts(config, store, fetcher, renderer))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        fetcher: Arc<dyn PageFetcher>,
        renderer: Arc<dyn Renderer>,
    ) -> (Self, mpsc::UnboundedReceiver<TaskFailure>) {
        let (tasks, failures) = BackgroundTasks::new();
        let ingestor = Ingestor::new(
            store.clone(),
            fetcher.clone(),
            renderer,
            tasks.clone(),
            config.ingest.clone(),
        );
        let dispatcher = Dispatcher::new(
            WorkQueue::new(store.clone(), &config.queue),
            config.ingest.max_workers,
        );
        let discoverer = Arc::new(Discoverer::new(store.clone(), fetcher, dispatcher.clone()));
        let workers = WorkerPool::new(ingestor.clone(), &config.queue, config.ingest.max_workers);

        let app = Self {
            config: Arc::new(config),
            store,
            ingestor,
            dispatcher,
            discoverer,
            workers,
            tasks,
        };
        (app, failures)
    }

    /// Run the worker pool and, when enabled, the discovery scheduler until
    /// `shutdown` flips. Background renders are cancelled on the way out.
    pub async fn run_background(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let workers = {
            let pool = self.workers.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { pool.run(shutdown).await })
        };

        let scheduler = if self.config.discovery.enabled {
            let scheduler = DiscoveryScheduler::new(self.discoverer.clone(), &self.config.discovery);
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move { scheduler.run(shutdown).await }))
        } else {
            info!("discovery disabled");
            None
        };

        workers.await??;
        if let Some(scheduler) = scheduler {
            scheduler.await??;
        }

        self.tasks.cancel_all();
        self.tasks.join_all().await;
        Ok(())
    }
}

/// Log background task failures as they arrive.
pub fn spawn_failure_logger(mut failures: mpsc::UnboundedReceiver<TaskFailure>) {
    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            error!(task = %failure.name, error = %format!("{:#}", failure.error), "background task failed");
        }
    });
}

/// A watch channel flipped to `true` on Ctrl-C.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}
