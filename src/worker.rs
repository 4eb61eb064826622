//! Persisted work queue and bounded worker pool.
//!
//! Each submitted chunk becomes one row in `work_jobs`. Workers claim
//! rows atomically, run the ingestion orchestrator on them, and either
//! complete them or schedule a retry with linear backoff until the
//! attempt budget is spent.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::ids;
use crate::ingest::Ingestor;
use crate::models::{WorkJob, WorkState};
use crate::store::Store;

/// Queue name for URL ingestion chunks.
pub const URL_QUEUE: &str = "url_fetch";

/// Job kind that runs [`Ingestor::process_batch`].
pub const URL_STORE_PROCESS: &str = "url_store_process";

/// Arguments of a [`URL_STORE_PROCESS`] job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlBatchArgs {
    pub urls: Vec<String>,
    pub org_id: String,
}

/// Reference to a submitted job.
#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub job_id: String,
    pub url_count: usize,
}

#[derive(Clone)]
pub struct WorkQueue {
    store: Arc<dyn Store>,
    max_attempts: u32,
}

impl WorkQueue {
    pub fn new(store: Arc<dyn Store>, config: &QueueConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_attempts,
        }
    }

    /// Persist one chunk for the worker pool.
    pub async fn submit(&self, urls: &[String], org: &str) -> Result<JobHandle> {
        let args = UrlBatchArgs {
            urls: urls.to_vec(),
            org_id: org.to_string(),
        };
        let now = Utc::now();
        let job = WorkJob {
            id: ids::new_id(ids::WORK),
            kind: URL_STORE_PROCESS.to_string(),
            queue: URL_QUEUE.to_string(),
            args_json: serde_json::to_string(&args)?,
            state: WorkState::Available,
            attempt: 0,
            max_attempts: self.max_attempts,
            last_error: None,
            scheduled_at: now,
            created_at: now,
            updated_at: now,
        };
        self.store
            .enqueue_work(&job)
            .await
            .with_context(|| format!("Failed to enqueue {} urls for {}", urls.len(), org))?;

        debug!(job_id = %job.id, org, urls = urls.len(), "job submitted");
        Ok(JobHandle {
            job_id: job.id,
            url_count: urls.len(),
        })
    }
}

fn decode_args(job: &WorkJob) -> Result<UrlBatchArgs> {
    if job.kind != URL_STORE_PROCESS {
        anyhow::bail!("unknown job kind '{}'", job.kind);
    }
    serde_json::from_str(&job.args_json).context("invalid url_store_process arguments")
}

#[derive(Clone)]
pub struct WorkerPool {
    store: Arc<dyn Store>,
    ingestor: Ingestor,
    config: QueueConfig,
    workers: usize,
}

impl WorkerPool {
    pub fn new(ingestor: Ingestor, config: &QueueConfig, workers: usize) -> Self {
        Self {
            store: ingestor.store().clone(),
            ingestor,
            config: config.clone(),
            workers: workers.max(1),
        }
    }

    /// Run `workers` polling tasks plus a rescuer until `shutdown` becomes true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(workers = self.workers, queue = URL_QUEUE, "worker pool started");
        let rescuer = {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { pool.rescue_loop(shutdown).await })
        };
        let handles: Vec<_> = (0..self.workers)
            .map(|worker| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.worker_loop(worker, shutdown).await })
            })
            .collect();

        for handle in handles {
            handle.await.context("worker task panicked")?;
        }
        rescuer.await.context("rescuer task panicked")?;
        info!("worker pool stopped");
        Ok(())
    }

    async fn worker_loop(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_one().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!(worker, error = %format!("{e:#}"), "worker iteration failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(worker, "worker stopped");
    }

    /// Periodically release jobs a dead worker left in `running`.
    async fn rescue_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.rescue_after());
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.rescue_stuck().await {
                        error!(error = %format!("{e:#}"), "job rescue failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("rescuer stopped");
    }

    /// Release `running` jobs untouched for longer than `queue.rescue_after_secs`.
    pub async fn rescue_stuck(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.rescue_after_secs as i64);
        let rescued = self.store.rescue_work(URL_QUEUE, cutoff).await?;
        if rescued > 0 {
            warn!(rescued, queue = URL_QUEUE, "released jobs stuck in running");
        }
        Ok(rescued)
    }

    /// Claim and run one due job. Returns false when none is due.
    pub async fn run_one(&self) -> Result<bool> {
        let Some(job) = self.store.claim_work(URL_QUEUE, Utc::now()).await? else {
            return Ok(false);
        };
        info!(job_id = %job.id, attempt = job.attempt, "job claimed");

        let args = match decode_args(&job) {
            Ok(args) => args,
            Err(e) => {
                let message = format!("{e:#}");
                error!(job_id = %job.id, error = %message, "job discarded");
                self.store.fail_work(&job.id, &message, None).await?;
                return Ok(true);
            }
        };

        match self.ingestor.process_batch(&args.org_id, &args.urls).await {
            Ok(report) => {
                self.store.complete_work(&job.id).await?;
                info!(
                    job_id = %job.id,
                    org = %args.org_id,
                    completed = report.completed,
                    failed = report.failed,
                    "job completed"
                );
            }
            Err(e) => {
                let message = e.to_string();
                if job.attempt < job.max_attempts {
                    let backoff = self.config.retry_backoff_secs * u64::from(job.attempt);
                    let retry_at = Utc::now() + chrono::Duration::seconds(backoff as i64);
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempt,
                        retry_in_secs = backoff,
                        error = %message,
                        "job failed, will retry"
                    );
                    self.store.fail_work(&job.id, &message, Some(retry_at)).await?;
                } else {
                    error!(job_id = %job.id, attempt = job.attempt, error = %message, "job discarded");
                    self.store.fail_work(&job.id, &message, None).await?;
                }
            }
        }
        Ok(true)
    }

    /// Run due jobs until none remain. Returns how many were claimed.
    pub async fn drain(&self) -> Result<usize> {
        self.rescue_stuck().await?;
        let mut claimed = 0;
        while self.run_one().await? {
            claimed += 1;
        }
        Ok(claimed)
    }
}
