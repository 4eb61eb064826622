#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use linkwell::app::App;
use linkwell::background::TaskFailure;
use linkwell::config::Config;
use linkwell::error::{IngestError, RenderError};
use linkwell::fetcher::PageFetcher;
use linkwell::renderer::{RenderSession, Renderer};
use linkwell::store::{InMemoryStore, SqliteStore, Store};
use linkwell::{db, migrate};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Serves canned HTML by URL; unknown URLs fail like a refused connection.
#[derive(Default)]
pub struct FakeFetcher {
    pages: Mutex<HashMap<String, String>>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
        self
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| IngestError::network(url, "connection refused"))
    }
}

/// Renders every URL to a small article unless told to stall, break, or
/// return an empty page for it.
#[derive(Default)]
pub struct FakeRenderer {
    slow: HashSet<String>,
    broken: HashSet<String>,
    blank: HashSet<String>,
    broken_once: HashSet<String>,
    failed: Arc<Mutex<HashSet<String>>>,
    pub opened: Arc<AtomicUsize>,
    pub rendered: Arc<Mutex<Vec<String>>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never finishes rendering `url` within any reasonable deadline.
    pub fn slow(mut self, url: &str) -> Self {
        self.slow.insert(url.to_string());
        self
    }

    pub fn broken(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    pub fn blank(mut self, url: &str) -> Self {
        self.blank.insert(url.to_string());
        self
    }

    /// Fail the first render of `url`, then render it normally.
    pub fn broken_once(mut self, url: &str) -> Self {
        self.broken_once.insert(url.to_string());
        self
    }
}

pub fn rendered_page(url: &str) -> String {
    format!(
        "<html><head><title>Rendered</title></head>\
         <body><article><p>Rendered body of {url}</p></article></body></html>"
    )
}

struct FakeSession {
    slow: HashSet<String>,
    broken: HashSet<String>,
    blank: HashSet<String>,
    broken_once: HashSet<String>,
    failed: Arc<Mutex<HashSet<String>>>,
    rendered: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn open(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            slow: self.slow.clone(),
            broken: self.broken.clone(),
            blank: self.blank.clone(),
            broken_once: self.broken_once.clone(),
            failed: self.failed.clone(),
            rendered: self.rendered.clone(),
        }))
    }
}

#[async_trait]
impl RenderSession for FakeSession {
    async fn render(&mut self, url: &str) -> Result<String, RenderError> {
        if self.slow.contains(url) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let first_failure =
            self.broken_once.contains(url) && self.failed.lock().unwrap().insert(url.to_string());
        if self.broken.contains(url) || first_failure {
            return Err(RenderError::Navigation(format!("{url}: net::ERR_ABORTED")));
        }
        self.rendered.lock().unwrap().push(url.to_string());
        if self.blank.contains(url) {
            return Ok("<html><head><title>Empty</title></head><body></body></html>".to_string());
        }
        Ok(rendered_page(url))
    }

    async fn close(&mut self) {}
}

pub fn light_page(title: &str) -> String {
    format!(
        r#"<html><head><title>{title}</title>
        <meta name="description" content="About {title}"></head>
        <body><p>{title}</p></body></html>"#
    )
}

/// Defaults with worker polling and retry backoff shrunk for tests.
pub fn test_config() -> Config {
    let mut config = Config::minimal();
    config.ingest.max_workers = 2;
    config.queue.poll_interval_ms = 10;
    config.queue.retry_backoff_secs = 0;
    config.discovery.enabled = false;
    config
}

/// Which store a harness runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
}

enum Storage {
    Memory(Arc<InMemoryStore>),
    Sqlite(Arc<SqliteStore>, TempDir),
}

pub struct Harness {
    pub app: App,
    pub store: Arc<dyn Store>,
    storage: Storage,
    pub failures: mpsc::UnboundedReceiver<TaskFailure>,
}

fn assemble(
    config: Config,
    store: Arc<dyn Store>,
    storage: Storage,
    fetcher: FakeFetcher,
    renderer: FakeRenderer,
) -> Harness {
    let (app, failures) = App::with_parts(
        config,
        store.clone(),
        Arc::new(fetcher),
        Arc::new(renderer),
    );
    Harness {
        app,
        store,
        storage,
        failures,
    }
}

/// In-memory harness.
pub fn harness(config: Config, fetcher: FakeFetcher, renderer: FakeRenderer) -> Harness {
    let memory = Arc::new(InMemoryStore::new());
    assemble(
        config,
        memory.clone(),
        Storage::Memory(memory),
        fetcher,
        renderer,
    )
}

/// Harness on the chosen backend; SQLite runs on a migrated database in a
/// temp directory that lives as long as the harness.
pub async fn harness_on(
    backend: Backend,
    config: Config,
    fetcher: FakeFetcher,
    renderer: FakeRenderer,
) -> Harness {
    match backend {
        Backend::Memory => harness(config, fetcher, renderer),
        Backend::Sqlite => {
            let tmp = TempDir::new().unwrap();
            let mut config = config;
            config.db.path = tmp.path().join("linkwell.sqlite");
            let pool = db::connect(&config).await.unwrap();
            migrate::apply(&pool).await.unwrap();
            let sqlite = Arc::new(SqliteStore::new(pool));
            assemble(
                config,
                sqlite.clone(),
                Storage::Sqlite(sqlite, tmp),
                fetcher,
                renderer,
            )
        }
    }
}

impl Harness {
    async fn count(&self, table: &str) -> usize {
        match &self.storage {
            Storage::Memory(memory) => match table {
                "url_store" => memory.bookmark_count(),
                _ => memory.relation_count(),
            },
            Storage::Sqlite(sqlite, _) => {
                let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(sqlite.pool())
                    .await
                    .unwrap();
                n as usize
            }
        }
    }

    pub async fn bookmark_count(&self) -> usize {
        self.count("url_store").await
    }

    pub async fn relation_count(&self) -> usize {
        self.count("url_organizations").await
    }

    /// Move a job queue row's last update back to `at`.
    pub async fn backdate_job(&self, org: &str, url: &str, at: DateTime<Utc>) {
        match &self.storage {
            Storage::Memory(memory) => memory.backdate_job(org, url, at),
            Storage::Sqlite(sqlite, _) => {
                sqlx::query("UPDATE job_queue SET updated_at = ? WHERE org_id = ? AND job_data = ?")
                    .bind(at.timestamp())
                    .bind(org)
                    .bind(url)
                    .execute(sqlite.pool())
                    .await
                    .unwrap();
            }
        }
    }

    /// Move a work job's schedule and timestamps back to `at`.
    pub async fn backdate_work(&self, id: &str, at: DateTime<Utc>) {
        match &self.storage {
            Storage::Memory(memory) => memory.backdate_work(id, at),
            Storage::Sqlite(sqlite, _) => {
                sqlx::query(
                    "UPDATE work_jobs SET scheduled_at = ?, created_at = ?, updated_at = ? WHERE id = ?",
                )
                .bind(at.timestamp())
                .bind(at.timestamp())
                .bind(at.timestamp())
                .bind(id)
                .execute(sqlite.pool())
                .await
                .unwrap();
            }
        }
    }
}
