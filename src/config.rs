//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` is optional and falls back to defaults, so a
//! minimal config file only needs a database path.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Desktop browser user agent sent by both the light fetcher and the renderer.
///
/// Many sites serve degraded markup to unrecognized agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_render_settle_ms")]
    pub render_settle_ms: u64,
    #[serde(default = "default_render_secs_per_url")]
    pub render_secs_per_url: u64,
    #[serde(default = "default_render_batch_overhead_secs")]
    pub render_batch_overhead_secs: u64,
    #[serde(default = "default_single_render_timeout_secs")]
    pub single_render_timeout_secs: u64,
    /// Open a fresh browser context per URL instead of one per chunk.
    ///
    /// Turns the chunk-abort on render failure into per-URL isolation.
    #[serde(default)]
    pub isolate_render_contexts: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            render_settle_ms: default_render_settle_ms(),
            render_secs_per_url: default_render_secs_per_url(),
            render_batch_overhead_secs: default_render_batch_overhead_secs(),
            single_render_timeout_secs: default_single_render_timeout_secs(),
            isolate_render_contexts: false,
            user_agent: default_user_agent(),
            chrome_executable: None,
        }
    }
}

impl IngestConfig {
    /// Deadline for rendering a whole chunk: `secs_per_url × count + overhead`.
    pub fn batch_render_timeout(&self, url_count: usize) -> Duration {
        Duration::from_secs(
            self.render_secs_per_url * url_count as u64 + self.render_batch_overhead_secs,
        )
    }

    pub fn single_render_timeout(&self) -> Duration {
        Duration::from_secs(self.single_render_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn render_settle(&self) -> Duration {
        Duration::from_millis(self.render_settle_ms)
    }
}

fn default_max_workers() -> usize {
    10
}
fn default_fetch_timeout_secs() -> u64 {
    5
}
fn default_render_settle_ms() -> u64 {
    2000
}
fn default_render_secs_per_url() -> u64 {
    15
}
fn default_render_batch_overhead_secs() -> u64 {
    60
}
fn default_single_render_timeout_secs() -> u64 {
    120
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// `running` work jobs untouched for this long are released to other workers.
    #[serde(default = "default_rescue_after_secs")]
    pub rescue_after_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_backoff_secs: default_retry_backoff_secs(),
            stale_after_secs: default_stale_after_secs(),
            rescue_after_secs: default_rescue_after_secs(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn rescue_after(&self) -> Duration {
        Duration::from_secs(self.rescue_after_secs)
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_retry_backoff_secs() -> u64 {
    10
}
fn default_stale_after_secs() -> u64 {
    3600
}
fn default_rescue_after_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Percentage of the top score a result must reach to be kept.
    #[serde(default = "default_search_affinity")]
    pub search_affinity: u32,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_affinity: default_search_affinity(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_search_affinity() -> u32 {
    60
}
fn default_final_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_on_start: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// An all-defaults configuration pointing at `./data/linkwell.sqlite`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/linkwell.sqlite"),
            },
            ingest: IngestConfig::default(),
            queue: QueueConfig::default(),
            retrieval: RetrievalConfig::default(),
            discovery: DiscoveryConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_workers == 0 {
            anyhow::bail!("ingest.max_workers must be >= 1");
        }
        if self.ingest.fetch_timeout_secs == 0 {
            anyhow::bail!("ingest.fetch_timeout_secs must be > 0");
        }
        if self.queue.rescue_after_secs == 0 {
            anyhow::bail!("queue.rescue_after_secs must be > 0");
        }
        if self.queue.max_attempts == 0 {
            anyhow::bail!("queue.max_attempts must be >= 1");
        }
        if !(1..=100).contains(&self.retrieval.search_affinity) {
            anyhow::bail!("retrieval.search_affinity must be in [1, 100]");
        }
        if self.retrieval.final_limit < 1 {
            anyhow::bail!("retrieval.final_limit must be >= 1");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let cfg = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(cfg.ingest.max_workers, 10);
        assert_eq!(cfg.ingest.fetch_timeout_secs, 5);
        assert_eq!(cfg.queue.max_attempts, 3);
        assert_eq!(cfg.retrieval.search_affinity, 60);
        assert!(!cfg.ingest.isolate_render_contexts);
    }

    #[test]
    fn test_batch_render_timeout() {
        let ingest = IngestConfig::default();
        assert_eq!(ingest.batch_render_timeout(4), Duration::from_secs(120));
        assert_eq!(ingest.single_render_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse(include_str!("../config/linkwell.example.toml")).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
        assert_eq!(cfg.queue.stale_after(), Duration::from_secs(3600));
        assert_eq!(cfg.queue.rescue_after(), Duration::from_secs(3600));
        assert!(cfg.ingest.chrome_executable.is_none());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = parse("[db]\npath = \"x\"\n[ingest]\nmax_workers = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn test_rejects_affinity_out_of_range() {
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nsearch_affinity = 0\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nsearch_affinity = 101\n").is_err());
    }
}
