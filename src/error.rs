//! Error taxonomy for the ingestion pipeline.
//!
//! Plumbing (config, CLI, migrations, HTTP) uses `anyhow`. The per-URL
//! pipeline uses [`IngestError`] so the orchestrator can decide whether a
//! failure is recorded and skipped or aborts the remainder of a chunk.
//! Uniqueness conflicts are not errors; see [`crate::store::InsertOutcome`].

use std::time::Duration;
use thiserror::Error;

/// Failures of the headless browser.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("failed to capture page content: {0}")]
    Capture(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// Transient transport failure; retried via the work queue's attempt budget.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
    /// Input that cannot be turned into a bookmark.
    #[error("cannot process {url}: {message}")]
    Parse { url: String, message: String },
    #[error("render deadline of {0:?} exceeded")]
    RenderTimeout(Duration),
    #[error("render failed: {0}")]
    Render(RenderError),
    #[error("store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl IngestError {
    pub fn network(url: &str, err: impl std::fmt::Display) -> Self {
        IngestError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn parse(url: &str, message: impl Into<String>) -> Self {
        IngestError::Parse {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// True when the failure aborts the rest of the chunk sharing the browser.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, IngestError::RenderTimeout(_) | IngestError::Render(_))
    }
}

impl From<RenderError> for IngestError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Timeout(budget) => IngestError::RenderTimeout(budget),
            other => IngestError::Render(other),
        }
    }
}
