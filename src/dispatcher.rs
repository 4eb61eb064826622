//! Chunked submission of URL lists to the work queue.
//!
//! A list is cut into contiguous chunks of `ceil(len / max_workers)` URLs
//! and each chunk becomes one work-queue job, so at most `max_workers`
//! chunks exist per submission regardless of its size.

use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::fetcher::normalize_url;
use crate::worker::{JobHandle, WorkQueue};

/// Split `urls` into contiguous chunks of `ceil(len / max_workers)`.
///
/// The chunk size is computed first, so the last chunk may be short and
/// fewer than `max_workers` chunks may result.
pub fn chunk_urls(urls: &[String], max_workers: usize) -> Vec<Vec<String>> {
    if urls.is_empty() {
        return Vec::new();
    }
    let size = urls.len().div_ceil(max_workers.max(1));
    urls.chunks(size).map(<[String]>::to_vec).collect()
}

/// Outcome of a bulk submission.
#[derive(Debug, Clone, Serialize)]
pub struct BulkReceipt {
    pub accepted: usize,
    pub rejected: Vec<String>,
    pub jobs: Vec<JobHandle>,
}

#[derive(Clone)]
pub struct Dispatcher {
    queue: WorkQueue,
    max_workers: usize,
}

impl Dispatcher {
    pub fn new(queue: WorkQueue, max_workers: usize) -> Self {
        Self {
            queue,
            max_workers: max_workers.max(1),
        }
    }

    /// Split raw input into valid URLs (deduplicated, order kept) and rejects.
    pub fn validate<S: AsRef<str>>(raw: &[S]) -> (Vec<String>, Vec<String>) {
        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        let mut rejected = Vec::new();
        for item in raw {
            match normalize_url(item.as_ref()) {
                Some(url) => {
                    if seen.insert(url.clone()) {
                        valid.push(url);
                    }
                }
                None => rejected.push(item.as_ref().to_string()),
            }
        }
        (valid, rejected)
    }

    /// Submit already-validated URLs, one job per chunk.
    pub async fn chunk_and_submit(&self, urls: &[String], org: &str) -> Result<Vec<JobHandle>> {
        let mut jobs = Vec::new();
        for chunk in chunk_urls(urls, self.max_workers) {
            jobs.push(self.queue.submit(&chunk, org).await?);
        }
        info!(org, urls = urls.len(), jobs = jobs.len(), "urls dispatched");
        Ok(jobs)
    }

    /// Validate and dispatch a bulk submission. `reverse` flips the order.
    pub async fn submit_bulk<S: AsRef<str>>(
        &self,
        raw: &[S],
        org: &str,
        reverse: bool,
    ) -> Result<BulkReceipt> {
        let (mut valid, rejected) = Self::validate(raw);
        if reverse {
            valid.reverse();
        }
        if !rejected.is_empty() {
            warn!(org, rejected = rejected.len(), "skipping invalid urls");
        }
        let jobs = self.chunk_and_submit(&valid, org).await?;
        Ok(BulkReceipt {
            accepted: valid.len(),
            rejected,
            jobs,
        })
    }
}
