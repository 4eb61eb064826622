//! Job queue status counts with stale-entry recovery.
//!
//! Reading an organization's status also re-drives entries stuck in
//! `PENDING` or `QUEUED` past `queue.stale_after_secs`: they are reset to
//! `PENDING` and resubmitted through the dispatcher.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::models::JobStatus;
use crate::queue::JobQueue;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub counts: BTreeMap<String, i64>,
    pub resubmitted: usize,
}

/// Status counts for `org`, taken before any stale entries are re-driven.
pub async fn status_with_recovery(
    queue: &JobQueue,
    dispatcher: &Dispatcher,
    org: &str,
    stale_after: Duration,
) -> Result<StatusReport> {
    let counts = queue.status_counts(org).await?;

    let stale = queue.pending_older_than(org, stale_after).await?;
    let mut urls = Vec::with_capacity(stale.len());
    for entry in stale {
        queue.set_status(org, &entry.job_data, JobStatus::Pending).await?;
        urls.push(entry.job_data);
    }

    if !urls.is_empty() {
        dispatcher.chunk_and_submit(&urls, org).await?;
        info!(org, resubmitted = urls.len(), "stale job queue entries resubmitted");
    }

    Ok(StatusReport {
        counts,
        resubmitted: urls.len(),
    })
}

pub fn print_status(org: &str, report: &StatusReport) {
    println!("Job queue status for {}", org);
    if report.counts.is_empty() {
        println!("  (no entries)");
    }
    for (status, count) in &report.counts {
        println!("  {:<12} {}", status, count);
    }
    if report.resubmitted > 0 {
        println!("  resubmitted {} stale entries", report.resubmitted);
    }
}
