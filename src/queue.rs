//! Job Queue Store: per (organization, URL) processing status.
//!
//! A thin facade over [`Store`] that names the four operations the
//! pipeline uses and logs transitions. One row exists per pair; a
//! resubmission resets the row to `PENDING` instead of adding another.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::debug;

use crate::models::{JobQueueEntry, JobStatus};
use crate::store::Store;

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn Store>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn upsert_queued(&self, org: &str, url: &str) -> Result<()> {
        self.store.upsert_queued(org, url).await?;
        debug!(org, url, status = "PENDING", "job queue entry upserted");
        Ok(())
    }

    /// A missing row is silently ignored.
    pub async fn set_status(&self, org: &str, url: &str, status: JobStatus) -> Result<()> {
        self.store.set_job_status(org, url, status).await?;
        debug!(org, url, status = %status, "job queue status");
        Ok(())
    }

    pub async fn entry(&self, org: &str, url: &str) -> Result<Option<JobQueueEntry>> {
        self.store.job_entry(org, url).await
    }

    pub async fn status_counts(&self, org: &str) -> Result<BTreeMap<String, i64>> {
        self.store.status_counts(org).await
    }

    /// `PENDING` or `QUEUED` entries not touched for at least `age`.
    pub async fn pending_older_than(&self, org: &str, age: Duration) -> Result<Vec<JobQueueEntry>> {
        let age = chrono::Duration::from_std(age)?;
        self.store.pending_older_than(org, Utc::now() - age).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_status_counts_after_transitions() {
        let store = Arc::new(InMemoryStore::new());
        let queue = JobQueue::new(store.clone());

        queue.upsert_queued("org", "https://a.com").await.unwrap();
        queue.upsert_queued("org", "https://b.com").await.unwrap();
        queue
            .set_status("org", "https://a.com", JobStatus::Complete)
            .await
            .unwrap();

        let counts = queue.status_counts("org").await.unwrap();
        assert_eq!(counts.get("COMPLETE"), Some(&1));
        assert_eq!(counts.get("PENDING"), Some(&1));
        assert!(queue.status_counts("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_older_than_uses_age() {
        let store = Arc::new(InMemoryStore::new());
        let queue = JobQueue::new(store.clone());
        queue.upsert_queued("org", "https://old.com").await.unwrap();
        queue.upsert_queued("org", "https://new.com").await.unwrap();
        store.backdate_job("org", "https://old.com", Utc::now() - chrono::Duration::hours(2));

        let stale = queue
            .pending_older_than("org", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].job_data, "https://old.com");
    }
}
