//! Storage abstraction for linkwell.
//!
//! The [`Store`] trait defines every persistence operation the ingestion
//! pipeline, work queue, discovery, and search consume, so the pipeline can
//! run against SQLite in production and an in-memory backend in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Bookmark, JobQueueEntry, JobStatus, OrgSchedule, RelationStatus, Schedule, ScheduleRun,
    ScheduleStatus, SearchResult, UrlOrganization, WorkJob,
};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// `last_error` recorded on a job released by [`Store::rescue_work`].
pub const RESCUED_ERROR: &str = "worker stopped while the job was running";

/// Result of an insert guarded by a uniqueness constraint.
///
/// A conflict resolves to the row that already holds the key instead of
/// surfacing as an error.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    Inserted(T),
    AlreadyExists(T),
}

impl<T> InsertOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            InsertOutcome::Inserted(v) | InsertOutcome::AlreadyExists(v) => v,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Group | Methods |
/// |-------|---------|
/// | Bookmarks | `insert_bookmark`, `bookmark_by_url`, `bookmark_by_id`, `update_bookmark` |
/// | Relations | `insert_relation`, `relation_for`, `set_relation_status` |
/// | Job queue | `upsert_queued`, `set_job_status`, `job_entry`, `status_counts`, `pending_older_than` |
/// | Schedules | `upsert_schedule`, `schedules`, `subscribe_org_schedule`, `set_org_schedule_status`, `org_schedules`, `active_org_schedules`, `org_schedules_by_ids` |
/// | Search | `search_bookmarks` |
/// | Work queue | `enqueue_work`, `claim_work`, `complete_work`, `fail_work`, `rescue_work`, `work_job` |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new bookmark. On a URL conflict returns the existing row's id.
    async fn insert_bookmark(&self, bookmark: &Bookmark) -> Result<InsertOutcome<String>>;

    async fn bookmark_by_url(&self, url: &str) -> Result<Option<Bookmark>>;

    async fn bookmark_by_id(&self, id: &str) -> Result<Option<Bookmark>>;

    /// Merge `bookmark` into the stored row with the same id.
    ///
    /// Text fields are only overwritten by non-empty values, and a
    /// `COMPLETE` row never regresses to `PENDING`.
    async fn update_bookmark(&self, bookmark: &Bookmark) -> Result<()>;

    /// Link an organization to a bookmark as `ACTIVE`.
    async fn insert_relation(
        &self,
        org: &str,
        url_id: &str,
    ) -> Result<InsertOutcome<UrlOrganization>>;

    async fn relation_for(&self, org: &str, url_id: &str) -> Result<Option<UrlOrganization>>;

    /// Returns false if no relation matched.
    async fn set_relation_status(
        &self,
        org: &str,
        url_id: &str,
        status: RelationStatus,
    ) -> Result<bool>;

    /// Insert a `PENDING` job queue row, or reset an existing one to `PENDING`.
    async fn upsert_queued(&self, org: &str, url: &str) -> Result<()>;

    /// Update the row's status. A missing row is not an error.
    async fn set_job_status(&self, org: &str, url: &str, status: JobStatus) -> Result<()>;

    async fn job_entry(&self, org: &str, url: &str) -> Result<Option<JobQueueEntry>>;

    /// Entry count per status text for one organization.
    async fn status_counts(&self, org: &str) -> Result<BTreeMap<String, i64>>;

    /// `PENDING` or `QUEUED` entries last touched before `cutoff`.
    async fn pending_older_than(
        &self,
        org: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobQueueEntry>>;

    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<()>;

    async fn schedules(&self) -> Result<Vec<Schedule>>;

    /// Opt an organization in, or reactivate an existing subscription.
    ///
    /// `interval_days` defaults to the schedule's default interval.
    async fn subscribe_org_schedule(
        &self,
        org: &str,
        schedule_id: &str,
        interval_days: Option<i64>,
    ) -> Result<OrgSchedule>;

    async fn set_org_schedule_status(
        &self,
        org: &str,
        schedule_id: &str,
        status: ScheduleStatus,
    ) -> Result<bool>;

    async fn org_schedules(&self, org: &str) -> Result<Vec<OrgSchedule>>;

    /// Every `ACTIVE` subscription running at `interval_days`, across organizations.
    async fn active_org_schedules(&self, interval_days: i64) -> Result<Vec<ScheduleRun>>;

    /// The organization's `ACTIVE` subscriptions among `schedule_ids`.
    async fn org_schedules_by_ids(
        &self,
        org: &str,
        schedule_ids: &[String],
    ) -> Result<Vec<ScheduleRun>>;

    /// Full-text search over the organization's active bookmarks.
    ///
    /// Results are ordered best first with higher scores meaning more relevant.
    async fn search_bookmarks(
        &self,
        org: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SearchResult>>;

    async fn enqueue_work(&self, job: &WorkJob) -> Result<()>;

    /// Atomically move the oldest due job of `queue` to `running`.
    async fn claim_work(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<WorkJob>>;

    async fn complete_work(&self, id: &str) -> Result<()>;

    /// Record a failure. `retry_at: None` discards the job.
    async fn fail_work(&self, id: &str, error: &str, retry_at: Option<DateTime<Utc>>) -> Result<()>;

    /// Release `running` jobs of `queue` last touched before `cutoff`.
    ///
    /// Jobs with attempts left become `available` again; the rest are
    /// discarded. Returns how many jobs moved.
    async fn rescue_work(&self, queue: &str, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn work_job(&self, id: &str) -> Result<Option<WorkJob>>;
}
