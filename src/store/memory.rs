//! In-memory [`Store`] implementation for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety and
//! emulates the SQLite backend's uniqueness constraints. Keyword search is a
//! term-frequency count over title, excerpt, and full text.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ids;
use crate::models::{
    merge_nonempty, Bookmark, BookmarkStatus, JobQueueEntry, JobStatus, OrgSchedule,
    RelationStatus, Schedule, ScheduleRun, ScheduleStatus, SearchResult, UrlOrganization, WorkJob,
    WorkState,
};
use crate::search::query_terms;

use super::{InsertOutcome, Store, RESCUED_ERROR};

/// In-memory store for tests.
pub struct InMemoryStore {
    bookmarks: RwLock<HashMap<String, Bookmark>>,
    relations: RwLock<Vec<UrlOrganization>>,
    jobs: RwLock<Vec<JobQueueEntry>>,
    schedules: RwLock<BTreeMap<String, Schedule>>,
    org_schedules: RwLock<Vec<OrgSchedule>>,
    work: RwLock<Vec<WorkJob>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            bookmarks: RwLock::new(HashMap::new()),
            relations: RwLock::new(Vec::new()),
            jobs: RwLock::new(Vec::new()),
            schedules: RwLock::new(BTreeMap::new()),
            org_schedules: RwLock::new(Vec::new()),
            work: RwLock::new(Vec::new()),
        }
    }

    /// Number of bookmark rows, for idempotence checks in tests.
    pub fn bookmark_count(&self) -> usize {
        self.bookmarks.read().unwrap().len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.read().unwrap().len()
    }

    /// Backdate a job queue row so stale-job recovery picks it up.
    pub fn backdate_job(&self, org: &str, url: &str, updated_at: DateTime<Utc>) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(entry) = jobs
            .iter_mut()
            .find(|j| j.org_id == org && j.job_data == url)
        {
            entry.updated_at = updated_at;
        }
    }

    /// Move a work job's schedule and timestamps back to `at`.
    pub fn backdate_work(&self, id: &str, at: DateTime<Utc>) {
        let mut work = self.work.write().unwrap();
        if let Some(job) = work.iter_mut().find(|j| j.id == id) {
            job.scheduled_at = at;
            job.created_at = at;
            job.updated_at = at;
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn join_runs(
    subscriptions: &[OrgSchedule],
    schedules: &BTreeMap<String, Schedule>,
    keep: impl Fn(&OrgSchedule) -> bool,
) -> Vec<ScheduleRun> {
    let mut runs: Vec<ScheduleRun> = subscriptions
        .iter()
        .filter(|s| s.status == ScheduleStatus::Active && keep(s))
        .filter_map(|s| {
            schedules.get(&s.schedule_id).map(|schedule| ScheduleRun {
                organization_id: s.organization_id.clone(),
                schedule: schedule.clone(),
                interval_days: s.interval_days,
            })
        })
        .collect();
    runs.sort_by(|a, b| {
        (&a.organization_id, &a.schedule.schedule_id)
            .cmp(&(&b.organization_id, &b.schedule.schedule_id))
    });
    runs
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_bookmark(&self, bookmark: &Bookmark) -> Result<InsertOutcome<String>> {
        let mut bookmarks = self.bookmarks.write().unwrap();
        if let Some(existing) = bookmarks.values().find(|b| b.url == bookmark.url) {
            return Ok(InsertOutcome::AlreadyExists(existing.id.clone()));
        }
        bookmarks.insert(bookmark.id.clone(), bookmark.clone());
        Ok(InsertOutcome::Inserted(bookmark.id.clone()))
    }

    async fn bookmark_by_url(&self, url: &str) -> Result<Option<Bookmark>> {
        let bookmarks = self.bookmarks.read().unwrap();
        Ok(bookmarks.values().find(|b| b.url == url).cloned())
    }

    async fn bookmark_by_id(&self, id: &str) -> Result<Option<Bookmark>> {
        Ok(self.bookmarks.read().unwrap().get(id).cloned())
    }

    async fn update_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        let mut bookmarks = self.bookmarks.write().unwrap();
        let Some(stored) = bookmarks.get_mut(&bookmark.id) else {
            return Ok(());
        };
        merge_nonempty(&mut stored.domain, &bookmark.domain);
        merge_nonempty(&mut stored.title, &bookmark.title);
        merge_nonempty(&mut stored.excerpt, &bookmark.excerpt);
        merge_nonempty(&mut stored.image_small, &bookmark.image_small);
        merge_nonempty(&mut stored.image_large, &bookmark.image_large);
        merge_nonempty(&mut stored.accent_color, &bookmark.accent_color);
        merge_nonempty(&mut stored.full_text, &bookmark.full_text);
        if stored.status != BookmarkStatus::Complete {
            stored.status = bookmark.status;
        }
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_relation(
        &self,
        org: &str,
        url_id: &str,
    ) -> Result<InsertOutcome<UrlOrganization>> {
        if !self.bookmarks.read().unwrap().contains_key(url_id) {
            bail!("FOREIGN KEY constraint failed: no bookmark {}", url_id);
        }

        let mut relations = self.relations.write().unwrap();
        if let Some(existing) = relations
            .iter_mut()
            .find(|r| r.organization_id == org && r.url_id == url_id)
        {
            if existing.status != RelationStatus::Active {
                existing.status = RelationStatus::Active;
                existing.updated_at = Utc::now();
            }
            return Ok(InsertOutcome::AlreadyExists(existing.clone()));
        }

        let now = Utc::now();
        let relation = UrlOrganization {
            id: ids::new_id(ids::URL_ORG),
            url_id: url_id.to_string(),
            organization_id: org.to_string(),
            status: RelationStatus::Active,
            created_at: now,
            updated_at: now,
        };
        relations.push(relation.clone());
        Ok(InsertOutcome::Inserted(relation))
    }

    async fn relation_for(&self, org: &str, url_id: &str) -> Result<Option<UrlOrganization>> {
        let relations = self.relations.read().unwrap();
        Ok(relations
            .iter()
            .find(|r| r.organization_id == org && r.url_id == url_id)
            .cloned())
    }

    async fn set_relation_status(
        &self,
        org: &str,
        url_id: &str,
        status: RelationStatus,
    ) -> Result<bool> {
        let mut relations = self.relations.write().unwrap();
        match relations
            .iter_mut()
            .find(|r| r.organization_id == org && r.url_id == url_id && r.status != status)
        {
            Some(relation) => {
                relation.status = status;
                relation.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_queued(&self, org: &str, url: &str) -> Result<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap();
        if let Some(entry) = jobs.iter_mut().find(|j| j.org_id == org && j.job_data == url) {
            entry.status = JobStatus::Pending;
            entry.updated_at = now;
            return Ok(());
        }
        jobs.push(JobQueueEntry {
            id: ids::new_id(ids::JOB_QUEUE),
            org_id: org.to_string(),
            job_id: ids::new_id(ids::JOB),
            job_data: url.to_string(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn set_job_status(&self, org: &str, url: &str, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(entry) = jobs.iter_mut().find(|j| j.org_id == org && j.job_data == url) {
            entry.status = status;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn job_entry(&self, org: &str, url: &str) -> Result<Option<JobQueueEntry>> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .iter()
            .find(|j| j.org_id == org && j.job_data == url)
            .cloned())
    }

    async fn status_counts(&self, org: &str) -> Result<BTreeMap<String, i64>> {
        let jobs = self.jobs.read().unwrap();
        let mut counts = BTreeMap::new();
        for entry in jobs.iter().filter(|j| j.org_id == org) {
            *counts.entry(entry.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn pending_older_than(
        &self,
        org: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobQueueEntry>> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .iter()
            .filter(|j| {
                j.org_id == org
                    && matches!(j.status, JobStatus::Pending | JobStatus::Queued)
                    && j.updated_at < cutoff
            })
            .cloned()
            .collect())
    }

    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.schedules
            .write()
            .unwrap()
            .insert(schedule.schedule_id.clone(), schedule.clone());
        Ok(())
    }

    async fn schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.schedules.read().unwrap().values().cloned().collect())
    }

    async fn subscribe_org_schedule(
        &self,
        org: &str,
        schedule_id: &str,
        interval_days: Option<i64>,
    ) -> Result<OrgSchedule> {
        let default_interval = match self.schedules.read().unwrap().get(schedule_id) {
            Some(schedule) => schedule.default_interval_days,
            None => bail!("unknown schedule '{}'", schedule_id),
        };

        let subscription = OrgSchedule {
            organization_id: org.to_string(),
            schedule_id: schedule_id.to_string(),
            status: ScheduleStatus::Active,
            interval_days: interval_days.unwrap_or(default_interval),
        };

        let mut subscriptions = self.org_schedules.write().unwrap();
        match subscriptions
            .iter_mut()
            .find(|s| s.organization_id == org && s.schedule_id == schedule_id)
        {
            Some(existing) => *existing = subscription.clone(),
            None => subscriptions.push(subscription.clone()),
        }
        Ok(subscription)
    }

    async fn set_org_schedule_status(
        &self,
        org: &str,
        schedule_id: &str,
        status: ScheduleStatus,
    ) -> Result<bool> {
        let mut subscriptions = self.org_schedules.write().unwrap();
        match subscriptions
            .iter_mut()
            .find(|s| s.organization_id == org && s.schedule_id == schedule_id)
        {
            Some(existing) => {
                existing.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn org_schedules(&self, org: &str) -> Result<Vec<OrgSchedule>> {
        let subscriptions = self.org_schedules.read().unwrap();
        let mut found: Vec<OrgSchedule> = subscriptions
            .iter()
            .filter(|s| s.organization_id == org)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.schedule_id.cmp(&b.schedule_id));
        Ok(found)
    }

    async fn active_org_schedules(&self, interval_days: i64) -> Result<Vec<ScheduleRun>> {
        let subscriptions = self.org_schedules.read().unwrap();
        let schedules = self.schedules.read().unwrap();
        Ok(join_runs(&subscriptions, &schedules, |s| {
            s.interval_days == interval_days
        }))
    }

    async fn org_schedules_by_ids(
        &self,
        org: &str,
        schedule_ids: &[String],
    ) -> Result<Vec<ScheduleRun>> {
        let subscriptions = self.org_schedules.read().unwrap();
        let schedules = self.schedules.read().unwrap();
        Ok(join_runs(&subscriptions, &schedules, |s| {
            s.organization_id == org && schedule_ids.contains(&s.schedule_id)
        }))
    }

    async fn search_bookmarks(
        &self,
        org: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SearchResult>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let relations = self.relations.read().unwrap();
        let bookmarks = self.bookmarks.read().unwrap();

        let mut results: Vec<SearchResult> = relations
            .iter()
            .filter(|r| r.organization_id == org && r.status == RelationStatus::Active)
            .filter_map(|r| bookmarks.get(&r.url_id))
            .filter_map(|b| {
                let haystack =
                    format!("{} {} {}", b.title, b.excerpt, b.full_text).to_lowercase();
                let score: usize = terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
                (score > 0).then(|| SearchResult {
                    url_id: b.id.clone(),
                    url: b.url.clone(),
                    title: b.title.clone(),
                    excerpt: b.excerpt.clone(),
                    domain: b.domain.clone(),
                    score: score as f64,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.url.cmp(&b.url)));
        results.truncate(limit.max(0) as usize);
        Ok(results)
    }

    async fn enqueue_work(&self, job: &WorkJob) -> Result<()> {
        self.work.write().unwrap().push(job.clone());
        Ok(())
    }

    async fn claim_work(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<WorkJob>> {
        let mut work = self.work.write().unwrap();
        let next = work
            .iter_mut()
            .filter(|j| {
                j.queue == queue
                    && matches!(j.state, WorkState::Available | WorkState::Retryable)
                    && j.scheduled_at <= now
            })
            .min_by_key(|j| (j.scheduled_at, j.created_at));

        Ok(next.map(|job| {
            job.state = WorkState::Running;
            job.attempt += 1;
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn complete_work(&self, id: &str) -> Result<()> {
        let mut work = self.work.write().unwrap();
        if let Some(job) = work.iter_mut().find(|j| j.id == id) {
            job.state = WorkState::Completed;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail_work(&self, id: &str, error: &str, retry_at: Option<DateTime<Utc>>) -> Result<()> {
        let mut work = self.work.write().unwrap();
        if let Some(job) = work.iter_mut().find(|j| j.id == id) {
            job.last_error = Some(error.to_string());
            job.updated_at = Utc::now();
            match retry_at {
                Some(at) => {
                    job.state = WorkState::Retryable;
                    job.scheduled_at = at;
                }
                None => job.state = WorkState::Discarded,
            }
        }
        Ok(())
    }

    async fn rescue_work(&self, queue: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let now = Utc::now();
        let mut rescued = 0;
        let mut work = self.work.write().unwrap();
        for job in work
            .iter_mut()
            .filter(|j| j.queue == queue && j.state == WorkState::Running && j.updated_at < cutoff)
        {
            job.state = if job.attempt < job.max_attempts {
                WorkState::Available
            } else {
                WorkState::Discarded
            };
            job.last_error = Some(RESCUED_ERROR.to_string());
            job.scheduled_at = now;
            job.updated_at = now;
            rescued += 1;
        }
        Ok(rescued)
    }

    async fn work_job(&self, id: &str) -> Result<Option<WorkJob>> {
        Ok(self.work.read().unwrap().iter().find(|j| j.id == id).cloned())
    }
}
