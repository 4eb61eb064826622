//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation to SQL against the schema created by
//! [`crate::migrate`]. Timestamps are stored as Unix seconds. The
//! `url_store_fts` index is rewritten whenever a bookmark row changes.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::ids;
use crate::models::{
    Bookmark, JobQueueEntry, JobStatus, OrgSchedule, RelationStatus, Schedule, ScheduleRun,
    ScheduleStatus, SearchResult, UrlOrganization, WorkJob, WorkState,
};
use crate::search::fts_expression;

use super::{InsertOutcome, Store, RESCUED_ERROR};

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn row_to_bookmark(row: &SqliteRow) -> Result<Bookmark> {
    Ok(Bookmark {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        domain: row.try_get("domain")?,
        title: row.try_get("title")?,
        excerpt: row.try_get("excerpt")?,
        image_small: row.try_get("image_small")?,
        image_large: row.try_get("image_large")?,
        accent_color: row.try_get("accent_color")?,
        full_text: row.try_get("full_text")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
    })
}

fn row_to_relation(row: &SqliteRow) -> Result<UrlOrganization> {
    Ok(UrlOrganization {
        id: row.try_get("id")?,
        url_id: row.try_get("url_id")?,
        organization_id: row.try_get("organization_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
    })
}

fn row_to_job_entry(row: &SqliteRow) -> Result<JobQueueEntry> {
    Ok(JobQueueEntry {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        job_id: row.try_get("job_id")?,
        job_data: row.try_get("job_data")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
    })
}

fn row_to_schedule(row: &SqliteRow) -> Result<Schedule> {
    Ok(Schedule {
        schedule_id: row.try_get("schedule_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        schedule_type: row.try_get::<String, _>("type")?.parse()?,
        url: row.try_get("url")?,
        default_interval_days: row.try_get("default_interval_days")?,
    })
}

fn row_to_org_schedule(row: &SqliteRow) -> Result<OrgSchedule> {
    Ok(OrgSchedule {
        organization_id: row.try_get("organization_id")?,
        schedule_id: row.try_get("schedule_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        interval_days: row.try_get("interval_days")?,
    })
}

fn row_to_schedule_run(row: &SqliteRow) -> Result<ScheduleRun> {
    Ok(ScheduleRun {
        organization_id: row.try_get("organization_id")?,
        interval_days: row.try_get("interval_days")?,
        schedule: row_to_schedule(row)?,
    })
}

fn row_to_work_job(row: &SqliteRow) -> Result<WorkJob> {
    Ok(WorkJob {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        queue: row.try_get("queue")?,
        args_json: row.try_get("args_json")?,
        state: row.try_get::<String, _>("state")?.parse()?,
        attempt: row.try_get::<i64, _>("attempt")? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        last_error: row.try_get("last_error")?,
        scheduled_at: from_ts(row.try_get("scheduled_at")?),
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
    })
}

const SCHEDULE_RUN_SELECT: &str = r#"
    SELECT os.organization_id, os.interval_days,
           s.schedule_id, s.name, s.description, s.type, s.url, s.default_interval_days
    FROM org_schedules os
    JOIN schedules s ON s.schedule_id = os.schedule_id
"#;

const WORK_JOB_COLUMNS: &str = "id, kind, queue, args_json, state, attempt, max_attempts, \
                                last_error, scheduled_at, created_at, updated_at";

/// Rewrite the FTS row for one bookmark from its current table row.
async fn reindex_fts(tx: &mut Transaction<'_, Sqlite>, url_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM url_store_fts WHERE url_id = ?")
        .bind(url_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO url_store_fts (url_id, title, excerpt, full_text)
        SELECT id, title, excerpt, full_text FROM url_store WHERE id = ?
        "#,
    )
    .bind(url_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_bookmark(&self, bookmark: &Bookmark) -> Result<InsertOutcome<String>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO url_store (id, url, domain, title, excerpt, image_small, image_large,
                                   accent_color, full_text, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&bookmark.id)
        .bind(&bookmark.url)
        .bind(&bookmark.domain)
        .bind(&bookmark.title)
        .bind(&bookmark.excerpt)
        .bind(&bookmark.image_small)
        .bind(&bookmark.image_large)
        .bind(&bookmark.accent_color)
        .bind(&bookmark.full_text)
        .bind(bookmark.status.as_str())
        .bind(bookmark.created_at.timestamp())
        .bind(bookmark.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let existing: String = sqlx::query_scalar("SELECT id FROM url_store WHERE url = ?")
                .bind(&bookmark.url)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(InsertOutcome::AlreadyExists(existing));
        }

        reindex_fts(&mut tx, &bookmark.id).await?;
        tx.commit().await?;
        Ok(InsertOutcome::Inserted(bookmark.id.clone()))
    }

    async fn bookmark_by_url(&self, url: &str) -> Result<Option<Bookmark>> {
        let row = sqlx::query("SELECT * FROM url_store WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_bookmark).transpose()
    }

    async fn bookmark_by_id(&self, id: &str) -> Result<Option<Bookmark>> {
        let row = sqlx::query("SELECT * FROM url_store WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_bookmark).transpose()
    }

    async fn update_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE url_store SET
                domain = COALESCE(NULLIF(?, ''), domain),
                title = COALESCE(NULLIF(?, ''), title),
                excerpt = COALESCE(NULLIF(?, ''), excerpt),
                image_small = COALESCE(NULLIF(?, ''), image_small),
                image_large = COALESCE(NULLIF(?, ''), image_large),
                accent_color = COALESCE(NULLIF(?, ''), accent_color),
                full_text = COALESCE(NULLIF(?, ''), full_text),
                status = CASE WHEN status = 'COMPLETE' THEN status ELSE ? END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&bookmark.domain)
        .bind(&bookmark.title)
        .bind(&bookmark.excerpt)
        .bind(&bookmark.image_small)
        .bind(&bookmark.image_large)
        .bind(&bookmark.accent_color)
        .bind(&bookmark.full_text)
        .bind(bookmark.status.as_str())
        .bind(Utc::now().timestamp())
        .bind(&bookmark.id)
        .execute(&mut *tx)
        .await?;

        reindex_fts(&mut tx, &bookmark.id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_relation(
        &self,
        org: &str,
        url_id: &str,
    ) -> Result<InsertOutcome<UrlOrganization>> {
        let now = Utc::now();
        let relation = UrlOrganization {
            id: ids::new_id(ids::URL_ORG),
            url_id: url_id.to_string(),
            organization_id: org.to_string(),
            status: RelationStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO url_organizations (id, url_id, organization_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&relation.id)
        .bind(&relation.url_id)
        .bind(&relation.organization_id)
        .bind(relation.status.as_str())
        .bind(now.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted(relation)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // A soft-deleted link is revived rather than duplicated
                self.set_relation_status(org, url_id, RelationStatus::Active)
                    .await?;
                let existing = self
                    .relation_for(org, url_id)
                    .await?
                    .ok_or_else(|| anyhow!("relation for {} disappeared after conflict", url_id))?;
                Ok(InsertOutcome::AlreadyExists(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn relation_for(&self, org: &str, url_id: &str) -> Result<Option<UrlOrganization>> {
        let row = sqlx::query(
            "SELECT * FROM url_organizations WHERE organization_id = ? AND url_id = ?",
        )
        .bind(org)
        .bind(url_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_relation).transpose()
    }

    async fn set_relation_status(
        &self,
        org: &str,
        url_id: &str,
        status: RelationStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE url_organizations SET status = ?, updated_at = ?
            WHERE organization_id = ? AND url_id = ? AND status != ?
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(org)
        .bind(url_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_queued(&self, org: &str, url: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO job_queue (id, org_id, job_id, job_data, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(org_id, job_data) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(ids::new_id(ids::JOB_QUEUE))
        .bind(org)
        .bind(ids::new_id(ids::JOB))
        .bind(url)
        .bind(JobStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_job_status(&self, org: &str, url: &str, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE job_queue SET status = ?, updated_at = ? WHERE org_id = ? AND job_data = ?")
            .bind(status.as_str())
            .bind(Utc::now().timestamp())
            .bind(org)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn job_entry(&self, org: &str, url: &str) -> Result<Option<JobQueueEntry>> {
        let row = sqlx::query("SELECT * FROM job_queue WHERE org_id = ? AND job_data = ?")
            .bind(org)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job_entry).transpose()
    }

    async fn status_counts(&self, org: &str) -> Result<BTreeMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM job_queue WHERE org_id = ? GROUP BY status",
        )
        .bind(org)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in &rows {
            counts.insert(row.try_get::<String, _>("status")?, row.try_get("n")?);
        }
        Ok(counts)
    }

    async fn pending_older_than(
        &self,
        org: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobQueueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM job_queue
            WHERE org_id = ? AND status IN (?, ?) AND updated_at < ?
            ORDER BY created_at
            "#,
        )
        .bind(org)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Queued.as_str())
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job_entry).collect()
    }

    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules (schedule_id, name, description, type, url, default_interval_days)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(schedule_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                type = excluded.type,
                url = excluded.url,
                default_interval_days = excluded.default_interval_days
            "#,
        )
        .bind(&schedule.schedule_id)
        .bind(&schedule.name)
        .bind(&schedule.description)
        .bind(schedule.schedule_type.as_str())
        .bind(&schedule.url)
        .bind(schedule.default_interval_days)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn schedules(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM schedules ORDER BY schedule_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_schedule).collect()
    }

    async fn subscribe_org_schedule(
        &self,
        org: &str,
        schedule_id: &str,
        interval_days: Option<i64>,
    ) -> Result<OrgSchedule> {
        let default_interval: Option<i64> = sqlx::query_scalar(
            "SELECT default_interval_days FROM schedules WHERE schedule_id = ?",
        )
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(default_interval) = default_interval else {
            bail!("unknown schedule '{}'", schedule_id);
        };

        let subscription = OrgSchedule {
            organization_id: org.to_string(),
            schedule_id: schedule_id.to_string(),
            status: ScheduleStatus::Active,
            interval_days: interval_days.unwrap_or(default_interval),
        };

        sqlx::query(
            r#"
            INSERT INTO org_schedules (organization_id, schedule_id, status, interval_days)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(organization_id, schedule_id) DO UPDATE SET
                status = excluded.status,
                interval_days = excluded.interval_days
            "#,
        )
        .bind(&subscription.organization_id)
        .bind(&subscription.schedule_id)
        .bind(subscription.status.as_str())
        .bind(subscription.interval_days)
        .execute(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn set_org_schedule_status(
        &self,
        org: &str,
        schedule_id: &str,
        status: ScheduleStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE org_schedules SET status = ? WHERE organization_id = ? AND schedule_id = ?",
        )
        .bind(status.as_str())
        .bind(org)
        .bind(schedule_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn org_schedules(&self, org: &str) -> Result<Vec<OrgSchedule>> {
        let rows = sqlx::query(
            "SELECT * FROM org_schedules WHERE organization_id = ? ORDER BY schedule_id",
        )
        .bind(org)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_org_schedule).collect()
    }

    async fn active_org_schedules(&self, interval_days: i64) -> Result<Vec<ScheduleRun>> {
        let sql = format!(
            "{SCHEDULE_RUN_SELECT} WHERE os.status = 'ACTIVE' AND os.interval_days = ? \
             ORDER BY os.organization_id, s.schedule_id"
        );
        let rows = sqlx::query(&sql)
            .bind(interval_days)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_schedule_run).collect()
    }

    async fn org_schedules_by_ids(
        &self,
        org: &str,
        schedule_ids: &[String],
    ) -> Result<Vec<ScheduleRun>> {
        if schedule_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; schedule_ids.len()].join(", ");
        let sql = format!(
            "{SCHEDULE_RUN_SELECT} WHERE os.status = 'ACTIVE' AND os.organization_id = ? \
             AND os.schedule_id IN ({placeholders}) ORDER BY s.schedule_id"
        );

        let mut query = sqlx::query(&sql).bind(org);
        for id in schedule_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_schedule_run).collect()
    }

    async fn search_bookmarks(
        &self,
        org: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SearchResult>> {
        let Some(expression) = fts_expression(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT u.id, u.url, u.title, u.excerpt, u.domain, url_store_fts.rank AS rank
            FROM url_store_fts
            JOIN url_store u ON u.id = url_store_fts.url_id
            JOIN url_organizations o ON o.url_id = u.id
            WHERE url_store_fts MATCH ?
              AND o.organization_id = ?
              AND o.status = 'ACTIVE'
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(expression)
        .bind(org)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let rank: f64 = row.try_get("rank")?;
                Ok(SearchResult {
                    url_id: row.try_get("id")?,
                    url: row.try_get("url")?,
                    title: row.try_get("title")?,
                    excerpt: row.try_get("excerpt")?,
                    domain: row.try_get("domain")?,
                    score: -rank, // negate so higher = better
                })
            })
            .collect()
    }

    async fn enqueue_work(&self, job: &WorkJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO work_jobs (id, kind, queue, args_json, state, attempt, max_attempts,
                                   last_error, scheduled_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.kind)
        .bind(&job.queue)
        .bind(&job.args_json)
        .bind(job.state.as_str())
        .bind(job.attempt as i64)
        .bind(job.max_attempts as i64)
        .bind(&job.last_error)
        .bind(job.scheduled_at.timestamp())
        .bind(job.created_at.timestamp())
        .bind(job.updated_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_work(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<WorkJob>> {
        // Single UPDATE so two workers can never claim the same row
        let sql = format!(
            r#"
            UPDATE work_jobs
            SET state = 'running', attempt = attempt + 1, updated_at = ?
            WHERE id = (
                SELECT id FROM work_jobs
                WHERE queue = ? AND state IN ('available', 'retryable') AND scheduled_at <= ?
                ORDER BY scheduled_at, created_at
                LIMIT 1
            )
            RETURNING {WORK_JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(now.timestamp())
            .bind(queue)
            .bind(now.timestamp())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_work_job).transpose()
    }

    async fn complete_work(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE work_jobs SET state = ?, updated_at = ? WHERE id = ?")
            .bind(WorkState::Completed.as_str())
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_work(&self, id: &str, error: &str, retry_at: Option<DateTime<Utc>>) -> Result<()> {
        let state = if retry_at.is_some() {
            WorkState::Retryable
        } else {
            WorkState::Discarded
        };
        sqlx::query(
            r#"
            UPDATE work_jobs
            SET state = ?, last_error = ?, scheduled_at = COALESCE(?, scheduled_at), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(state.as_str())
        .bind(error)
        .bind(retry_at.map(|t| t.timestamp()))
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rescue_work(&self, queue: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE work_jobs
            SET state = CASE WHEN attempt < max_attempts THEN 'available' ELSE 'discarded' END,
                last_error = ?, scheduled_at = ?, updated_at = ?
            WHERE queue = ? AND state = 'running' AND updated_at < ?
            "#,
        )
        .bind(RESCUED_ERROR)
        .bind(now)
        .bind(now)
        .bind(queue)
        .bind(cutoff.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn work_job(&self, id: &str) -> Result<Option<WorkJob>> {
        let sql = format!("SELECT {WORK_JOB_COLUMNS} FROM work_jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_work_job).transpose()
    }
}
