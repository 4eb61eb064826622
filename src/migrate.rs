use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Shared bookmark records, one per URL
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS url_store (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            domain TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            excerpt TEXT NOT NULL DEFAULT '',
            image_small TEXT NOT NULL DEFAULT '',
            image_large TEXT NOT NULL DEFAULT '',
            accent_color TEXT NOT NULL DEFAULT '',
            full_text TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'PENDING',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS url_organizations (
            id TEXT PRIMARY KEY,
            url_id TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(url_id, organization_id),
            FOREIGN KEY (url_id) REFERENCES url_store(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_queue (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            job_id TEXT NOT NULL,
            job_data TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(org_id, job_data)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            schedule_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL,
            url TEXT NOT NULL,
            default_interval_days INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS org_schedules (
            organization_id TEXT NOT NULL,
            schedule_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            interval_days INTEGER NOT NULL,
            UNIQUE(organization_id, schedule_id),
            FOREIGN KEY (schedule_id) REFERENCES schedules(schedule_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Persisted work queue drained by the worker pool
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            queue TEXT NOT NULL,
            args_json TEXT NOT NULL,
            state TEXT NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            last_error TEXT,
            scheduled_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='url_store_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE url_store_fts USING fts5(
                url_id UNINDEXED,
                title,
                excerpt,
                full_text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_url_organizations_org ON url_organizations(organization_id, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_queue_org_status ON job_queue(org_id, status, updated_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_work_jobs_claim ON work_jobs(queue, state, scheduled_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_org_schedules_interval ON org_schedules(interval_days, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
