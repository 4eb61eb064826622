use chrono::{Duration, Utc};
use linkwell::config::Config;
use linkwell::db;
use linkwell::discovery::default_schedules;
use linkwell::ingest::light_bookmark;
use linkwell::migrate;
use linkwell::models::{BookmarkStatus, JobStatus, ScheduleStatus, WorkJob, WorkState};
use linkwell::store::{InsertOutcome, SqliteStore, Store};
use tempfile::TempDir;

async fn open_store(tmp: &TempDir) -> SqliteStore {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data").join("linkwell.sqlite");
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn work_job(id: &str) -> WorkJob {
    let now = Utc::now();
    WorkJob {
        id: id.to_string(),
        kind: "url_store_process".to_string(),
        queue: "url_fetch".to_string(),
        args_json: r#"{"urls":[],"org_id":"org_1"}"#.to_string(),
        state: WorkState::Available,
        attempt: 0,
        max_attempts: 3,
        last_error: None,
        scheduled_at: now - Duration::seconds(1),
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    migrate::apply(store.pool()).await.unwrap();
    assert!(store.schedules().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bookmark_url_is_unique() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let url = "https://example.com/a";

    let first = light_bookmark(url, "<title>First</title>");
    let second = light_bookmark(url, "<title>Second</title>");
    assert!(store.insert_bookmark(&first).await.unwrap().is_inserted());

    match store.insert_bookmark(&second).await.unwrap() {
        InsertOutcome::AlreadyExists(id) => assert_eq!(id, first.id),
        other => panic!("expected conflict, got {:?}", other),
    }
    let stored = store.bookmark_by_url(url).await.unwrap().unwrap();
    assert_eq!(stored.title, "First");
}

#[tokio::test]
async fn test_update_merges_and_never_regresses() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let mut bookmark = light_bookmark(
        "https://example.com/b",
        r#"<title>Light</title><meta name="description" content="Short">"#,
    );
    store.insert_bookmark(&bookmark).await.unwrap();

    bookmark.title = "Rendered".to_string();
    bookmark.excerpt = String::new();
    bookmark.full_text = "Full article text".to_string();
    bookmark.status = BookmarkStatus::Complete;
    store.update_bookmark(&bookmark).await.unwrap();

    bookmark.status = BookmarkStatus::Pending;
    bookmark.full_text = String::new();
    store.update_bookmark(&bookmark).await.unwrap();

    let stored = store.bookmark_by_id(&bookmark.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Rendered");
    assert_eq!(stored.excerpt, "Short");
    assert_eq!(stored.full_text, "Full article text");
    assert_eq!(stored.status, BookmarkStatus::Complete);
}

#[tokio::test]
async fn test_relation_conflict_returns_existing() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let bookmark = light_bookmark("https://example.com/c", "");
    store.insert_bookmark(&bookmark).await.unwrap();

    let first = store
        .insert_relation("org_1", &bookmark.id)
        .await
        .unwrap()
        .into_inner();
    let again = store.insert_relation("org_1", &bookmark.id).await.unwrap();
    assert!(!again.is_inserted());
    assert_eq!(again.into_inner().id, first.id);

    assert!(store
        .insert_relation("org_2", &bookmark.id)
        .await
        .unwrap()
        .is_inserted());
}

#[tokio::test]
async fn test_job_queue_upsert_resets_status() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let url = "https://example.com/d";

    store.upsert_queued("org_1", url).await.unwrap();
    store
        .set_job_status("org_1", url, JobStatus::Failed)
        .await
        .unwrap();
    store.upsert_queued("org_1", url).await.unwrap();

    let entry = store.job_entry("org_1", url).await.unwrap().unwrap();
    assert_eq!(entry.status, JobStatus::Pending);
    let counts = store.status_counts("org_1").await.unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts.get("PENDING"), Some(&1));

    let stale = store
        .pending_older_than("org_1", Utc::now() + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert!(store
        .pending_older_than("org_1", Utc::now() - Duration::hours(1))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_search_is_scoped_to_organization() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let mut rust = light_bookmark("https://example.com/rust", "<title>Rust async</title>");
    rust.full_text = "Tokio runtime internals and the async executor".to_string();
    let go = light_bookmark("https://example.com/go", "<title>Go channels</title>");
    store.insert_bookmark(&rust).await.unwrap();
    store.insert_bookmark(&go).await.unwrap();
    store.insert_relation("org_1", &rust.id).await.unwrap();
    store.insert_relation("org_1", &go.id).await.unwrap();
    store.insert_relation("org_2", &go.id).await.unwrap();

    let hits = store.search_bookmarks("org_1", "tokio", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].url_id, rust.id);

    assert!(store
        .search_bookmarks("org_2", "tokio", 10)
        .await
        .unwrap()
        .is_empty());
    assert!(store.search_bookmarks("org_1", "  ", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_claim_work_is_exclusive_and_honours_retry_time() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store.enqueue_work(&work_job("wk_1")).await.unwrap();

    let claimed = store
        .claim_work("url_fetch", Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.state, WorkState::Running);
    assert_eq!(claimed.attempt, 1);
    assert!(store.claim_work("url_fetch", Utc::now()).await.unwrap().is_none());

    let retry_at = Utc::now() + Duration::minutes(5);
    store
        .fail_work("wk_1", "render deadline exceeded", Some(retry_at))
        .await
        .unwrap();
    assert!(store.claim_work("url_fetch", Utc::now()).await.unwrap().is_none());

    let later = store
        .claim_work("url_fetch", retry_at + Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(later.attempt, 2);

    store.complete_work("wk_1").await.unwrap();
    let done = store.work_job("wk_1").await.unwrap().unwrap();
    assert_eq!(done.state, WorkState::Completed);
}

#[tokio::test]
async fn test_rescue_releases_jobs_stuck_in_running() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let two_hours_ago = Utc::now() - Duration::hours(2);

    let mut stuck = work_job("wk_stuck");
    stuck.scheduled_at = two_hours_ago - Duration::seconds(1);
    store.enqueue_work(&stuck).await.unwrap();
    let mut spent = work_job("wk_spent");
    spent.scheduled_at = two_hours_ago - Duration::seconds(1);
    spent.max_attempts = 1;
    store.enqueue_work(&spent).await.unwrap();
    store.claim_work("url_fetch", two_hours_ago).await.unwrap().unwrap();
    store.claim_work("url_fetch", two_hours_ago).await.unwrap().unwrap();
    store.enqueue_work(&work_job("wk_fresh")).await.unwrap();
    store.claim_work("url_fetch", Utc::now()).await.unwrap().unwrap();

    let cutoff = Utc::now() - Duration::hours(1);
    assert_eq!(store.rescue_work("url_fetch", cutoff).await.unwrap(), 2);

    let stuck = store.work_job("wk_stuck").await.unwrap().unwrap();
    assert_eq!(stuck.state, WorkState::Available);
    assert_eq!(stuck.attempt, 1);
    assert!(stuck.last_error.is_some());
    let spent = store.work_job("wk_spent").await.unwrap().unwrap();
    assert_eq!(spent.state, WorkState::Discarded);
    let fresh = store.work_job("wk_fresh").await.unwrap().unwrap();
    assert_eq!(fresh.state, WorkState::Running);

    let again = store.claim_work("url_fetch", Utc::now()).await.unwrap().unwrap();
    assert_eq!(again.id, "wk_stuck");
    assert_eq!(again.attempt, 2);
}

#[tokio::test]
async fn test_schedule_subscriptions() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    for schedule in default_schedules() {
        store.upsert_schedule(&schedule).await.unwrap();
    }
    assert_eq!(store.schedules().await.unwrap().len(), 3);

    store
        .subscribe_org_schedule("org_1", "sch_hn_front", None)
        .await
        .unwrap();
    let weekly = store
        .subscribe_org_schedule("org_2", "sch_hn_front", Some(7))
        .await
        .unwrap();
    assert_eq!(weekly.interval_days, 7);
    assert!(store
        .subscribe_org_schedule("org_1", "sch_missing", None)
        .await
        .is_err());

    let daily = store.active_org_schedules(1).await.unwrap();
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].organization_id, "org_1");
    assert_eq!(daily[0].schedule.url, "https://news.ycombinator.com/");

    assert!(store
        .set_org_schedule_status("org_1", "sch_hn_front", ScheduleStatus::Inactive)
        .await
        .unwrap());
    assert!(store.active_org_schedules(1).await.unwrap().is_empty());
    assert!(store
        .org_schedules_by_ids("org_1", &["sch_hn_front".to_string()])
        .await
        .unwrap()
        .is_empty());
}
