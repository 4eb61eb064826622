mod common;

use std::time::Duration;

use chrono::Utc;
use common::{harness, light_page, test_config, FakeFetcher, FakeRenderer, Harness};
use linkwell::config::DiscoveryConfig;
use linkwell::discovery::default_schedules;
use linkwell::models::JobStatus;
use linkwell::scheduler::DiscoveryScheduler;
use linkwell::store::Store;
use linkwell::worker::URL_QUEUE;

const HN: &str = "https://news.ycombinator.com/";

const FRONT_PAGE: &str = r#"<html><body><table>
    <tr class="athing submission"><td><span class="titleline">
        <a href="https://blog.example.com/post">A post</a>
    </span></td></tr>
    <tr class="athing submission"><td><span class="titleline">
        <a href="https://tools.example.com/">A tool</a>
    </span></td></tr>
    <tr class="athing submission"><td><span class="titleline">
        <a href="https://blog.example.com/post">Duplicate</a>
    </span></td></tr>
</table></body></html>"#;

fn discovery_harness() -> Harness {
    harness(
        test_config(),
        FakeFetcher::new()
            .page(HN, FRONT_PAGE)
            .page("https://blog.example.com/post", &light_page("Post"))
            .page("https://tools.example.com/", &light_page("Tool")),
        FakeRenderer::new(),
    )
}

async fn install_schedules(h: &Harness) {
    for schedule in default_schedules() {
        h.store.upsert_schedule(&schedule).await.unwrap();
    }
}

#[tokio::test]
async fn test_play_dispatches_discovered_urls() {
    let h = discovery_harness();
    install_schedules(&h).await;
    h.store
        .subscribe_org_schedule("org_1", "sch_hn_front", None)
        .await
        .unwrap();

    let found = h
        .app
        .discoverer
        .play_schedules("org_1", &["sch_hn_front".to_string()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].urls,
        vec!["https://blog.example.com/post", "https://tools.example.com/"]
    );

    h.app.workers.drain().await.unwrap();
    let entry = h
        .app
        .ingestor
        .job_queue()
        .entry("org_1", "https://tools.example.com/")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, JobStatus::Complete);
    assert!(h
        .store
        .bookmark_by_url("https://blog.example.com/post")
        .await
        .unwrap()
        .unwrap()
        .is_complete());
}

#[tokio::test]
async fn test_play_ignores_unsubscribed_schedules() {
    let h = discovery_harness();
    install_schedules(&h).await;

    let found = h
        .app
        .discoverer
        .play_schedules("org_1", &["sch_hn_front".to_string()])
        .await
        .unwrap();
    assert!(found.is_empty());
    assert!(h.store.claim_work(URL_QUEUE, Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_source_contributes_nothing() {
    let h = discovery_harness();
    install_schedules(&h).await;
    // GitHub trending is not served by the fake fetcher.
    h.store
        .subscribe_org_schedule("org_1", "sch_gh_trending", None)
        .await
        .unwrap();
    h.store
        .subscribe_org_schedule("org_1", "sch_hn_front", None)
        .await
        .unwrap();
    h.store
        .subscribe_org_schedule("org_2", "sch_gh_trending", None)
        .await
        .unwrap();

    let found = h.app.discoverer.run_schedules(1).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].organization_id, "org_1");
    assert_eq!(found[0].urls.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_daily_schedules_after_a_day() {
    let h = discovery_harness();
    install_schedules(&h).await;
    h.store
        .subscribe_org_schedule("org_1", "sch_hn_front", None)
        .await
        .unwrap();

    let scheduler = DiscoveryScheduler::new(
        h.app.discoverer.clone(),
        &DiscoveryConfig {
            enabled: true,
            run_on_start: false,
        },
    );
    let (tx, rx) = tokio::sync::watch::channel(false);
    let running = tokio::spawn(async move { scheduler.run(rx).await });

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.store.claim_work(URL_QUEUE, Utc::now()).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
    let job = h.store.claim_work(URL_QUEUE, Utc::now()).await.unwrap();
    assert!(job.is_some());

    tx.send(true).unwrap();
    running.await.unwrap().unwrap();
}
