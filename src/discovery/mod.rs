//! Periodic URL discovery.
//!
//! Each [`ScheduleType`] has an adapter that turns a schedule URL into a
//! list of candidate URLs. The [`Discoverer`] runs every subscribed
//! schedule for an interval, groups the URLs by organization, and hands
//! each group to the [`Dispatcher`] like a bulk submission.

pub mod github_stars;
pub mod github_trending;
pub mod hacker_news;
pub mod product_hunt;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::fetcher::PageFetcher;
use crate::models::{OrgDiscovery, Schedule, ScheduleRun, ScheduleType};
use crate::store::Store;

/// Result of one adapter run.
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    Found(Vec<String>),
    Empty,
    /// Source unreachable.
    Failed(String),
}

impl Discovery {
    pub fn from_urls(urls: Vec<String>) -> Self {
        if urls.is_empty() {
            Discovery::Empty
        } else {
            Discovery::Found(urls)
        }
    }

    pub fn into_urls(self) -> Vec<String> {
        match self {
            Discovery::Found(urls) => urls,
            Discovery::Empty | Discovery::Failed(_) => Vec::new(),
        }
    }
}

async fn fetch_page(fetcher: &dyn PageFetcher, url: &str) -> Result<String, Discovery> {
    fetcher
        .fetch_html(url)
        .await
        .map_err(|e| Discovery::Failed(e.to_string()))
}

/// Schedules created by `schedule add --defaults`.
pub fn default_schedules() -> Vec<Schedule> {
    vec![
        Schedule {
            schedule_id: "sch_gh_trending".to_string(),
            name: "GitHub trending".to_string(),
            description: "Trending repositories on GitHub".to_string(),
            schedule_type: ScheduleType::GhTrending,
            url: "https://github.com".to_string(),
            default_interval_days: 1,
        },
        Schedule {
            schedule_id: "sch_hn_front".to_string(),
            name: "Hacker News".to_string(),
            description: "Hacker News front page".to_string(),
            schedule_type: ScheduleType::HnTrending,
            url: "https://news.ycombinator.com/".to_string(),
            default_interval_days: 1,
        },
        Schedule {
            schedule_id: "sch_ph_leaderboard".to_string(),
            name: "Product Hunt leaderboard".to_string(),
            description: "Top products of the previous period".to_string(),
            schedule_type: ScheduleType::PhLeaderboard,
            url: "https://www.producthunt.com/leaderboard".to_string(),
            default_interval_days: 7,
        },
    ]
}

pub struct Discoverer {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn PageFetcher>,
    dispatcher: Dispatcher,
}

impl Discoverer {
    pub fn new(store: Arc<dyn Store>, fetcher: Arc<dyn PageFetcher>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            fetcher,
            dispatcher,
        }
    }

    /// Run the adapter for one subscribed schedule.
    pub async fn discover(&self, run: &ScheduleRun) -> Discovery {
        let fetcher = self.fetcher.as_ref();
        let schedule = &run.schedule;
        match schedule.schedule_type {
            ScheduleType::GhTrending => {
                github_trending::discover(fetcher, &schedule.url, run.interval_days).await
            }
            ScheduleType::HnTrending => hacker_news::discover(fetcher, &schedule.url).await,
            ScheduleType::GhStarredRepo => github_stars::discover(fetcher, &schedule.url).await,
            ScheduleType::PhLeaderboard => {
                product_hunt::discover(fetcher, &schedule.url, run.interval_days).await
            }
        }
    }

    /// Run `runs` and group their URLs per organization, deduplicated in
    /// discovery order. A failing source contributes nothing.
    pub async fn collect(&self, runs: &[ScheduleRun]) -> Vec<OrgDiscovery> {
        let mut by_org: BTreeMap<String, (Vec<String>, HashSet<String>)> = BTreeMap::new();

        for run in runs {
            let discovery = self.discover(run).await;
            match &discovery {
                Discovery::Found(urls) => info!(
                    org = %run.organization_id,
                    schedule = %run.schedule.schedule_id,
                    urls = urls.len(),
                    "schedule discovered urls"
                ),
                Discovery::Empty => info!(
                    org = %run.organization_id,
                    schedule = %run.schedule.schedule_id,
                    "schedule found nothing"
                ),
                Discovery::Failed(reason) => warn!(
                    org = %run.organization_id,
                    schedule = %run.schedule.schedule_id,
                    reason = %reason,
                    "schedule source unreachable"
                ),
            }

            let (urls, seen) = by_org.entry(run.organization_id.clone()).or_default();
            for url in discovery.into_urls() {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }

        by_org
            .into_iter()
            .filter(|(_, (urls, _))| !urls.is_empty())
            .map(|(organization_id, (urls, _))| OrgDiscovery {
                organization_id,
                urls,
            })
            .collect()
    }

    async fn dispatch(&self, discovered: &[OrgDiscovery]) {
        for org in discovered {
            if let Err(e) = self
                .dispatcher
                .submit_bulk(&org.urls, &org.organization_id, false)
                .await
            {
                warn!(org = %org.organization_id, error = %format!("{e:#}"), "failed to dispatch discovered urls");
            }
        }
    }

    /// Run every active subscription at `interval_days` and dispatch the results.
    pub async fn run_schedules(&self, interval_days: i64) -> Result<Vec<OrgDiscovery>> {
        let runs = self.store.active_org_schedules(interval_days).await?;
        info!(interval_days, schedules = runs.len(), "running discovery schedules");
        let discovered = self.collect(&runs).await;
        self.dispatch(&discovered).await;
        Ok(discovered)
    }

    /// Run the named subscriptions of one organization now.
    pub async fn play_schedules(
        &self,
        org: &str,
        schedule_ids: &[String],
    ) -> Result<Vec<OrgDiscovery>> {
        let runs = self.store.org_schedules_by_ids(org, schedule_ids).await?;
        info!(org, schedules = runs.len(), "playing schedules");
        let discovered = self.collect(&runs).await;
        self.dispatch(&discovered).await;
        Ok(discovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_from_urls() {
        assert_eq!(Discovery::from_urls(Vec::new()), Discovery::Empty);
        assert_eq!(
            Discovery::from_urls(vec!["https://a.com".into()]).into_urls(),
            vec!["https://a.com"]
        );
        assert!(Discovery::Failed("down".into()).into_urls().is_empty());
    }

    #[test]
    fn test_default_schedule_ids_are_unique() {
        let schedules = default_schedules();
        let ids: HashSet<_> = schedules.iter().map(|s| &s.schedule_id).collect();
        assert_eq!(ids.len(), schedules.len());
    }
}
