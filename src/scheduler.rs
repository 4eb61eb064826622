//! Daily, weekly, and monthly discovery cadence.
//!
//! Each interval gets its own timer task so a slow monthly run never
//! delays the daily one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::config::DiscoveryConfig;
use crate::discovery::Discoverer;

/// Intervals, in days, that schedules can run at.
pub const INTERVALS: [i64; 3] = [1, 7, 30];

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub struct DiscoveryScheduler {
    discoverer: Arc<Discoverer>,
    run_on_start: bool,
}

impl DiscoveryScheduler {
    pub fn new(discoverer: Arc<Discoverer>, config: &DiscoveryConfig) -> Self {
        Self {
            discoverer,
            run_on_start: config.run_on_start,
        }
    }

    /// Run every interval's timer until `shutdown` becomes true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let handles: Vec<_> = INTERVALS
            .iter()
            .map(|&days| {
                let discoverer = self.discoverer.clone();
                let shutdown = shutdown.clone();
                let run_on_start = self.run_on_start;
                tokio::spawn(tick_loop(discoverer, days, run_on_start, shutdown))
            })
            .collect();

        for handle in handles {
            handle.await.context("scheduler task panicked")?;
        }
        Ok(())
    }
}

async fn tick_loop(
    discoverer: Arc<Discoverer>,
    days: i64,
    run_on_start: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = DAY * days as u32;
    let start = if run_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_days = days, run_on_start, "discovery schedule armed");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match discoverer.run_schedules(days).await {
                    Ok(found) => info!(
                        interval_days = days,
                        orgs = found.len(),
                        urls = found.iter().map(|o| o.urls.len()).sum::<usize>(),
                        "discovery run finished"
                    ),
                    Err(e) => error!(interval_days = days, error = %format!("{e:#}"), "discovery run failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(interval_days = days, "discovery schedule stopped");
}
