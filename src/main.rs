//! # linkwell CLI
//!
//! ## Usage
//!
//! ```bash
//! linkwell --config ./config/linkwell.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `linkwell init` | Create the SQLite database and run schema migrations |
//! | `linkwell add <url> --org <org>` | Save one bookmark and render it |
//! | `linkwell bulk --org <org> <urls…>` | Queue many URLs for ingestion |
//! | `linkwell import <file> --org <org>` | Queue every link of a browser bookmark export |
//! | `linkwell reindex <id> --org <org>` | Re-fetch and re-render one bookmark |
//! | `linkwell delete <ids…> --org <org>` | Remove bookmarks from an organization |
//! | `linkwell status --org <org>` | Job queue counts, re-driving stale entries |
//! | `linkwell search "<query>" --org <org>` | Search an organization's bookmarks |
//! | `linkwell schedule …` | Manage and run discovery schedules |
//! | `linkwell work` | Run the worker pool and discovery scheduler |
//! | `linkwell serve` | `work` plus the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! linkwell init
//! linkwell schedule add --defaults
//! linkwell schedule subscribe sch_hn_front --org acme
//! linkwell bulk --org acme --file urls.txt --run
//! linkwell search "tokio runtime" --org acme
//! linkwell serve
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use linkwell::app::{self, App};
use linkwell::config::{self, Config};
use linkwell::discovery::default_schedules;
use linkwell::dispatcher::BulkReceipt;
use linkwell::ids;
use linkwell::import;
use linkwell::logging;
use linkwell::migrate;
use linkwell::models::{Schedule, ScheduleStatus, ScheduleType};
use linkwell::scheduler::INTERVALS;
use linkwell::search;
use linkwell::server;
use linkwell::stats;

/// linkwell: bookmark ingestion with light fetch, full render, and
/// scheduled discovery.
#[derive(Parser)]
#[command(name = "linkwell", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/linkwell.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Save one URL for an organization.
    ///
    /// Prints the light-fetched bookmark, then waits for the full render.
    Add {
        url: String,
        #[arg(long)]
        org: String,
    },

    /// Queue URLs for background ingestion.
    Bulk {
        #[arg(long)]
        org: String,
        /// URLs to submit.
        urls: Vec<String>,
        /// Read URLs from a file, one per line.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Submit in reverse order.
        #[arg(long)]
        reverse: bool,
        /// Process the queue in this process before exiting.
        #[arg(long)]
        run: bool,
    },

    /// Import a browser bookmark export (Netscape HTML format).
    Import {
        file: PathBuf,
        #[arg(long)]
        org: String,
        #[arg(long)]
        reverse: bool,
        #[arg(long)]
        run: bool,
    },

    /// Re-fetch and re-render a saved bookmark.
    Reindex {
        /// Bookmark id (`url_…`).
        id: String,
        #[arg(long)]
        org: String,
    },

    /// Remove bookmarks from an organization.
    ///
    /// Only the organization's link is marked deleted; the stored page stays
    /// shared with other organizations and comes back on resubmission.
    Delete {
        /// Bookmark ids (`url_…`).
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        org: String,
    },

    /// Show job queue counts and resubmit stale entries.
    Status {
        #[arg(long)]
        org: String,
    },

    /// Full-text search over an organization's bookmarks.
    Search {
        query: String,
        #[arg(long)]
        org: String,
    },

    /// Discovery schedules.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Run the worker pool and discovery scheduler until Ctrl-C.
    Work,

    /// Run the worker pool, discovery scheduler, and HTTP API until Ctrl-C.
    Serve,
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Define a schedule, or install the built-in ones with `--defaults`.
    Add {
        #[arg(long)]
        defaults: bool,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// GH_TRENDING, HN_TRENDING, GH_STARRED_REPO, or PH_LEADERBOARD.
        #[arg(long = "type")]
        schedule_type: Option<String>,
        /// Source URL, or the username for GH_STARRED_REPO.
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value_t = 1)]
        interval: i64,
    },
    /// Opt an organization into a schedule.
    Subscribe {
        schedule_id: String,
        #[arg(long)]
        org: String,
        /// Override the schedule's default interval (1, 7, or 30 days).
        #[arg(long)]
        interval: Option<i64>,
    },
    /// Opt an organization out of a schedule.
    Unsubscribe {
        schedule_id: String,
        #[arg(long)]
        org: String,
    },
    /// List schedules, or an organization's subscriptions with `--org`.
    List {
        #[arg(long)]
        org: Option<String>,
    },
    /// Run an organization's subscribed schedules now.
    Play {
        #[arg(long)]
        org: String,
        #[arg(required = true)]
        schedule_ids: Vec<String>,
        #[arg(long)]
        run: bool,
    },
    /// Run every active subscription at an interval now.
    Run {
        #[arg(long)]
        interval: i64,
        #[arg(long)]
        run: bool,
    },
}

fn check_interval(days: i64) -> Result<i64> {
    if !INTERVALS.contains(&days) {
        bail!("interval must be one of {:?} days, got {}", INTERVALS, days);
    }
    Ok(days)
}

fn print_receipt(receipt: &BulkReceipt) {
    println!("accepted: {}", receipt.accepted);
    println!("jobs: {}", receipt.jobs.len());
    for rejected in &receipt.rejected {
        println!("  rejected: {}", rejected);
    }
}

/// Process queued jobs in-process when `run` is set.
async fn maybe_drain(app: &App, run: bool) -> Result<()> {
    if run {
        let claimed = app.workers.drain().await?;
        println!("processed {} jobs", claimed);
    } else {
        println!("queued; run `linkwell work` to process");
    }
    Ok(())
}

fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn schedule_command(app: &App, action: ScheduleAction) -> Result<()> {
    match action {
        ScheduleAction::Add {
            defaults,
            id,
            name,
            description,
            schedule_type,
            url,
            interval,
        } => {
            let schedules = if defaults {
                default_schedules()
            } else {
                let (Some(name), Some(schedule_type), Some(url)) = (name, schedule_type, url)
                else {
                    bail!("--name, --type and --url are required unless --defaults is given");
                };
                vec![Schedule {
                    schedule_id: id.unwrap_or_else(|| ids::new_id(ids::SCHEDULE)),
                    name,
                    description,
                    schedule_type: schedule_type.parse::<ScheduleType>()?,
                    url,
                    default_interval_days: check_interval(interval)?,
                }]
            };
            for schedule in &schedules {
                app.store.upsert_schedule(schedule).await?;
                println!("{}  {}  {}", schedule.schedule_id, schedule.schedule_type, schedule.name);
            }
        }
        ScheduleAction::Subscribe {
            schedule_id,
            org,
            interval,
        } => {
            let interval = interval.map(check_interval).transpose()?;
            let sub = app
                .store
                .subscribe_org_schedule(&org, &schedule_id, interval)
                .await?;
            println!(
                "{} subscribed to {} every {} days",
                sub.organization_id, sub.schedule_id, sub.interval_days
            );
        }
        ScheduleAction::Unsubscribe { schedule_id, org } => {
            if !app
                .store
                .set_org_schedule_status(&org, &schedule_id, ScheduleStatus::Inactive)
                .await?
            {
                bail!("{} is not subscribed to {}", org, schedule_id);
            }
            println!("{} unsubscribed from {}", org, schedule_id);
        }
        ScheduleAction::List { org: None } => {
            for s in app.store.schedules().await? {
                println!(
                    "{}  {}  every {}d  {}  ({})",
                    s.schedule_id, s.schedule_type, s.default_interval_days, s.url, s.name
                );
            }
        }
        ScheduleAction::List { org: Some(org) } => {
            for s in app.store.org_schedules(&org).await? {
                println!("{}  {}  every {}d", s.schedule_id, s.status, s.interval_days);
            }
        }
        ScheduleAction::Play {
            org,
            schedule_ids,
            run,
        } => {
            let found = app.discoverer.play_schedules(&org, &schedule_ids).await?;
            for org in &found {
                println!("{}: {} urls", org.organization_id, org.urls.len());
            }
            maybe_drain(app, run).await?;
        }
        ScheduleAction::Run { interval, run } => {
            let found = app.discoverer.run_schedules(check_interval(interval)?).await?;
            for org in &found {
                println!("{}: {} urls", org.organization_id, org.urls.len());
            }
            maybe_drain(app, run).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let cfg: Config = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let (app, failures) = App::open(cfg).await?;
    app::spawn_failure_logger(failures);

    match cli.command {
        Commands::Init => unreachable!("handled before opening the store"),
        Commands::Add { url, org } => {
            let view = app.ingestor.submit_single(&url, &org).await?;
            println!("{}  {}", view.bookmark.id, view.bookmark.title);
            println!("  {}", view.bookmark.url);
            if !view.bookmark.excerpt.is_empty() {
                println!("  {}", view.bookmark.excerpt);
            }
            app.ingestor.wait_background().await;
            let status = app
                .ingestor
                .job_queue()
                .entry(&org, &view.bookmark.url)
                .await?
                .map(|e| e.status.to_string())
                .unwrap_or_default();
            println!("  status: {}", status);
        }
        Commands::Bulk {
            org,
            mut urls,
            file,
            reverse,
            run,
        } => {
            if let Some(file) = file {
                urls.extend(read_url_file(&file)?);
            }
            if urls.is_empty() {
                bail!("no URLs given; pass them as arguments or with --file");
            }
            let receipt = app.dispatcher.submit_bulk(&urls, &org, reverse).await?;
            print_receipt(&receipt);
            maybe_drain(&app, run).await?;
        }
        Commands::Import {
            file,
            org,
            reverse,
            run,
        } => {
            let receipt = import::import_file(&app.dispatcher, &file, &org, reverse).await?;
            print_receipt(&receipt);
            maybe_drain(&app, run).await?;
        }
        Commands::Reindex { id, org } => {
            let view = app.ingestor.reindex(&org, &id).await?;
            println!("{}  {}", view.bookmark.id, view.bookmark.title);
            println!("  {} characters of text", view.bookmark.full_text.chars().count());
        }
        Commands::Delete { ids, org } => {
            let deleted = app.ingestor.delete(&org, &ids).await?;
            for id in &ids {
                let outcome = if deleted.contains(id) { "deleted" } else { "not linked" };
                println!("{id}  {outcome}");
            }
        }
        Commands::Status { org } => {
            let report = stats::status_with_recovery(
                app.ingestor.job_queue(),
                &app.dispatcher,
                &org,
                app.config.queue.stale_after(),
            )
            .await?;
            stats::print_status(&org, &report);
        }
        Commands::Search { query, org } => {
            let results = search::search(app.store.as_ref(), &org, &query, &app.config.retrieval).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!("{}. [{:.2}] {}", i + 1, r.score, r.title);
                println!("    {}", r.url);
            }
        }
        Commands::Schedule { action } => schedule_command(&app, action).await?,
        Commands::Work => {
            let shutdown = app::shutdown_on_ctrl_c();
            app.run_background(shutdown).await?;
        }
        Commands::Serve => {
            let shutdown = app::shutdown_on_ctrl_c();
            let background = {
                let app = app.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { app.run_background(shutdown).await })
            };
            server::run_server(app, shutdown).await?;
            background.await??;
        }
    }

    Ok(())
}
