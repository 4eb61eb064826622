//! Core data models used throughout linkwell.
//!
//! These types represent the bookmarks, organization links, job-queue
//! entries, and discovery schedules that flow through the ingestion
//! pipeline. Status enums are stored as upper-case text columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Implements `as_str`, `Display`, and `FromStr` for a text-backed status enum.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => anyhow::bail!("unknown {} value: '{}'", stringify!($name), other),
                }
            }
        }
    };
}

/// Lifecycle of a shared bookmark record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookmarkStatus {
    Pending,
    Complete,
}

text_enum!(BookmarkStatus { Pending => "PENDING", Complete => "COMPLETE" });

/// Status of an organization's link to a bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationStatus {
    Active,
    Deleted,
}

text_enum!(RelationStatus { Active => "ACTIVE", Deleted => "DELETED" });

/// Processing status of one (organization, URL) ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Complete,
    Declined,
    Failed,
}

text_enum!(JobStatus {
    Pending => "PENDING",
    Queued => "QUEUED",
    Processing => "PROCESSING",
    Complete => "COMPLETE",
    Declined => "DECLINED",
    Failed => "FAILED",
});

/// The kind of source a discovery schedule scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    /// Code-hosting trending repositories page.
    GhTrending,
    /// News aggregator front page.
    HnTrending,
    /// A user's starred repositories (the schedule URL holds the username).
    GhStarredRepo,
    /// Product leaderboard scoped by date.
    PhLeaderboard,
}

text_enum!(ScheduleType {
    GhTrending => "GH_TRENDING",
    HnTrending => "HN_TRENDING",
    GhStarredRepo => "GH_STARRED_REPO",
    PhLeaderboard => "PH_LEADERBOARD",
});

/// Whether an organization's subscription to a schedule is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Active,
    Inactive,
}

text_enum!(ScheduleStatus { Active => "ACTIVE", Inactive => "INACTIVE" });

/// Canonical stored representation of a URL's extracted content.
///
/// One row per URL, shared by every organization that links to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub title: String,
    pub excerpt: String,
    pub image_small: String,
    pub image_large: String,
    pub accent_color: String,
    pub full_text: String,
    pub status: BookmarkStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bookmark {
    /// An empty pending bookmark for `url`, used as the base of a light fetch.
    pub fn pending(url: &str) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            url: url.to_string(),
            domain: String::new(),
            title: String::new(),
            excerpt: String::new(),
            image_small: String::new(),
            image_large: String::new(),
            accent_color: String::new(),
            full_text: String::new(),
            status: BookmarkStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == BookmarkStatus::Complete
    }
}

/// Overwrite `current` with `incoming` only when `incoming` is non-empty.
pub fn merge_nonempty(current: &mut String, incoming: &str) {
    if !incoming.is_empty() {
        *current = incoming.to_string();
    }
}

/// Metadata extracted from static HTML, before it is merged into a [`Bookmark`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeoFragment {
    pub title: String,
    pub excerpt: String,
    pub accent_color: String,
    pub image_small: String,
    pub image_large: String,
}

/// Links an organization to a shared bookmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlOrganization {
    pub id: String,
    pub url_id: String,
    pub organization_id: String,
    pub status: RelationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A bookmark as seen by one organization.
#[derive(Debug, Clone, Serialize)]
pub struct RelationView {
    pub relation: UrlOrganization,
    pub bookmark: Bookmark,
}

/// Audit/status row for one (organization, URL) ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobQueueEntry {
    pub id: String,
    pub org_id: String,
    pub job_id: String,
    pub job_data: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reusable discovery definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: String,
    pub name: String,
    pub description: String,
    pub schedule_type: ScheduleType,
    pub url: String,
    pub default_interval_days: i64,
}

/// An organization's opt-in to a [`Schedule`] with its effective interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgSchedule {
    pub organization_id: String,
    pub schedule_id: String,
    pub status: ScheduleStatus,
    pub interval_days: i64,
}

/// A subscribed schedule joined with its definition, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRun {
    pub organization_id: String,
    pub schedule: Schedule,
    pub interval_days: i64,
}

/// URLs discovered for one organization during a schedule run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgDiscovery {
    pub organization_id: String,
    pub urls: Vec<String>,
}

/// Lifecycle of a persisted work-queue job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    Available,
    Running,
    Completed,
    Retryable,
    Discarded,
}

text_enum!(WorkState {
    Available => "available",
    Running => "running",
    Completed => "completed",
    Retryable => "retryable",
    Discarded => "discarded",
});

/// One unit of work in the persisted queue.
///
/// `attempt` counts claims, so a job that has run once has `attempt == 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkJob {
    pub id: String,
    pub kind: String,
    pub queue: String,
    pub args_json: String,
    pub state: WorkState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A ranked search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub url_id: String,
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub domain: String,
    pub score: f64,
}
