//! Opaque prefixed identifiers.

/// Bookmark rows.
pub const URL: &str = "url";
/// Organization relation rows.
pub const URL_ORG: &str = "url_org";
/// Job queue rows.
pub const JOB_QUEUE: &str = "jq";
/// Logical job ids recorded on job queue rows.
pub const JOB: &str = "job";
/// Persisted work-queue jobs.
pub const WORK: &str = "wk";
/// Discovery schedules.
pub const SCHEDULE: &str = "sch";

/// Returns `"{prefix}_{uuid}"` with the hyphens removed.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}
