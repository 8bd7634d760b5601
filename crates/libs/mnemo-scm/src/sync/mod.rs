//! Sync pipelines.
//!
//! Both sources share the same per-invocation skeleton: claim the
//! `(repo_id, job_type)` lease, open a sync run, load the cursor, select a
//! fetch window, pull events, dedupe and watermark-filter them, persist in
//! `(ts, key)` ascending order, materialize patch blobs per the diff mode,
//! advance the cursor under the strict/best-effort rules, close the run,
//! release the lease.

pub mod gitlab;
pub mod svn;

use mnemo_core::model::sync_run::RunCounts;
use serde::Serialize;

/// Physical job types: one lease/cursor key per semantic task.
pub const JOB_TYPE_SVN: &str = "svn";
pub const JOB_TYPE_GITLAB_COMMITS: &str = "gitlab_commits";
pub const JOB_TYPE_GITLAB_MRS: &str = "gitlab_mrs";

/// Sync mode: whether unrecoverable mid-batch errors stop cursor
/// advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Strict,
    BestEffort,
}

impl SyncMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "strict" => SyncMode::Strict,
            _ => SyncMode::BestEffort,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Strict => "strict",
            SyncMode::BestEffort => "best_effort",
        }
    }
}

/// What one sync invocation reports back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    /// Another worker held the lease; nothing ran.
    pub locked: bool,
    pub skipped: bool,
    pub status: String,
    pub counts: RunCounts,
    pub cursor_before: Option<String>,
    pub cursor_after: Option<String>,
}

impl SyncReport {
    pub fn locked() -> Self {
        SyncReport {
            run_id: String::new(),
            locked: true,
            skipped: true,
            status: "locked".to_string(),
            counts: RunCounts::default(),
            cursor_before: None,
            cursor_after: None,
        }
    }
}
