//! Sync-run bookkeeping: one row per lease-holding invocation.

use crate::model::{ModelManager, opt_text};
use crate::time::now_z;
use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    NoData,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::NoData => "no_data",
        }
    }
}

/// Per-run counters, serialized into `counts_json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub fetched: usize,
    pub persisted: usize,
    pub blobs_done: usize,
    pub blobs_failed: usize,
    pub degraded: usize,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrecoverable_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_advance_stopped_at: Option<String>,
}

pub struct SyncRunBmc;

impl SyncRunBmc {
    /// Open a run; called right after the lease is acquired.
    pub async fn start(
        mm: &ModelManager,
        run_id: &str,
        repo_id: i64,
        job_type: &str,
        mode: &str,
        cursor_before: Option<String>,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO sync_runs (run_id, repo_id, job_type, mode, started_at, cursor_before)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .await?;
        stmt.execute((
            run_id,
            repo_id,
            job_type,
            mode,
            now_z().as_str(),
            opt_text(cursor_before),
        ))
        .await?;
        Ok(())
    }

    /// Close a run; called right before the lease is released.
    pub async fn finish(
        mm: &ModelManager,
        run_id: &str,
        status: RunStatus,
        cursor_after: Option<String>,
        counts: &RunCounts,
        error_summary: Option<String>,
        degradation: Option<serde_json::Value>,
    ) -> Result<()> {
        let db = mm.db();
        let counts_json = serde_json::to_string(counts)?;
        let degradation_json = degradation.map(|d| d.to_string());
        let stmt = db
            .prepare(
                "UPDATE sync_runs
                 SET finished_at = ?, status = ?, cursor_after = ?, counts_json = ?,
                     error_summary = ?, degradation_json = ?
                 WHERE run_id = ?",
            )
            .await?;
        stmt.execute((
            now_z().as_str(),
            status.as_str(),
            opt_text(cursor_after),
            counts_json.as_str(),
            opt_text(error_summary),
            opt_text(degradation_json),
            run_id,
        ))
        .await?;
        Ok(())
    }

    pub async fn get_counts(mm: &ModelManager, run_id: &str) -> Result<Option<RunCounts>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT counts_json FROM sync_runs WHERE run_id = ?")
            .await?;
        let mut rows = stmt.query([run_id]).await?;
        if let Some(row) = rows.next().await? {
            let raw: Option<String> = row.get(0)?;
            Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
        } else {
            Ok(None)
        }
    }

    pub async fn get_status(mm: &ModelManager, run_id: &str) -> Result<Option<String>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT status FROM sync_runs WHERE run_id = ?")
            .await?;
        let mut rows = stmt.query([run_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Ok(None)
        }
    }
}
