//! Per-repo sync watermarks.
//!
//! A cursor only ever moves forward. The save path re-states the
//! monotonicity predicate inside the UPDATE's WHERE clause, so two racing
//! workers cannot interleave a read-compare-write and regress the
//! watermark: whichever UPDATE carries the lesser target simply matches
//! zero rows.

use crate::model::{ModelManager, opt_int, opt_text};
use crate::time::now_z;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Stored watermark for one `(repo_id, job_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub repo_id: i64,
    pub job_type: String,
    /// SVN jobs track the last revision number.
    pub last_rev: Option<i64>,
    /// Git jobs track `(ts, sha)` with lexicographic tie-break on sha.
    pub last_commit_sha: Option<String>,
    pub last_commit_ts: Option<String>,
    pub last_sync_at: Option<String>,
    pub last_sync_count: i64,
}

impl Cursor {
    /// Ordering key for git cursors. `(ts, sha)`; an unset cursor sorts
    /// before everything.
    pub fn git_key(&self) -> (String, String) {
        (
            self.last_commit_ts.clone().unwrap_or_default(),
            self.last_commit_sha.clone().unwrap_or_default(),
        )
    }

    /// Human-readable form for sync-run bookkeeping.
    pub fn describe(&self) -> String {
        match (self.last_rev, &self.last_commit_ts, &self.last_commit_sha) {
            (Some(rev), _, _) => format!("r{rev}"),
            (None, Some(ts), Some(sha)) => format!("{ts}@{sha}"),
            _ => "-".to_string(),
        }
    }
}

/// Target for a cursor save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorTarget {
    SvnRev(i64),
    Git { ts: String, sha: String },
}

/// Outcome of a save attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Advanced,
    /// The stored watermark was already >= the target.
    WatermarkUnchanged,
}

pub struct CursorBmc;

impl CursorBmc {
    pub async fn load(mm: &ModelManager, repo_id: i64, job_type: &str) -> Result<Option<Cursor>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, job_type, last_rev, last_commit_sha, last_commit_ts,
                        last_sync_at, last_sync_count
                 FROM sync_cursors WHERE repo_id = ? AND job_type = ?",
            )
            .await?;
        let mut rows = stmt.query((repo_id, job_type)).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Cursor {
                repo_id: row.get(0)?,
                job_type: row.get(1)?,
                last_rev: row.get(2)?,
                last_commit_sha: row.get(3)?,
                last_commit_ts: row.get(4)?,
                last_sync_at: row.get(5)?,
                last_sync_count: row.get(6)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// Save with the monotonicity check (I3) applied transactionally.
    pub async fn save(
        mm: &ModelManager,
        repo_id: i64,
        job_type: &str,
        target: &CursorTarget,
        sync_count: i64,
    ) -> Result<SaveOutcome> {
        let db = mm.db();
        let now = now_z();

        // First writer for the pair wins the insert.
        let (rev, sha, ts) = match target {
            CursorTarget::SvnRev(rev) => (Some(*rev), None, None),
            CursorTarget::Git { ts, sha } => (None, Some(sha.clone()), Some(ts.clone())),
        };
        let stmt = db
            .prepare(
                "INSERT INTO sync_cursors
                   (repo_id, job_type, last_rev, last_commit_sha, last_commit_ts,
                    last_sync_at, last_sync_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(repo_id, job_type) DO NOTHING",
            )
            .await?;
        let inserted = stmt
            .execute((
                repo_id,
                job_type,
                opt_int(rev),
                opt_text(sha.clone()),
                opt_text(ts.clone()),
                now.as_str(),
                sync_count,
            ))
            .await?;
        if inserted > 0 {
            return Ok(SaveOutcome::Advanced);
        }

        // Conditional overwrite: strictly-greater targets only.
        let changed = match target {
            CursorTarget::SvnRev(rev) => {
                let stmt = db
                    .prepare(
                        "UPDATE sync_cursors
                         SET last_rev = ?, last_sync_at = ?, last_sync_count = ?
                         WHERE repo_id = ? AND job_type = ?
                           AND (last_rev IS NULL OR last_rev < ?)",
                    )
                    .await?;
                stmt.execute((*rev, now.as_str(), sync_count, repo_id, job_type, *rev))
                    .await?
            }
            CursorTarget::Git { ts, sha } => {
                let stmt = db
                    .prepare(
                        "UPDATE sync_cursors
                         SET last_commit_ts = ?, last_commit_sha = ?,
                             last_sync_at = ?, last_sync_count = ?
                         WHERE repo_id = ? AND job_type = ?
                           AND (last_commit_ts IS NULL
                                OR last_commit_ts < ?
                                OR (last_commit_ts = ? AND last_commit_sha < ?))",
                    )
                    .await?;
                stmt.execute((
                    ts.as_str(),
                    sha.as_str(),
                    now.as_str(),
                    sync_count,
                    repo_id,
                    job_type,
                    ts.as_str(),
                    ts.as_str(),
                    sha.as_str(),
                ))
                .await?
            }
        };

        if changed > 0 {
            Ok(SaveOutcome::Advanced)
        } else {
            Ok(SaveOutcome::WatermarkUnchanged)
        }
    }
}
