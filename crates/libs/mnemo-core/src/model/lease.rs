//! Distributed sync leases keyed by `(repo_id, job_type)`.
//!
//! `claim` is a single upsert whose conflict arm only fires when the
//! held lease has expired, so at most one worker owns a pair at any
//! instant (I4). A lease at exactly `expires_at == now` may be stolen.
//! `renew` and `release` require the matching `worker_id`; a failed renew
//! means the lease was lost and the owner must abort in-flight writes for
//! the pair.

use crate::model::ModelManager;
use crate::time::{now_z, to_z};
use crate::Result;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub repo_id: i64,
    pub job_type: String,
    pub worker_id: String,
    pub acquired_at: String,
    pub expires_at: String,
}

pub struct LeaseBmc;

impl LeaseBmc {
    /// Attempt to claim the pair. Returns false immediately when another
    /// worker holds an unexpired lease (no blocking wait).
    pub async fn claim(
        mm: &ModelManager,
        repo_id: i64,
        job_type: &str,
        worker_id: &str,
        lease_seconds: i64,
    ) -> Result<bool> {
        let db = mm.db();
        let now = Utc::now();
        let acquired_at = to_z(now);
        let expires_at = to_z(now + Duration::seconds(lease_seconds));

        let stmt = db
            .prepare(
                "INSERT INTO sync_leases (repo_id, job_type, worker_id, acquired_at, expires_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(repo_id, job_type) DO UPDATE SET
                   worker_id = excluded.worker_id,
                   acquired_at = excluded.acquired_at,
                   expires_at = excluded.expires_at
                 WHERE sync_leases.expires_at <= excluded.acquired_at",
            )
            .await?;
        let changed = stmt
            .execute((
                repo_id,
                job_type,
                worker_id,
                acquired_at.as_str(),
                expires_at.as_str(),
            ))
            .await?;
        Ok(changed > 0)
    }

    /// Extend a held lease. Fails (returns false) when the lease expired
    /// or belongs to someone else; callers must treat that as lost
    /// ownership.
    pub async fn renew(
        mm: &ModelManager,
        repo_id: i64,
        job_type: &str,
        worker_id: &str,
        lease_seconds: i64,
    ) -> Result<bool> {
        let db = mm.db();
        let now = Utc::now();
        let expires_at = to_z(now + Duration::seconds(lease_seconds));
        let stmt = db
            .prepare(
                "UPDATE sync_leases SET expires_at = ?
                 WHERE repo_id = ? AND job_type = ? AND worker_id = ? AND expires_at > ?",
            )
            .await?;
        let changed = stmt
            .execute((
                expires_at.as_str(),
                repo_id,
                job_type,
                worker_id,
                to_z(now).as_str(),
            ))
            .await?;
        Ok(changed > 0)
    }

    /// Delete iff the worker still owns the lease.
    pub async fn release(
        mm: &ModelManager,
        repo_id: i64,
        job_type: &str,
        worker_id: &str,
    ) -> Result<bool> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "DELETE FROM sync_leases
                 WHERE repo_id = ? AND job_type = ? AND worker_id = ?",
            )
            .await?;
        let changed = stmt.execute((repo_id, job_type, worker_id)).await?;
        Ok(changed > 0)
    }

    pub async fn get(mm: &ModelManager, repo_id: i64, job_type: &str) -> Result<Option<Lease>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, job_type, worker_id, acquired_at, expires_at
                 FROM sync_leases WHERE repo_id = ? AND job_type = ?",
            )
            .await?;
        let mut rows = stmt.query((repo_id, job_type)).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Lease {
                repo_id: row.get(0)?,
                job_type: row.get(1)?,
                worker_id: row.get(2)?,
                acquired_at: row.get(3)?,
                expires_at: row.get(4)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// Count of unexpired leases for a pair; used by property tests to
    /// assert I4.
    pub async fn active_count(mm: &ModelManager, repo_id: i64, job_type: &str) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT COUNT(*) FROM sync_leases
                 WHERE repo_id = ? AND job_type = ? AND expires_at > ?",
            )
            .await?;
        let mut rows = stmt.query((repo_id, job_type, now_z().as_str())).await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Ok(0)
        }
    }
}

/// Generate a worker id: `<hostname16>-<pid>-<uuid8>`.
pub fn generate_worker_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let hostname: String = hostname.chars().take(16).collect();
    let pid = std::process::id();
    let short_uuid: String = uuid::Uuid::new_v4().to_string().chars().take(8).collect();
    format!("{hostname}-{pid}-{short_uuid}")
}
