//! Durable outbox for memory writes that failed immediate delivery.
//!
//! Claiming works in two steps: a candidate SELECT picks due rows, then a
//! per-row conditional UPDATE takes ownership. A row whose claim UPDATE
//! matches zero rows belongs to another worker and is skipped, which is
//! the same exclusive-claim property `FOR UPDATE SKIP LOCKED` gives on
//! databases that have it. Rows stuck `in_progress` past their lease
//! expiry are re-claimable (crash safety).

use crate::model::ModelManager;
use crate::time::{now_z, to_z};
use crate::{Error, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    InProgress,
    Sent,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::InProgress => "in_progress",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
            OutboxStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "in_progress" => Ok(OutboxStatus::InProgress),
            "sent" => Ok(OutboxStatus::Sent),
            "failed" => Ok(OutboxStatus::Failed),
            "dead" => Ok(OutboxStatus::Dead),
            other => Err(Error::InvalidInput(format!("invalid outbox status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub outbox_id: i64,
    pub target_space: String,
    pub payload_md: String,
    pub payload_sha: String,
    pub status: OutboxStatus,
    pub retry_count: i64,
    pub next_attempt_at: String,
    pub created_at: String,
    pub last_error: Option<String>,
    pub lease_worker_id: Option<String>,
    pub lease_expires_at: Option<String>,
}

/// Aggregates for the reliability report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboxStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub sent: i64,
    pub failed: i64,
    pub dead: i64,
    pub avg_retry_count: f64,
    pub oldest_pending_age_seconds: Option<i64>,
}

pub struct OutboxBmc;

impl OutboxBmc {
    /// Enqueue a payload after a failed external write. Returns the
    /// `outbox_id` the failure audit must embed.
    pub async fn enqueue(
        mm: &ModelManager,
        target_space: &str,
        payload_md: &str,
        payload_sha: &str,
    ) -> Result<i64> {
        let db = mm.db();
        let now = now_z();
        let stmt = db
            .prepare(
                "INSERT INTO outbox_memory
                   (target_space, payload_md, payload_sha, status, retry_count,
                    next_attempt_at, created_at, updated_at)
                 VALUES (?, ?, ?, 'pending', 0, ?, ?, ?)
                 RETURNING outbox_id",
            )
            .await?;
        let mut rows = stmt
            .query((
                target_space,
                payload_md,
                payload_sha,
                now.as_str(),
                now.as_str(),
                now.as_str(),
            ))
            .await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Err(Error::InvalidInput("failed to enqueue outbox entry".into()))
        }
    }

    /// Rows currently due: `pending|failed` under the retry budget, plus
    /// `in_progress` rows whose worker lease expired.
    pub async fn select_due(
        mm: &ModelManager,
        batch_size: usize,
        max_retries: i64,
    ) -> Result<Vec<OutboxEntry>> {
        let db = mm.db();
        let now = now_z();
        let stmt = db
            .prepare(
                "SELECT outbox_id, target_space, payload_md, payload_sha, status,
                        retry_count, next_attempt_at, created_at, last_error,
                        lease_worker_id, lease_expires_at
                 FROM outbox_memory
                 WHERE (status IN ('pending', 'failed')
                        AND next_attempt_at <= ? AND retry_count < ?)
                    OR (status = 'in_progress' AND lease_expires_at <= ?)
                 ORDER BY outbox_id
                 LIMIT ?",
            )
            .await?;
        let mut rows = stmt
            .query((now.as_str(), max_retries, now.as_str(), batch_size as i64))
            .await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push(Self::from_row(row)?);
        }
        Ok(res)
    }

    /// Take exclusive ownership of one row. False = another worker won.
    pub async fn claim(
        mm: &ModelManager,
        outbox_id: i64,
        worker_id: &str,
        lease_seconds: i64,
        max_retries: i64,
    ) -> Result<bool> {
        let db = mm.db();
        let now = Utc::now();
        let now_s = to_z(now);
        let lease_expires = to_z(now + Duration::seconds(lease_seconds));
        let stmt = db
            .prepare(
                "UPDATE outbox_memory
                 SET status = 'in_progress', lease_worker_id = ?, lease_expires_at = ?,
                     updated_at = ?
                 WHERE outbox_id = ?
                   AND ((status IN ('pending', 'failed')
                         AND next_attempt_at <= ? AND retry_count < ?)
                        OR (status = 'in_progress' AND lease_expires_at <= ?))",
            )
            .await?;
        let changed = stmt
            .execute((
                worker_id,
                lease_expires.as_str(),
                now_s.as_str(),
                outbox_id,
                now_s.as_str(),
                max_retries,
                now_s.as_str(),
            ))
            .await?;
        Ok(changed > 0)
    }

    pub async fn mark_sent(mm: &ModelManager, outbox_id: i64, memory_id: &str) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE outbox_memory
                 SET status = 'sent', last_error = ?, lease_worker_id = NULL,
                     lease_expires_at = NULL, updated_at = ?
                 WHERE outbox_id = ?",
            )
            .await?;
        stmt.execute((
            format!("memory_id={memory_id}").as_str(),
            now_z().as_str(),
            outbox_id,
        ))
        .await?;
        Ok(())
    }

    /// Record a failed delivery attempt: bumps `retry_count`, schedules
    /// the exponential-backoff retry, dead-letters past the budget.
    pub async fn mark_failed(
        mm: &ModelManager,
        outbox_id: i64,
        error: &str,
        max_retries: i64,
        base_backoff_seconds: f64,
        jitter_seconds: f64,
    ) -> Result<OutboxStatus> {
        let entry = Self::get(mm, outbox_id).await?;
        let retry_count = entry.retry_count + 1;

        let (status, next_attempt_at) = if retry_count >= max_retries {
            (OutboxStatus::Dead, now_z())
        } else {
            let backoff =
                base_backoff_seconds * 2f64.powi((retry_count - 1) as i32) + jitter_seconds;
            let next = Utc::now() + Duration::milliseconds((backoff * 1000.0) as i64);
            (OutboxStatus::Failed, to_z(next))
        };

        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE outbox_memory
                 SET status = ?, retry_count = ?, next_attempt_at = ?, last_error = ?,
                     lease_worker_id = NULL, lease_expires_at = NULL, updated_at = ?
                 WHERE outbox_id = ?",
            )
            .await?;
        stmt.execute((
            status.as_str(),
            retry_count,
            next_attempt_at.as_str(),
            error,
            now_z().as_str(),
            outbox_id,
        ))
        .await?;
        Ok(status)
    }

    pub async fn get(mm: &ModelManager, outbox_id: i64) -> Result<OutboxEntry> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT outbox_id, target_space, payload_md, payload_sha, status,
                        retry_count, next_attempt_at, created_at, last_error,
                        lease_worker_id, lease_expires_at
                 FROM outbox_memory WHERE outbox_id = ?",
            )
            .await?;
        let mut rows = stmt.query([outbox_id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::OutboxEntryNotFound(outbox_id))
        }
    }

    pub async fn stats(mm: &ModelManager) -> Result<OutboxStats> {
        let db = mm.db();
        let mut stats = OutboxStats::default();

        let stmt = db
            .prepare(
                "SELECT status, COUNT(*), AVG(retry_count) FROM outbox_memory GROUP BY status",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut weighted_retries = 0.0;
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let avg_retries: Option<f64> = row.get(2)?;
            stats.total += count;
            weighted_retries += avg_retries.unwrap_or(0.0) * count as f64;
            match status.as_str() {
                "pending" => stats.pending = count,
                "in_progress" => stats.in_progress = count,
                "sent" => stats.sent = count,
                "failed" => stats.failed = count,
                "dead" => stats.dead = count,
                _ => {}
            }
        }
        if stats.total > 0 {
            stats.avg_retry_count = weighted_retries / stats.total as f64;
        }

        let stmt = db
            .prepare(
                "SELECT MIN(created_at) FROM outbox_memory WHERE status IN ('pending', 'failed')",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        if let Some(row) = rows.next().await? {
            let oldest: Option<String> = row.get(0)?;
            stats.oldest_pending_age_seconds = oldest
                .and_then(|ts| crate::time::parse_z(&ts))
                .map(|dt| (Utc::now() - dt).num_seconds().max(0));
        }

        Ok(stats)
    }

    fn from_row(row: libsql::Row) -> Result<OutboxEntry> {
        let status_raw: String = row.get(4)?;
        Ok(OutboxEntry {
            outbox_id: row.get(0)?,
            target_space: row.get(1)?,
            payload_md: row.get(2)?,
            payload_sha: row.get(3)?,
            status: OutboxStatus::parse(&status_raw)?,
            retry_count: row.get(5)?,
            next_attempt_at: row.get(6)?,
            created_at: row.get(7)?,
            last_error: row.get(8)?,
            lease_worker_id: row.get(9)?,
            lease_expires_at: row.get(10)?,
        })
    }
}
