//! Append-only write audit.
//!
//! A degraded write produces exactly two rows sharing the same
//! `evidence_refs.outbox_id`: the gateway's `openmemory_write_failed:*`
//! row first, the worker's `outbox_flush_success` row once the payload is
//! delivered (I5). Audit inserts are fatal to the originating request.

use crate::ids::CorrelationId;
use crate::model::{ModelManager, opt_text};
use crate::time::now_z;
use crate::Result;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Allow,
    Redirect,
    Reject,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Allow => "allow",
            AuditAction::Redirect => "redirect",
            AuditAction::Reject => "reject",
        }
    }
}

/// Structured pointers carried by an audit row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceRefs {
    /// Originating component: `gateway`, `outbox_worker`, ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvidenceRefs {
    pub fn gateway(correlation_id: &CorrelationId) -> Self {
        EvidenceRefs {
            source: Some("gateway".to_string()),
            correlation_id: Some(correlation_id.to_string()),
            ..Default::default()
        }
    }

    pub fn outbox_worker(correlation_id: &CorrelationId) -> Self {
        EvidenceRefs {
            source: Some("outbox_worker".to_string()),
            correlation_id: Some(correlation_id.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub audit_id: i64,
    pub actor_user_id: String,
    pub target_space: String,
    pub action: String,
    pub reason: String,
    pub payload_sha: Option<String>,
    pub evidence_refs: Option<EvidenceRefs>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct AuditForInsert {
    pub actor_user_id: String,
    pub target_space: String,
    pub action: AuditAction,
    pub reason: String,
    pub payload_sha: Option<String>,
    pub evidence_refs: EvidenceRefs,
}

/// Aggregates for the reliability report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: i64,
    pub allow: i64,
    pub redirect: i64,
    pub reject: i64,
    pub by_reason: BTreeMap<String, i64>,
    pub recent_24h: i64,
}

pub struct AuditBmc;

impl AuditBmc {
    pub async fn insert(mm: &ModelManager, audit_c: AuditForInsert) -> Result<i64> {
        let db = mm.db();
        let refs_json = serde_json::to_string(&audit_c.evidence_refs)?;
        let stmt = db
            .prepare(
                "INSERT INTO write_audit
                   (actor_user_id, target_space, action, reason, payload_sha,
                    evidence_refs_json, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 RETURNING audit_id",
            )
            .await?;
        let mut rows = stmt
            .query((
                audit_c.actor_user_id.as_str(),
                audit_c.target_space.as_str(),
                audit_c.action.as_str(),
                audit_c.reason.as_str(),
                opt_text(audit_c.payload_sha.clone()),
                refs_json.as_str(),
                now_z().as_str(),
            ))
            .await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Err(crate::Error::InvalidInput("failed to insert audit row".into()))
        }
    }

    pub async fn list_by_payload_sha(mm: &ModelManager, payload_sha: &str) -> Result<Vec<AuditRow>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT audit_id, actor_user_id, target_space, action, reason,
                        payload_sha, evidence_refs_json, created_at
                 FROM write_audit WHERE payload_sha = ? ORDER BY audit_id",
            )
            .await?;
        let mut rows = stmt.query([payload_sha]).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push(Self::from_row(row)?);
        }
        Ok(res)
    }

    /// Audit rows that reference an outbox entry, in insert order.
    pub async fn list_by_outbox_id(mm: &ModelManager, outbox_id: i64) -> Result<Vec<AuditRow>> {
        // SQLite keeps evidence refs as JSON text; the LIKE prefilter keeps
        // the scan cheap, the decode confirms the match.
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT audit_id, actor_user_id, target_space, action, reason,
                        payload_sha, evidence_refs_json, created_at
                 FROM write_audit
                 WHERE evidence_refs_json LIKE ?
                 ORDER BY audit_id",
            )
            .await?;
        let pattern = format!("%\"outbox_id\":{outbox_id}%");
        let mut rows = stmt.query([pattern.as_str()]).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            let parsed = Self::from_row(row)?;
            if parsed
                .evidence_refs
                .as_ref()
                .and_then(|r| r.outbox_id)
                .is_some_and(|id| id == outbox_id)
            {
                res.push(parsed);
            }
        }
        Ok(res)
    }

    pub async fn stats(mm: &ModelManager) -> Result<AuditStats> {
        let db = mm.db();
        let mut stats = AuditStats::default();

        let stmt = db
            .prepare("SELECT action, COUNT(*) FROM write_audit GROUP BY action")
            .await?;
        let mut rows = stmt.query(()).await?;
        while let Some(row) = rows.next().await? {
            let action: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            stats.total += count;
            match action.as_str() {
                "allow" => stats.allow = count,
                "redirect" => stats.redirect = count,
                "reject" => stats.reject = count,
                _ => {}
            }
        }

        let stmt = db
            .prepare("SELECT reason, COUNT(*) FROM write_audit GROUP BY reason ORDER BY reason")
            .await?;
        let mut rows = stmt.query(()).await?;
        while let Some(row) = rows.next().await? {
            let reason: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            stats.by_reason.insert(reason, count);
        }

        let cutoff = crate::time::to_z(Utc::now() - Duration::hours(24));
        let stmt = db
            .prepare("SELECT COUNT(*) FROM write_audit WHERE created_at >= ?")
            .await?;
        let mut rows = stmt.query([cutoff.as_str()]).await?;
        if let Some(row) = rows.next().await? {
            stats.recent_24h = row.get(0)?;
        }

        Ok(stats)
    }

    fn from_row(row: libsql::Row) -> Result<AuditRow> {
        let refs_raw: Option<String> = row.get(6)?;
        Ok(AuditRow {
            audit_id: row.get(0)?,
            actor_user_id: row.get(1)?,
            target_space: row.get(2)?,
            action: row.get(3)?,
            reason: row.get(4)?,
            payload_sha: row.get(5)?,
            evidence_refs: refs_raw.map(|s| serde_json::from_str(&s)).transpose()?,
            created_at: row.get(7)?,
        })
    }
}
