//! Reliability report: outbox and audit aggregates for operators and the
//! HTTP surface.

use mnemo_core::Result;
use mnemo_core::model::ModelManager;
use mnemo_core::model::audit::AuditBmc;
use mnemo_core::model::outbox::OutboxBmc;
use mnemo_core::time::now_z;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct OutboxReportSection {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub avg_retry_count: f64,
    pub oldest_pending_age_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReportSection {
    pub total: i64,
    pub by_action: BTreeMap<String, i64>,
    pub by_reason: BTreeMap<String, i64>,
    pub recent_24h: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReliabilityReport {
    pub ok: bool,
    pub outbox_stats: OutboxReportSection,
    pub audit_stats: AuditReportSection,
    pub generated_at: String,
}

pub async fn build_report(mm: &ModelManager) -> Result<ReliabilityReport> {
    let outbox = OutboxBmc::stats(mm).await?;
    let audit = AuditBmc::stats(mm).await?;

    let mut by_status = BTreeMap::new();
    by_status.insert("pending".to_string(), outbox.pending);
    by_status.insert("in_progress".to_string(), outbox.in_progress);
    by_status.insert("sent".to_string(), outbox.sent);
    by_status.insert("failed".to_string(), outbox.failed);
    by_status.insert("dead".to_string(), outbox.dead);

    let mut by_action = BTreeMap::new();
    by_action.insert("allow".to_string(), audit.allow);
    by_action.insert("redirect".to_string(), audit.redirect);
    by_action.insert("reject".to_string(), audit.reject);

    Ok(ReliabilityReport {
        ok: true,
        outbox_stats: OutboxReportSection {
            total: outbox.total,
            by_status,
            avg_retry_count: outbox.avg_retry_count,
            oldest_pending_age_seconds: outbox.oldest_pending_age_seconds,
        },
        audit_stats: AuditReportSection {
            total: audit.total,
            by_action,
            by_reason: audit.by_reason,
            recent_24h: audit.recent_24h,
        },
        generated_at: now_z(),
    })
}
