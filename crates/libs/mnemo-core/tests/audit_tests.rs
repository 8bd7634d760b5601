//! Write-audit tests: evidence refs round-trip, outbox correlation,
//! report aggregates.

#[path = "common/mod.rs"]
mod common;

use common::TestContext;
use mnemo_core::ids::CorrelationId;
use mnemo_core::model::audit::{AuditAction, AuditBmc, AuditForInsert, EvidenceRefs};

fn failure_insert(payload_sha: &str, outbox_id: i64, corr: &CorrelationId) -> AuditForInsert {
    let mut refs = EvidenceRefs::gateway(corr);
    refs.outbox_id = Some(outbox_id);
    refs.error = Some("connection refused".to_string());
    AuditForInsert {
        actor_user_id: "user-1".to_string(),
        target_space: "team:alpha".to_string(),
        action: AuditAction::Redirect,
        reason: "openmemory_write_failed:network_error".to_string(),
        payload_sha: Some(payload_sha.to_string()),
        evidence_refs: refs,
    }
}

#[tokio::test]
async fn evidence_refs_round_trip() {
    let tc = TestContext::new().await.expect("test context");
    let corr = CorrelationId::new();
    let sha = "c".repeat(64);

    AuditBmc::insert(&tc.mm, failure_insert(&sha, 7, &corr))
        .await
        .expect("insert");

    let rows = AuditBmc::list_by_payload_sha(&tc.mm, &sha).await.expect("list");
    assert_eq!(rows.len(), 1);
    let refs = rows[0].evidence_refs.as_ref().expect("refs");
    assert_eq!(refs.outbox_id, Some(7));
    assert_eq!(refs.source.as_deref(), Some("gateway"));
    assert_eq!(refs.correlation_id.as_deref(), Some(corr.as_str()));
}

#[tokio::test]
async fn degraded_write_pair_shares_outbox_id() {
    let tc = TestContext::new().await.expect("test context");
    let sha = "d".repeat(64);
    let outbox_id = 42;

    // Gateway failure audit, then worker flush audit; independently
    // generated correlation ids.
    let corr1 = CorrelationId::new();
    AuditBmc::insert(&tc.mm, failure_insert(&sha, outbox_id, &corr1))
        .await
        .expect("failure audit");

    let corr2 = CorrelationId::new();
    let mut refs = EvidenceRefs::outbox_worker(&corr2);
    refs.outbox_id = Some(outbox_id);
    refs.memory_id = Some("mem-9".to_string());
    AuditBmc::insert(
        &tc.mm,
        AuditForInsert {
            actor_user_id: "outbox-worker".to_string(),
            target_space: "team:alpha".to_string(),
            action: AuditAction::Allow,
            reason: "outbox_flush_success".to_string(),
            payload_sha: Some(sha.clone()),
            evidence_refs: refs,
        },
    )
    .await
    .expect("flush audit");

    let rows = AuditBmc::list_by_outbox_id(&tc.mm, outbox_id).await.expect("by outbox");
    assert_eq!(rows.len(), 2);
    assert!(rows[0].reason.starts_with("openmemory_write_failed:"));
    assert_eq!(rows[1].reason, "outbox_flush_success");

    // Both correlation ids valid, but independent.
    let c1 = rows[0]
        .evidence_refs
        .as_ref()
        .and_then(|r| r.correlation_id.clone())
        .expect("corr 1");
    let c2 = rows[1]
        .evidence_refs
        .as_ref()
        .and_then(|r| r.correlation_id.clone())
        .expect("corr 2");
    assert!(CorrelationId::is_valid(&c1));
    assert!(CorrelationId::is_valid(&c2));
    assert_ne!(c1, c2);

    // A different outbox id matches nothing.
    let none = AuditBmc::list_by_outbox_id(&tc.mm, 420).await.expect("none");
    assert!(none.is_empty());
}

#[tokio::test]
async fn stats_aggregate_actions_and_reasons() {
    let tc = TestContext::new().await.expect("test context");
    let corr = CorrelationId::new();

    for (action, reason) in [
        (AuditAction::Allow, "policy_passed"),
        (AuditAction::Allow, "policy_passed"),
        (AuditAction::Reject, "policy:unknown_actor"),
    ] {
        AuditBmc::insert(
            &tc.mm,
            AuditForInsert {
                actor_user_id: "user-1".to_string(),
                target_space: "team:alpha".to_string(),
                action,
                reason: reason.to_string(),
                payload_sha: None,
                evidence_refs: EvidenceRefs::gateway(&corr),
            },
        )
        .await
        .expect("insert");
    }

    let stats = AuditBmc::stats(&tc.mm).await.expect("stats");
    assert_eq!(stats.total, 3);
    assert_eq!(stats.allow, 2);
    assert_eq!(stats.reject, 1);
    assert_eq!(stats.by_reason.get("policy_passed"), Some(&2));
    assert_eq!(stats.recent_24h, 3);
}
