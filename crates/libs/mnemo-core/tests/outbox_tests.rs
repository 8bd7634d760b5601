//! Outbox entry lifecycle tests: enqueue, exclusive claim, retry
//! scheduling, dead-lettering, lease-expiry reclaim, stats.

#[path = "common/mod.rs"]
mod common;

use common::TestContext;
use mnemo_core::model::outbox::{OutboxBmc, OutboxStatus};

async fn enqueue_one(tc: &TestContext) -> i64 {
    OutboxBmc::enqueue(&tc.mm, "team:alpha", "# payload", &"a".repeat(64))
        .await
        .expect("enqueue")
}

#[tokio::test]
async fn enqueue_creates_pending_row() {
    let tc = TestContext::new().await.expect("test context");
    let outbox_id = enqueue_one(&tc).await;

    let entry = OutboxBmc::get(&tc.mm, outbox_id).await.expect("get");
    assert_eq!(entry.status, OutboxStatus::Pending);
    assert_eq!(entry.retry_count, 0);
    assert_eq!(entry.target_space, "team:alpha");
}

#[tokio::test]
async fn claim_is_exclusive_between_workers() {
    let tc = TestContext::new().await.expect("test context");
    let outbox_id = enqueue_one(&tc).await;

    let due = OutboxBmc::select_due(&tc.mm, 10, 5).await.expect("due");
    assert_eq!(due.len(), 1);

    assert!(
        OutboxBmc::claim(&tc.mm, outbox_id, "worker-a", 60, 5)
            .await
            .expect("claim a")
    );
    // Second worker loses the race.
    assert!(
        !OutboxBmc::claim(&tc.mm, outbox_id, "worker-b", 60, 5)
            .await
            .expect("claim b")
    );

    // Claimed rows are no longer due.
    let due = OutboxBmc::select_due(&tc.mm, 10, 5).await.expect("due");
    assert!(due.is_empty());
}

#[tokio::test]
async fn expired_in_progress_row_is_reclaimable() {
    let tc = TestContext::new().await.expect("test context");
    let outbox_id = enqueue_one(&tc).await;

    // Zero-second lease: expired immediately (crashed worker).
    assert!(
        OutboxBmc::claim(&tc.mm, outbox_id, "worker-a", 0, 5)
            .await
            .expect("claim a")
    );
    let due = OutboxBmc::select_due(&tc.mm, 10, 5).await.expect("due");
    assert_eq!(due.len(), 1, "expired in_progress row must be re-claimable");
    assert!(
        OutboxBmc::claim(&tc.mm, outbox_id, "worker-b", 60, 5)
            .await
            .expect("claim b")
    );
}

#[tokio::test]
async fn mark_sent_records_memory_id() {
    let tc = TestContext::new().await.expect("test context");
    let outbox_id = enqueue_one(&tc).await;

    assert!(
        OutboxBmc::claim(&tc.mm, outbox_id, "worker-a", 60, 5)
            .await
            .expect("claim")
    );
    OutboxBmc::mark_sent(&tc.mm, outbox_id, "mem-123")
        .await
        .expect("mark sent");

    let entry = OutboxBmc::get(&tc.mm, outbox_id).await.expect("get");
    assert_eq!(entry.status, OutboxStatus::Sent);
    assert_eq!(entry.last_error.as_deref(), Some("memory_id=mem-123"));
}

#[tokio::test]
async fn failures_backoff_then_dead_letter() {
    let tc = TestContext::new().await.expect("test context");
    let outbox_id = enqueue_one(&tc).await;
    let max_retries = 3;

    for attempt in 1..max_retries {
        let status = OutboxBmc::mark_failed(&tc.mm, outbox_id, "connect refused", max_retries, 0.0, 0.0)
            .await
            .expect("mark failed");
        assert_eq!(status, OutboxStatus::Failed, "attempt {attempt}");
    }

    let status = OutboxBmc::mark_failed(&tc.mm, outbox_id, "connect refused", max_retries, 0.0, 0.0)
        .await
        .expect("final failure");
    assert_eq!(status, OutboxStatus::Dead);

    let entry = OutboxBmc::get(&tc.mm, outbox_id).await.expect("get");
    assert_eq!(entry.retry_count, max_retries);

    // Dead rows never come back.
    let due = OutboxBmc::select_due(&tc.mm, 10, max_retries).await.expect("due");
    assert!(due.is_empty());
}

#[tokio::test]
async fn backoff_doubles_per_attempt() {
    let tc = TestContext::new().await.expect("test context");
    let outbox_id = enqueue_one(&tc).await;

    // base 100s, no jitter: attempt 1 → +100s, attempt 2 → +200s.
    let _ = OutboxBmc::mark_failed(&tc.mm, outbox_id, "x", 10, 100.0, 0.0)
        .await
        .expect("fail 1");
    let first = OutboxBmc::get(&tc.mm, outbox_id).await.expect("get").next_attempt_at;

    let _ = OutboxBmc::mark_failed(&tc.mm, outbox_id, "x", 10, 100.0, 0.0)
        .await
        .expect("fail 2");
    let second = OutboxBmc::get(&tc.mm, outbox_id).await.expect("get").next_attempt_at;

    assert!(second > first, "backoff should push next_attempt_at further out");

    // Neither is due yet.
    let due = OutboxBmc::select_due(&tc.mm, 10, 10).await.expect("due");
    assert!(due.is_empty());
}

#[tokio::test]
async fn stats_aggregate_by_status() {
    let tc = TestContext::new().await.expect("test context");

    let a = OutboxBmc::enqueue(&tc.mm, "team:alpha", "a", &"1".repeat(64))
        .await
        .expect("enqueue a");
    let _b = OutboxBmc::enqueue(&tc.mm, "team:alpha", "b", &"2".repeat(64))
        .await
        .expect("enqueue b");
    OutboxBmc::mark_sent(&tc.mm, a, "mem-1").await.expect("sent");

    let stats = OutboxBmc::stats(&tc.mm).await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.pending, 1);
    assert!(stats.oldest_pending_age_seconds.is_some());
}
