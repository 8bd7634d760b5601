//! Cursor watermark tests: monotonic advancement, tie-breaks, refusal to
//! move backwards.

#[path = "common/mod.rs"]
mod common;

use common::{TestContext, setup_git_repo, setup_svn_repo};
use mnemo_core::model::cursor::{CursorBmc, CursorTarget, SaveOutcome};

#[tokio::test]
async fn empty_cursor_loads_as_none() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_git_repo(&tc).await;

    let cursor = CursorBmc::load(&tc.mm, repo_id, "gitlab_commits")
        .await
        .expect("load");
    assert!(cursor.is_none());
}

#[tokio::test]
async fn svn_cursor_advances_monotonically() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_svn_repo(&tc).await;

    let outcome = CursorBmc::save(&tc.mm, repo_id, "svn", &CursorTarget::SvnRev(100), 5)
        .await
        .expect("save");
    assert_eq!(outcome, SaveOutcome::Advanced);

    let outcome = CursorBmc::save(&tc.mm, repo_id, "svn", &CursorTarget::SvnRev(102), 2)
        .await
        .expect("save");
    assert_eq!(outcome, SaveOutcome::Advanced);

    // Equal and lesser targets are refused.
    for rev in [102, 101, 1] {
        let outcome = CursorBmc::save(&tc.mm, repo_id, "svn", &CursorTarget::SvnRev(rev), 0)
            .await
            .expect("save");
        assert_eq!(outcome, SaveOutcome::WatermarkUnchanged, "rev {rev}");
    }

    let cursor = CursorBmc::load(&tc.mm, repo_id, "svn")
        .await
        .expect("load")
        .expect("cursor exists");
    assert_eq!(cursor.last_rev, Some(102));
}

#[tokio::test]
async fn git_cursor_orders_by_ts_then_sha() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_git_repo(&tc).await;
    let job = "gitlab_commits";

    let t1 = "2024-05-01T10:00:00Z";
    let save = |ts: &str, sha: &str| {
        let target = CursorTarget::Git {
            ts: ts.to_string(),
            sha: sha.to_string(),
        };
        let mm = tc.mm.clone();
        async move { CursorBmc::save(&mm, repo_id, job, &target, 1).await.expect("save") }
    };

    assert_eq!(save(t1, "aaaa").await, SaveOutcome::Advanced);

    // Same second, later sha: advances (stable tie-break).
    assert_eq!(save(t1, "bbbb").await, SaveOutcome::Advanced);

    // Same second, earlier sha: refused.
    assert_eq!(save(t1, "aaaa").await, SaveOutcome::WatermarkUnchanged);

    // Earlier timestamp with later sha: refused.
    assert_eq!(
        save("2024-05-01T09:59:59Z", "ffff").await,
        SaveOutcome::WatermarkUnchanged
    );

    // Later timestamp: advances.
    assert_eq!(save("2024-05-01T10:00:01Z", "0000").await, SaveOutcome::Advanced);

    let cursor = CursorBmc::load(&tc.mm, repo_id, job)
        .await
        .expect("load")
        .expect("cursor exists");
    assert_eq!(cursor.last_commit_ts.as_deref(), Some("2024-05-01T10:00:01Z"));
    assert_eq!(cursor.last_commit_sha.as_deref(), Some("0000"));
}

#[tokio::test]
async fn load_after_save_is_at_least_target() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_svn_repo(&tc).await;

    let mut high_water = 0;
    for rev in [10, 5, 20, 15, 30] {
        let _ = CursorBmc::save(&tc.mm, repo_id, "svn", &CursorTarget::SvnRev(rev), 1)
            .await
            .expect("save");
        high_water = high_water.max(rev);
        let cursor = CursorBmc::load(&tc.mm, repo_id, "svn")
            .await
            .expect("load")
            .expect("cursor exists");
        // The stored value is exactly the high-water mark so far; stale
        // targets never regress it.
        assert_eq!(cursor.last_rev, Some(high_water));
    }
}

#[tokio::test]
async fn distinct_job_types_do_not_interfere() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_git_repo(&tc).await;

    let _ = CursorBmc::save(&tc.mm, repo_id, "svn", &CursorTarget::SvnRev(50), 1)
        .await
        .expect("save");
    let _ = CursorBmc::save(
        &tc.mm,
        repo_id,
        "gitlab_commits",
        &CursorTarget::Git {
            ts: "2024-01-01T00:00:00Z".to_string(),
            sha: "abc".to_string(),
        },
        1,
    )
    .await
    .expect("save");

    let svn = CursorBmc::load(&tc.mm, repo_id, "svn").await.expect("load");
    let git = CursorBmc::load(&tc.mm, repo_id, "gitlab_commits")
        .await
        .expect("load");
    assert_eq!(svn.and_then(|c| c.last_rev), Some(50));
    assert_eq!(
        git.and_then(|c| c.last_commit_sha),
        Some("abc".to_string())
    );
}
