//! Distributed lease tests: exclusivity, expiry stealing, renew/release
//! ownership checks.

#[path = "common/mod.rs"]
mod common;

use common::{TestContext, setup_git_repo};
use mnemo_core::model::lease::{LeaseBmc, generate_worker_id};

const JOB: &str = "gitlab_commits";

#[tokio::test]
async fn claim_is_exclusive() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_git_repo(&tc).await;

    assert!(
        LeaseBmc::claim(&tc.mm, repo_id, JOB, "worker-a", 60)
            .await
            .expect("claim a")
    );
    // Held and unexpired: second claimant fails immediately.
    assert!(
        !LeaseBmc::claim(&tc.mm, repo_id, JOB, "worker-b", 60)
            .await
            .expect("claim b")
    );

    let active = LeaseBmc::active_count(&tc.mm, repo_id, JOB)
        .await
        .expect("count");
    assert_eq!(active, 1);
}

#[tokio::test]
async fn expired_lease_is_stolen() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_git_repo(&tc).await;

    // Zero-second lease expires at acquisition time; the boundary case
    // `expires_at == now` is stealable.
    assert!(
        LeaseBmc::claim(&tc.mm, repo_id, JOB, "worker-a", 0)
            .await
            .expect("claim a")
    );
    assert!(
        LeaseBmc::claim(&tc.mm, repo_id, JOB, "worker-b", 60)
            .await
            .expect("claim b steals")
    );

    let lease = LeaseBmc::get(&tc.mm, repo_id, JOB)
        .await
        .expect("get")
        .expect("lease exists");
    assert_eq!(lease.worker_id, "worker-b");
}

#[tokio::test]
async fn renew_requires_matching_owner_and_liveness() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_git_repo(&tc).await;

    assert!(
        LeaseBmc::claim(&tc.mm, repo_id, JOB, "worker-a", 60)
            .await
            .expect("claim")
    );
    assert!(
        LeaseBmc::renew(&tc.mm, repo_id, JOB, "worker-a", 60)
            .await
            .expect("renew own")
    );
    // Wrong worker: renew_failed.
    assert!(
        !LeaseBmc::renew(&tc.mm, repo_id, JOB, "worker-b", 60)
            .await
            .expect("renew other")
    );
}

#[tokio::test]
async fn renew_fails_after_expiry() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_git_repo(&tc).await;

    assert!(
        LeaseBmc::claim(&tc.mm, repo_id, JOB, "worker-a", 0)
            .await
            .expect("claim")
    );
    assert!(
        !LeaseBmc::renew(&tc.mm, repo_id, JOB, "worker-a", 60)
            .await
            .expect("renew expired")
    );
}

#[tokio::test]
async fn release_requires_matching_owner() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_git_repo(&tc).await;

    assert!(
        LeaseBmc::claim(&tc.mm, repo_id, JOB, "worker-a", 60)
            .await
            .expect("claim")
    );
    assert!(
        !LeaseBmc::release(&tc.mm, repo_id, JOB, "worker-b")
            .await
            .expect("release other")
    );
    assert!(
        LeaseBmc::release(&tc.mm, repo_id, JOB, "worker-a")
            .await
            .expect("release own")
    );
    assert!(
        LeaseBmc::get(&tc.mm, repo_id, JOB)
            .await
            .expect("get")
            .is_none()
    );
}

#[tokio::test]
async fn distinct_job_types_run_concurrently() {
    let tc = TestContext::new().await.expect("test context");
    let repo_id = setup_git_repo(&tc).await;

    assert!(
        LeaseBmc::claim(&tc.mm, repo_id, "gitlab_commits", "worker-a", 60)
            .await
            .expect("claim commits")
    );
    assert!(
        LeaseBmc::claim(&tc.mm, repo_id, "gitlab_mrs", "worker-b", 60)
            .await
            .expect("claim mrs")
    );
}

#[test]
fn worker_id_shape() {
    let id = generate_worker_id();
    let parts: Vec<&str> = id.rsplitn(3, '-').collect();
    assert_eq!(parts.len(), 3, "{id}");
    // pid segment is numeric
    assert!(parts[1].bytes().all(|b| b.is_ascii_digit()), "{id}");
    assert_eq!(parts[0].len(), 8, "{id}");
}
