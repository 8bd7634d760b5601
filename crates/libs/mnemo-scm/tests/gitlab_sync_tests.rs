//! GitLab sync pipeline tests: incremental advance, batch truncation,
//! strict-mode mid-batch stop, best-effort degradation.

#[path = "common/mod.rs"]
mod common;

use common::{TestContext, ensure_git_repo};
use mnemo_common::config::{AppConfig, GitLabConfig};
use mnemo_core::model::cursor::CursorBmc;
use mnemo_core::model::git_commit::GitCommitBmc;
use mnemo_core::model::lease::LeaseBmc;
use mnemo_core::model::patch_blob::{MaterializeStatus, PatchBlobBmc, PatchFormat};
use mnemo_scm::gitlab::{GitLabClient, TokenProvider};
use mnemo_scm::policy::{DegradationConfig, DegradationController, DiffMode};
use mnemo_scm::sync::gitlab::{GitLabSync, GitLabSyncConfig};
use mnemo_scm::sync::{JOB_TYPE_GITLAB_COMMITS, SyncMode};
use mnemo_scm::window::WindowParams;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHAS: [&str; 5] = [
    "aaaa000000000000000000000000000000000001",
    "bbbb000000000000000000000000000000000002",
    "cccc000000000000000000000000000000000003",
    "dddd000000000000000000000000000000000004",
    "eeee000000000000000000000000000000000005",
];

fn commit_json(i: usize) -> serde_json::Value {
    json!({
        "id": SHAS[i],
        "author_name": "alice",
        "author_email": "alice@example.com",
        "committed_date": format!("2024-05-01T10:0{}:00Z", i),
        "message": format!("commit {i}"),
        "parent_ids": ["0000000000000000000000000000000000000000"],
        "stats": {"additions": 2, "deletions": 1, "total": 3},
        "web_url": format!("https://gl/commit/{}", SHAS[i]),
    })
}

fn diff_json() -> serde_json::Value {
    json!([{
        "old_path": "src/a.rs",
        "new_path": "src/a.rs",
        "diff": "@@ -1 +1 @@\n-old\n+new\n",
        "new_file": false,
        "renamed_file": false,
        "deleted_file": false,
    }])
}

async fn mount_commits(server: &MockServer, commits: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/1/repository/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::Value::Array(commits)))
        .mount(server)
        .await;
}

async fn mount_diff(server: &MockServer, sha: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/api/v4/projects/1/repository/commits/{sha}/diff"
        )))
        .respond_with(response)
        .mount(server)
        .await;
}

fn gitlab_config() -> GitLabConfig {
    GitLabConfig {
        max_attempts: 1,
        backoff_base_seconds: 0.01,
        backoff_max_seconds: 0.05,
        rate_limit_rps: 1000,
        rate_limit_burst: 1000,
        request_timeout_seconds: 5,
        ..AppConfig::default().gitlab
    }
}

fn sync_config(mode: SyncMode) -> GitLabSyncConfig {
    GitLabSyncConfig {
        project_id: "1".to_string(),
        ref_name: None,
        mode,
        lease_seconds: 60,
        max_diff_size_bytes: 10 * 1024 * 1024,
        bulk_total_changes_threshold: 2_000,
        bulk_files_changed_threshold: 50,
        bulk_diff_size_threshold: 1_048_576,
        window: WindowParams {
            overlap_seconds: 120,
            time_window_days: 30,
            forward_window_seconds: 86_400 * 365,
        },
    }
}

fn controller(batch_size: usize, diff_mode: DiffMode) -> DegradationController {
    DegradationController::new(
        DegradationConfig {
            forward_window_seconds: 86_400 * 365,
            forward_window_min_seconds: 3_600,
            forward_window_max_seconds: 86_400 * 365 * 4,
            batch_size,
            min_batch_size: 1,
            shrink_factor: 0.5,
            grow_factor: 1.5,
            commit_threshold: 20,
            demote_after_pressure_batches: 100,
        },
        diff_mode,
    )
}

#[tokio::test]
async fn clean_sync_persists_commits_blobs_and_cursor() {
    let tc = TestContext::new().await.expect("test context");
    let server = MockServer::start().await;
    mount_commits(&server, vec![commit_json(0), commit_json(1)]).await;
    for sha in &SHAS[..2] {
        mount_diff(&server, sha, ResponseTemplate::new(200).set_body_json(diff_json())).await;
    }

    let repo = ensure_git_repo(&tc, &format!("{}/group/project", server.uri())).await;
    let client = GitLabClient::new(
        server.uri(),
        TokenProvider::Static("glpat-test".to_string()),
        gitlab_config(),
    )
    .expect("client");

    let sync = GitLabSync::new(&tc.mm, &client, sync_config(SyncMode::BestEffort));
    let mut ctl = controller(100, DiffMode::BestEffort);
    let report = sync.run(&repo, "worker-a", &mut ctl).await.expect("run");

    assert!(!report.locked);
    assert_eq!(report.status, "completed");
    assert_eq!(report.counts.persisted, 2);
    assert_eq!(report.counts.blobs_done, 2);
    assert!(!report.counts.has_more);

    // Rows exist and are ordered.
    for sha in &SHAS[..2] {
        let commit = GitCommitBmc::get(&tc.mm, repo.repo_id, sha).await.expect("commit");
        assert!(commit.source_id.starts_with("git:"));
        assert!(!commit.is_merge);
    }

    // Cursor advanced to the last commit's (ts, sha).
    let cursor = CursorBmc::load(&tc.mm, repo.repo_id, JOB_TYPE_GITLAB_COMMITS)
        .await
        .expect("load")
        .expect("cursor");
    assert_eq!(cursor.last_commit_sha.as_deref(), Some(SHAS[1]));

    // Lease was released.
    assert!(
        LeaseBmc::get(&tc.mm, repo.repo_id, JOB_TYPE_GITLAB_COMMITS)
            .await
            .expect("lease")
            .is_none()
    );

    // Second run over the same data: watermark filters everything out.
    let report = sync.run(&repo, "worker-a", &mut ctl).await.expect("rerun");
    assert_eq!(report.status, "no_data");
    assert_eq!(report.counts.persisted, 0);
}

#[tokio::test]
async fn batch_truncation_reports_has_more() {
    let tc = TestContext::new().await.expect("test context");
    let server = MockServer::start().await;
    mount_commits(
        &server,
        vec![commit_json(0), commit_json(1), commit_json(2)],
    )
    .await;
    for sha in &SHAS[..3] {
        mount_diff(&server, sha, ResponseTemplate::new(200).set_body_json(diff_json())).await;
    }

    let repo = ensure_git_repo(&tc, &format!("{}/group/project", server.uri())).await;
    let client = GitLabClient::new(
        server.uri(),
        TokenProvider::Static("glpat-test".to_string()),
        gitlab_config(),
    )
    .expect("client");

    let sync = GitLabSync::new(&tc.mm, &client, sync_config(SyncMode::BestEffort));
    let mut ctl = controller(2, DiffMode::BestEffort);
    let report = sync.run(&repo, "worker-a", &mut ctl).await.expect("run");

    assert_eq!(report.counts.persisted, 2);
    assert!(report.counts.has_more);

    let cursor = CursorBmc::load(&tc.mm, repo.repo_id, JOB_TYPE_GITLAB_COMMITS)
        .await
        .expect("load")
        .expect("cursor");
    assert_eq!(cursor.last_commit_sha.as_deref(), Some(SHAS[1]));

    // Third commit arrives on the next run.
    let report = sync.run(&repo, "worker-a", &mut ctl).await.expect("run 2");
    assert_eq!(report.counts.persisted, 1);
    let cursor = CursorBmc::load(&tc.mm, repo.repo_id, JOB_TYPE_GITLAB_COMMITS)
        .await
        .expect("load")
        .expect("cursor");
    assert_eq!(cursor.last_commit_sha.as_deref(), Some(SHAS[2]));
}

#[tokio::test]
async fn strict_mode_stops_cursor_at_last_success() {
    let tc = TestContext::new().await.expect("test context");
    let server = MockServer::start().await;
    mount_commits(
        &server,
        vec![
            commit_json(0),
            commit_json(1),
            commit_json(2),
            commit_json(3),
            commit_json(4),
        ],
    )
    .await;
    // Commits 1-2 fetch fine, commit 3 is rate limited.
    mount_diff(&server, SHAS[0], ResponseTemplate::new(200).set_body_json(diff_json())).await;
    mount_diff(&server, SHAS[1], ResponseTemplate::new(200).set_body_json(diff_json())).await;
    mount_diff(&server, SHAS[2], ResponseTemplate::new(429)).await;
    mount_diff(&server, SHAS[3], ResponseTemplate::new(200).set_body_json(diff_json())).await;
    mount_diff(&server, SHAS[4], ResponseTemplate::new(200).set_body_json(diff_json())).await;

    let repo = ensure_git_repo(&tc, &format!("{}/group/project", server.uri())).await;
    let client = GitLabClient::new(
        server.uri(),
        TokenProvider::Static("glpat-test".to_string()),
        gitlab_config(),
    )
    .expect("client");

    let sync = GitLabSync::new(&tc.mm, &client, sync_config(SyncMode::Strict));
    let mut ctl = controller(100, DiffMode::Always);
    let report = sync.run(&repo, "worker-a", &mut ctl).await.expect("run");

    assert_eq!(report.status, "completed");
    // Commits 1-3 recorded; 4-5 untouched.
    assert_eq!(report.counts.persisted, 3);
    assert!(GitCommitBmc::get(&tc.mm, repo.repo_id, SHAS[3]).await.is_err());
    assert!(GitCommitBmc::get(&tc.mm, repo.repo_id, SHAS[4]).await.is_err());

    // Blobs: 1-2 done, 3 failed/rate_limited.
    for sha in &SHAS[..2] {
        let source_id = format!("git:{}:{}", repo.repo_id, sha);
        let blob = PatchBlobBmc::get_by_source(&tc.mm, "git", &source_id, PatchFormat::Diff)
            .await
            .expect("blob");
        assert_eq!(blob.materialize_status, MaterializeStatus::Done);
    }
    let source_id = format!("git:{}:{}", repo.repo_id, SHAS[2]);
    let blob = PatchBlobBmc::get_by_source(&tc.mm, "git", &source_id, PatchFormat::Diff)
        .await
        .expect("blob");
    assert_eq!(blob.materialize_status, MaterializeStatus::Failed);
    assert_eq!(blob.error_category.as_deref(), Some("rate_limited"));

    // Cursor stopped at commit 2.
    let cursor = CursorBmc::load(&tc.mm, repo.repo_id, JOB_TYPE_GITLAB_COMMITS)
        .await
        .expect("load")
        .expect("cursor");
    assert_eq!(cursor.last_commit_sha.as_deref(), Some(SHAS[1]));

    assert_eq!(report.counts.unrecoverable_errors.len(), 1);
    assert_eq!(
        report.counts.cursor_advance_stopped_at.as_deref(),
        Some(SHAS[1])
    );
}

#[tokio::test]
async fn best_effort_degrades_blob_and_advances_cursor() {
    let tc = TestContext::new().await.expect("test context");
    let server = MockServer::start().await;
    mount_commits(&server, vec![commit_json(0), commit_json(1)]).await;
    mount_diff(&server, SHAS[0], ResponseTemplate::new(200).set_body_json(diff_json())).await;
    mount_diff(&server, SHAS[1], ResponseTemplate::new(500)).await;

    let repo = ensure_git_repo(&tc, &format!("{}/group/project", server.uri())).await;
    let client = GitLabClient::new(
        server.uri(),
        TokenProvider::Static("glpat-test".to_string()),
        gitlab_config(),
    )
    .expect("client");

    let sync = GitLabSync::new(&tc.mm, &client, sync_config(SyncMode::BestEffort));
    let mut ctl = controller(100, DiffMode::BestEffort);
    let report = sync.run(&repo, "worker-a", &mut ctl).await.expect("run");

    assert_eq!(report.counts.persisted, 2);
    assert_eq!(report.counts.blobs_done, 2);
    assert_eq!(report.counts.degraded, 1);
    assert_eq!(report.counts.missing_types, vec!["diff".to_string()]);

    // The degraded blob is done but flagged, downgraded to ministat.
    let source_id = format!("git:{}:{}", repo.repo_id, SHAS[1]);
    let blob = PatchBlobBmc::get_by_source(&tc.mm, "git", &source_id, PatchFormat::Ministat)
        .await
        .expect("blob");
    assert_eq!(blob.materialize_status, MaterializeStatus::Done);
    assert!(blob.degraded);
    assert_eq!(blob.degrade_reason.as_deref(), Some("server_error"));
    let content = tc
        .mm
        .artifacts()
        .read(blob.uri.as_deref().expect("uri"))
        .expect("read");
    assert_eq!(content, b"additions=2 deletions=1 total=3\n");

    // Cursor advanced past the failure.
    let cursor = CursorBmc::load(&tc.mm, repo.repo_id, JOB_TYPE_GITLAB_COMMITS)
        .await
        .expect("load")
        .expect("cursor");
    assert_eq!(cursor.last_commit_sha.as_deref(), Some(SHAS[1]));
}

#[tokio::test]
async fn held_lease_skips_the_run() {
    let tc = TestContext::new().await.expect("test context");
    let server = MockServer::start().await;
    mount_commits(&server, vec![commit_json(0)]).await;

    let repo = ensure_git_repo(&tc, &format!("{}/group/project", server.uri())).await;
    assert!(
        LeaseBmc::claim(&tc.mm, repo.repo_id, JOB_TYPE_GITLAB_COMMITS, "other", 60)
            .await
            .expect("claim")
    );

    let client = GitLabClient::new(
        server.uri(),
        TokenProvider::Static("glpat-test".to_string()),
        gitlab_config(),
    )
    .expect("client");
    let sync = GitLabSync::new(&tc.mm, &client, sync_config(SyncMode::BestEffort));
    let mut ctl = controller(100, DiffMode::BestEffort);
    let report = sync.run(&repo, "worker-a", &mut ctl).await.expect("run");

    assert!(report.locked);
    assert!(report.skipped);
    assert_eq!(report.counts.persisted, 0);
}
