//! Shared fixtures: isolated database + artifact root per test.

#![allow(dead_code)]

use mnemo_common::config::AppConfig;
use mnemo_core::model::repo::{Repo, RepoBmc, RepoForEnsure};
use mnemo_core::{ModelManager, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct TestContext {
    pub mm: ModelManager,
    #[allow(dead_code)]
    temp_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_path = temp_dir.path().join(format!("test_db_{}.db", counter));
        let artifacts_root = temp_dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts_root)?;

        let db = mnemo_core::store::open_and_migrate(&db_path).await?;
        let mm = ModelManager::new_for_test(db, artifacts_root, Arc::new(AppConfig::default()));
        Ok(Self { mm, temp_dir })
    }
}

pub async fn ensure_git_repo(tc: &TestContext, url: &str) -> Repo {
    RepoBmc::ensure(
        &tc.mm,
        RepoForEnsure {
            repo_type: "git".to_string(),
            url: url.to_string(),
            project_key: "proj_a".to_string(),
            default_branch: Some("main".to_string()),
        },
    )
    .await
    .expect("Failed to ensure git repo")
}

pub async fn ensure_svn_repo(tc: &TestContext) -> Repo {
    RepoBmc::ensure(
        &tc.mm,
        RepoForEnsure {
            repo_type: "svn".to_string(),
            url: "svn://svn.example.com/project/trunk".to_string(),
            project_key: "proj_a".to_string(),
            default_branch: None,
        },
    )
    .await
    .expect("Failed to ensure svn repo")
}
