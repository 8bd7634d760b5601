//! Common test utilities and fixtures
//!
//! Each test gets its own isolated database (unique file in a temp dir)
//! and artifact root. Cleanup happens automatically via TempDir RAII.

#![allow(dead_code)]

use mnemo_common::config::AppConfig;
use mnemo_core::{ModelManager, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Global counter for unique database names
static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Test context that manages temporary directories and database setup.
pub struct TestContext {
    pub mm: ModelManager,
    #[allow(dead_code)]
    temp_dir: TempDir, // Keep alive for duration of test
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        Self::new_with_config(AppConfig::default()).await
    }

    pub async fn new_with_config(config: AppConfig) -> Result<Self> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_path = temp_dir.path().join(format!("test_db_{}.db", counter));
        let artifacts_root = temp_dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts_root)?;

        let db = mnemo_core::store::open_and_migrate(&db_path).await?;
        let mm = ModelManager::new_for_test(db, artifacts_root, Arc::new(config));

        Ok(Self { mm, temp_dir })
    }
}

/// Register a git repo and return its id.
pub async fn setup_git_repo(tc: &TestContext) -> i64 {
    use mnemo_core::model::repo::{RepoBmc, RepoForEnsure};
    RepoBmc::ensure(
        &tc.mm,
        RepoForEnsure {
            repo_type: "git".to_string(),
            url: "https://gitlab.example.com/group/project".to_string(),
            project_key: "proj_a".to_string(),
            default_branch: Some("main".to_string()),
        },
    )
    .await
    .expect("Failed to ensure repo")
    .repo_id
}

/// Register an svn repo and return its id.
pub async fn setup_svn_repo(tc: &TestContext) -> i64 {
    use mnemo_core::model::repo::{RepoBmc, RepoForEnsure};
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
    .expect("Failed to ensure repo")
    .repo_id
}
