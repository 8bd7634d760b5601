//! # Model Layer - BMC Pattern
//!
//! Each entity has:
//! - **Data Struct**: serializable model (e.g. `PatchBlob`, `OutboxEntry`)
//! - **ForCreate Struct**: input for creation operations
//! - **Bmc Struct**: stateless controller with async CRUD methods
//!
//! | BMC | Relation |
//! |-----|----------|
//! | `repo::RepoBmc` | `scm_repos` |
//! | `svn_revision::SvnRevisionBmc` | `svn_revisions` |
//! | `git_commit::GitCommitBmc` | `git_commits` |
//! | `patch_blob::PatchBlobBmc` | `patch_blobs` |
//! | `cursor::CursorBmc` | `sync_cursors` |
//! | `lease::LeaseBmc` | `sync_leases` |
//! | `sync_run::SyncRunBmc` | `sync_runs` |
//! | `outbox::OutboxBmc` | `outbox_memory` |
//! | `audit::AuditBmc` | `write_audit` |
//! | `attachment::AttachmentBmc` | `attachments` |
//! | `team_settings::TeamSettingsBmc` | `team_settings` |
//! | `knowledge::KnowledgeBmc` | `knowledge_candidates` |

pub mod attachment;
pub mod audit;
pub mod cursor;
pub mod git_commit;
pub mod knowledge;
pub mod lease;
pub mod outbox;
pub mod patch_blob;
pub mod repo;
pub mod svn_revision;
pub mod sync_run;
pub mod team_settings;

use crate::Result;
use crate::artifact::LocalArtifactStore;
use crate::store::{self, Db};
use mnemo_common::config::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;

/// Central manager for the database connection and the artifact store.
///
/// Constructed once in `main` and cloned into workers and handlers; there
/// is no other process-wide mutable state.
#[derive(Clone)]
pub struct ModelManager {
    pub(crate) db: Db,
    artifact_store: Arc<LocalArtifactStore>,
    pub app_config: Arc<AppConfig>,
}

impl ModelManager {
    /// Constructor
    pub async fn new(app_config: Arc<AppConfig>) -> Result<Self> {
        let db = store::new_db_pool(&app_config.database.path).await?;
        let root = PathBuf::from(&app_config.artifacts.root);
        std::fs::create_dir_all(&root)?;
        tracing::info!(
            db = %app_config.database.path,
            artifacts = %root.display(),
            "model manager ready"
        );
        Ok(ModelManager {
            db,
            artifact_store: Arc::new(LocalArtifactStore::new(root)),
            app_config,
        })
    }

    /// Constructor for testing with custom db connection and paths.
    /// Public so integration tests can use it.
    pub fn new_for_test(db: Db, artifacts_root: PathBuf, app_config: Arc<AppConfig>) -> Self {
        ModelManager {
            db,
            artifact_store: Arc::new(LocalArtifactStore::new(artifacts_root)),
            app_config,
        }
    }

    pub fn artifacts(&self) -> &LocalArtifactStore {
        &self.artifact_store
    }

    /// Returns the db connection reference (model layer only).
    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    /// Returns the db connection for integration tests.
    pub fn db_for_test(&self) -> &Db {
        &self.db
    }

    /// Health check - verify database connectivity
    pub async fn health_check(&self) -> Result<bool> {
        let stmt = self.db.prepare("SELECT 1").await?;
        let mut rows = stmt.query(()).await?;
        Ok(rows.next().await?.is_some())
    }
}

/// Bind an optional text column.
pub(crate) fn opt_text(v: Option<String>) -> libsql::Value {
    match v {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Bind an optional integer column.
pub(crate) fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}
