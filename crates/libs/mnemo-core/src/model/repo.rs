//! Repository registry.
//!
//! Repos are created on first sync (`ensure`) keyed by the canonical URL
//! and are immutable afterwards; merging aliased rows is a manual
//! operation outside the core.

use crate::ids::normalize_repo_url;
use crate::model::{ModelManager, opt_text};
use crate::time::now_z;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub repo_id: i64,
    pub repo_type: String,
    pub url: String,
    pub project_key: String,
    pub default_branch: Option<String>,
    pub created_ts: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoForEnsure {
    pub repo_type: String,
    pub url: String,
    pub project_key: String,
    pub default_branch: Option<String>,
}

pub struct RepoBmc;

impl RepoBmc {
    /// Find-or-create by canonical URL; returns the existing row untouched
    /// when present.
    pub async fn ensure(mm: &ModelManager, repo_c: RepoForEnsure) -> Result<Repo> {
        if !matches!(repo_c.repo_type.as_str(), "svn" | "git") {
            return Err(Error::InvalidInput(format!(
                "invalid repo_type: {}",
                repo_c.repo_type
            )));
        }
        let canonical = normalize_repo_url(&repo_c.url)?;
        let db = mm.db();

        let stmt = db
            .prepare(
                "INSERT INTO scm_repos (repo_type, url, project_key, default_branch, created_ts)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(url) DO NOTHING",
            )
            .await?;
        stmt.execute((
            repo_c.repo_type.as_str(),
            canonical.as_str(),
            repo_c.project_key.as_str(),
            opt_text(repo_c.default_branch.clone()),
            now_z(),
        ))
        .await?;

        Self::get_by_url(mm, &canonical).await
    }

    pub async fn get(mm: &ModelManager, repo_id: i64) -> Result<Repo> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, repo_type, url, project_key, default_branch, created_ts
                 FROM scm_repos WHERE repo_id = ?",
            )
            .await?;
        let mut rows = stmt.query([repo_id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::RepoNotFound(repo_id))
        }
    }

    pub async fn get_by_url(mm: &ModelManager, url: &str) -> Result<Repo> {
        let canonical = normalize_repo_url(url)?;
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, repo_type, url, project_key, default_branch, created_ts
                 FROM scm_repos WHERE url = ?",
            )
            .await?;
        let mut rows = stmt.query([canonical.as_str()]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::NotFound)
        }
    }

    pub async fn list(mm: &ModelManager) -> Result<Vec<Repo>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, repo_type, url, project_key, default_branch, created_ts
                 FROM scm_repos ORDER BY repo_id",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push(Self::from_row(row)?);
        }
        Ok(res)
    }

    fn from_row(row: libsql::Row) -> Result<Repo> {
        Ok(Repo {
            repo_id: row.get(0)?,
            repo_type: row.get(1)?,
            url: row.get(2)?,
            project_key: row.get(3)?,
            default_branch: row.get(4)?,
            created_ts: row.get(5)?,
        })
    }
}
