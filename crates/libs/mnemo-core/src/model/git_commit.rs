//! Git commit rows, append-only and unique on `(repo_id, commit_sha)`.

use crate::ids::SourceId;
use crate::model::{ModelManager, opt_text};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Typed view over the decision-relevant parts of `meta_json`.
///
/// Everything else the source API returned rides along in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSummary {
    #[serde(default)]
    pub total_changes: i64,
    #[serde(default)]
    pub files_changed: i64,
    #[serde(default)]
    pub diff_size_bytes: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommit {
    pub repo_id: i64,
    pub commit_sha: String,
    pub author_raw: String,
    pub ts: Option<String>,
    pub message: String,
    pub is_merge: bool,
    pub is_bulk: bool,
    pub bulk_reason: Option<String>,
    pub source_id: String,
    pub meta_json: Option<serde_json::Value>,
}

impl GitCommit {
    /// Decode the stats block of `meta_json`, tolerating absent fields.
    pub fn change_summary(&self) -> ChangeSummary {
        self.meta_json
            .as_ref()
            .and_then(|m| m.get("stats"))
            .and_then(|s| serde_json::from_value(s.clone()).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct GitCommitForUpsert {
    pub repo_id: i64,
    pub commit_sha: String,
    pub author_raw: String,
    pub ts: Option<String>,
    pub message: String,
    pub is_merge: bool,
    pub is_bulk: bool,
    pub bulk_reason: Option<String>,
    pub meta_json: Option<serde_json::Value>,
}

pub struct GitCommitBmc;

impl GitCommitBmc {
    pub async fn upsert(mm: &ModelManager, commit_c: GitCommitForUpsert) -> Result<()> {
        let sha = commit_c.commit_sha.to_lowercase();
        let source_id = SourceId::git(commit_c.repo_id, sha.as_str()).to_string();
        let meta = commit_c
            .meta_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO git_commits
                   (repo_id, commit_sha, author_raw, ts, message, is_merge, is_bulk,
                    bulk_reason, source_id, meta_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(repo_id, commit_sha) DO UPDATE SET
                   author_raw = excluded.author_raw,
                   ts = excluded.ts,
                   message = excluded.message,
                   is_merge = excluded.is_merge,
                   is_bulk = excluded.is_bulk,
                   bulk_reason = excluded.bulk_reason,
                   meta_json = excluded.meta_json",
            )
            .await?;
        stmt.execute((
            commit_c.repo_id,
            sha.as_str(),
            commit_c.author_raw.as_str(),
            opt_text(commit_c.ts.clone()),
            commit_c.message.as_str(),
            commit_c.is_merge as i64,
            commit_c.is_bulk as i64,
            opt_text(commit_c.bulk_reason.clone()),
            source_id.as_str(),
            opt_text(meta),
        ))
        .await?;
        Ok(())
    }

    pub async fn get(mm: &ModelManager, repo_id: i64, commit_sha: &str) -> Result<GitCommit> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, commit_sha, author_raw, ts, message, is_merge, is_bulk,
                        bulk_reason, source_id, meta_json
                 FROM git_commits WHERE repo_id = ? AND commit_sha = ?",
            )
            .await?;
        let mut rows = stmt
            .query((repo_id, commit_sha.to_lowercase().as_str()))
            .await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::NotFound)
        }
    }

    pub async fn list_all(mm: &ModelManager, repo_id: i64) -> Result<Vec<GitCommit>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, commit_sha, author_raw, ts, message, is_merge, is_bulk,
                        bulk_reason, source_id, meta_json
                 FROM git_commits WHERE repo_id = ? ORDER BY ts, commit_sha",
            )
            .await?;
        let mut rows = stmt.query([repo_id]).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push(Self::from_row(row)?);
        }
        Ok(res)
    }

    /// Identity columns only, for integrity scans.
    pub async fn list_identity(mm: &ModelManager) -> Result<Vec<(i64, String, String)>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, commit_sha, source_id FROM git_commits ORDER BY repo_id, commit_sha",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push((row.get(0)?, row.get(1)?, row.get(2)?));
        }
        Ok(res)
    }

    /// Deterministic source-id repair (integrity `fix` mode only).
    pub async fn set_source_id(
        mm: &ModelManager,
        repo_id: i64,
        commit_sha: &str,
        source_id: &str,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE git_commits SET source_id = ? WHERE repo_id = ? AND commit_sha = ?")
            .await?;
        stmt.execute((source_id, repo_id, commit_sha)).await?;
        Ok(())
    }

    fn from_row(row: libsql::Row) -> Result<GitCommit> {
        let meta_raw: Option<String> = row.get(9)?;
        Ok(GitCommit {
            repo_id: row.get(0)?,
            commit_sha: row.get(1)?,
            author_raw: row.get(2)?,
            ts: row.get(3)?,
            message: row.get(4)?,
            is_merge: row.get::<i64>(5)? != 0,
            is_bulk: row.get::<i64>(6)? != 0,
            bulk_reason: row.get(7)?,
            source_id: row.get(8)?,
            meta_json: meta_raw.map(|s| serde_json::from_str(&s)).transpose()?,
        })
    }
}
