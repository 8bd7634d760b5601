//! SVN revision rows, append-only and unique on `(repo_id, rev_num)`.
//!
//! Upserts overwrite only non-identity attributes so re-syncing an overlap
//! window is harmless.

use crate::ids::SourceId;
use crate::model::{ModelManager, opt_text};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvnRevision {
    pub repo_id: i64,
    pub rev_num: i64,
    pub author_raw: String,
    pub ts: Option<String>,
    pub message: String,
    pub is_merge: bool,
    pub is_bulk: bool,
    pub bulk_reason: Option<String>,
    pub source_id: String,
    pub meta_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct SvnRevisionForUpsert {
    pub repo_id: i64,
    pub rev_num: i64,
    pub author_raw: String,
    pub ts: Option<String>,
    pub message: String,
    pub is_merge: bool,
    pub is_bulk: bool,
    pub bulk_reason: Option<String>,
    pub meta_json: Option<serde_json::Value>,
}

pub struct SvnRevisionBmc;

impl SvnRevisionBmc {
    pub async fn upsert(mm: &ModelManager, rev_c: SvnRevisionForUpsert) -> Result<()> {
        let source_id = SourceId::svn(rev_c.repo_id, rev_c.rev_num).to_string();
        let meta = rev_c
            .meta_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO svn_revisions
                   (repo_id, rev_num, author_raw, ts, message, is_merge, is_bulk,
                    bulk_reason, source_id, meta_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(repo_id, rev_num) DO UPDATE SET
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
            rev_c.repo_id,
            rev_c.rev_num,
            rev_c.author_raw.as_str(),
            opt_text(rev_c.ts.clone()),
            rev_c.message.as_str(),
            rev_c.is_merge as i64,
            rev_c.is_bulk as i64,
            opt_text(rev_c.bulk_reason.clone()),
            source_id.as_str(),
            opt_text(meta),
        ))
        .await?;
        Ok(())
    }

    pub async fn get(mm: &ModelManager, repo_id: i64, rev_num: i64) -> Result<SvnRevision> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, rev_num, author_raw, ts, message, is_merge, is_bulk,
                        bulk_reason, source_id, meta_json
                 FROM svn_revisions WHERE repo_id = ? AND rev_num = ?",
            )
            .await?;
        let mut rows = stmt.query((repo_id, rev_num)).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::NotFound)
        }
    }

    pub async fn max_rev(mm: &ModelManager, repo_id: i64) -> Result<Option<i64>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT MAX(rev_num) FROM svn_revisions WHERE repo_id = ?")
            .await?;
        let mut rows = stmt.query([repo_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get::<Option<i64>>(0)?)
        } else {
            Ok(None)
        }
    }

    pub async fn list_all(mm: &ModelManager, repo_id: i64) -> Result<Vec<SvnRevision>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, rev_num, author_raw, ts, message, is_merge, is_bulk,
                        bulk_reason, source_id, meta_json
                 FROM svn_revisions WHERE repo_id = ? ORDER BY rev_num",
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
    pub async fn list_identity(mm: &ModelManager) -> Result<Vec<(i64, i64, String)>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT repo_id, rev_num, source_id FROM svn_revisions ORDER BY repo_id, rev_num",
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
        rev_num: i64,
        source_id: &str,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE svn_revisions SET source_id = ? WHERE repo_id = ? AND rev_num = ?")
            .await?;
        stmt.execute((source_id, repo_id, rev_num)).await?;
        Ok(())
    }

    fn from_row(row: libsql::Row) -> Result<SvnRevision> {
        let meta_raw: Option<String> = row.get(9)?;
        Ok(SvnRevision {
            repo_id: row.get(0)?,
            rev_num: row.get(1)?,
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
