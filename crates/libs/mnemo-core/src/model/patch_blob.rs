//! Patch blob lifecycle: `pending → in_progress → done | failed`.
//!
//! Ownership transitions are conditional updates; the affected-row count
//! tells a worker whether it won the claim. `uri` and `sha256` become
//! immutable once a row reaches `done` (the done-update re-checks the
//! expected sha in its WHERE clause).

use crate::model::{ModelManager, opt_text};
use crate::time::now_z;
use crate::{Error, ErrorCategory, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl MaterializeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterializeStatus::Pending => "pending",
            MaterializeStatus::InProgress => "in_progress",
            MaterializeStatus::Done => "done",
            MaterializeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(MaterializeStatus::Pending),
            "in_progress" => Ok(MaterializeStatus::InProgress),
            "done" => Ok(MaterializeStatus::Done),
            "failed" => Ok(MaterializeStatus::Failed),
            other => Err(Error::InvalidInput(format!(
                "invalid materialize_status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchFormat {
    Diff,
    Diffstat,
    Ministat,
}

impl PatchFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchFormat::Diff => "diff",
            PatchFormat::Diffstat => "diffstat",
            PatchFormat::Ministat => "ministat",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "diff" => Ok(PatchFormat::Diff),
            "diffstat" => Ok(PatchFormat::Diffstat),
            "ministat" => Ok(PatchFormat::Ministat),
            other => Err(Error::InvalidInput(format!("invalid patch format: {other}"))),
        }
    }

    /// Artifact file extension for this format.
    pub fn ext(&self) -> &'static str {
        self.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchBlob {
    pub blob_id: i64,
    pub source_type: String,
    pub source_id: String,
    pub format: PatchFormat,
    pub uri: Option<String>,
    pub sha256: Option<String>,
    pub size_bytes: Option<i64>,
    pub evidence_uri: Option<String>,
    pub materialize_status: MaterializeStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub last_endpoint: Option<String>,
    pub error_category: Option<String>,
    pub mirror_uri: Option<String>,
    pub mirror_sha256: Option<String>,
    pub degraded: bool,
    pub degrade_reason: Option<String>,
    pub chunking_version: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PatchBlobForCreate {
    pub source_type: String,
    pub source_id: String,
    pub format: PatchFormat,
    /// Expected content sha when known up front (sync computed the body).
    pub sha256: Option<String>,
}

pub struct PatchBlobBmc;

impl PatchBlobBmc {
    /// Register a blob for later materialization; keyed on
    /// `(source_type, source_id, format)`, re-registration is a no-op.
    pub async fn create_pending(mm: &ModelManager, blob_c: PatchBlobForCreate) -> Result<i64> {
        let db = mm.db();
        let now = now_z();
        let stmt = db
            .prepare(
                "INSERT INTO patch_blobs
                   (source_type, source_id, format, sha256, materialize_status,
                    attempts, created_ts, updated_ts)
                 VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)
                 ON CONFLICT(source_type, source_id, format) DO NOTHING",
            )
            .await?;
        stmt.execute((
            blob_c.source_type.as_str(),
            blob_c.source_id.as_str(),
            blob_c.format.as_str(),
            opt_text(blob_c.sha256.clone().map(|s| s.to_lowercase())),
            now.as_str(),
            now.as_str(),
        ))
        .await?;

        let stmt = db
            .prepare(
                "SELECT blob_id FROM patch_blobs
                 WHERE source_type = ? AND source_id = ? AND format = ?",
            )
            .await?;
        let mut rows = stmt
            .query((
                blob_c.source_type.as_str(),
                blob_c.source_id.as_str(),
                blob_c.format.as_str(),
            ))
            .await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Err(Error::InvalidInput("failed to register patch blob".into()))
        }
    }

    pub async fn get(mm: &ModelManager, blob_id: i64) -> Result<PatchBlob> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!("{SELECT_COLS} FROM patch_blobs WHERE blob_id = ?"))
            .await?;
        let mut rows = stmt.query([blob_id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::PatchBlobNotFound(blob_id))
        }
    }

    pub async fn get_by_source(
        mm: &ModelManager,
        source_type: &str,
        source_id: &str,
        format: PatchFormat,
    ) -> Result<PatchBlob> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "{SELECT_COLS} FROM patch_blobs
                 WHERE source_type = ? AND source_id = ? AND format = ?"
            ))
            .await?;
        let mut rows = stmt
            .query((source_type, source_id, format.as_str()))
            .await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::NotFound)
        }
    }

    /// Rows waiting for materialization, oldest first.
    pub async fn list_for_materialize(
        mm: &ModelManager,
        retry_failed: bool,
        source_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PatchBlob>> {
        let db = mm.db();
        let status_clause = if retry_failed {
            "materialize_status IN ('pending', 'failed')"
        } else {
            "materialize_status = 'pending'"
        };
        let mut sql = format!(
            "{SELECT_COLS} FROM patch_blobs WHERE {status_clause} AND (uri IS NULL OR uri = '')"
        );
        let mut params: Vec<libsql::Value> = Vec::new();
        if let Some(st) = source_type {
            sql.push_str(" AND source_type = ?");
            params.push(st.into());
        }
        sql.push_str(" ORDER BY blob_id LIMIT ?");
        params.push((limit as i64).into());

        let stmt = db.prepare(&sql).await?;
        let mut rows = stmt
            .query(libsql::params::Params::Positional(params))
            .await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push(Self::from_row(row)?);
        }
        Ok(res)
    }

    /// Advisory ownership claim: flips `pending|failed → in_progress`.
    /// Returns false when another worker owns the row.
    pub async fn claim_in_progress(mm: &ModelManager, blob_id: i64) -> Result<bool> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE patch_blobs
                 SET materialize_status = 'in_progress', updated_ts = ?
                 WHERE blob_id = ? AND materialize_status IN ('pending', 'failed')",
            )
            .await?;
        let changed = stmt.execute((now_z().as_str(), blob_id)).await?;
        Ok(changed > 0)
    }

    /// Finalize a materialized row. The WHERE clause re-checks the stored
    /// sha so a concurrent writer cannot flip an already-resolved row; the
    /// return value reports whether this worker's update landed.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_done(
        mm: &ModelManager,
        blob_id: i64,
        uri: &str,
        sha256: &str,
        size_bytes: i64,
        evidence_uri: &str,
        degraded: bool,
        degrade_reason: Option<&str>,
    ) -> Result<bool> {
        let db = mm.db();
        let sha = sha256.to_lowercase();
        let stmt = db
            .prepare(
                "UPDATE patch_blobs
                 SET uri = ?, sha256 = ?, size_bytes = ?, evidence_uri = ?,
                     materialize_status = 'done', degraded = ?, degrade_reason = ?,
                     last_error = NULL, error_category = NULL,
                     attempts = attempts + 1, updated_ts = ?
                 WHERE blob_id = ?
                   AND materialize_status = 'in_progress'
                   AND (sha256 IS NULL OR sha256 = '' OR sha256 = ?)",
            )
            .await?;
        let changed = stmt
            .execute((
                uri,
                sha.as_str(),
                size_bytes,
                evidence_uri,
                degraded as i64,
                opt_text(degrade_reason.map(str::to_string)),
                now_z().as_str(),
                blob_id,
                sha.as_str(),
            ))
            .await?;
        Ok(changed > 0)
    }

    pub async fn mark_failed(
        mm: &ModelManager,
        blob_id: i64,
        category: ErrorCategory,
        error: &str,
        endpoint: Option<&str>,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE patch_blobs
                 SET materialize_status = 'failed', error_category = ?, last_error = ?,
                     last_endpoint = COALESCE(?, last_endpoint),
                     attempts = attempts + 1, updated_ts = ?
                 WHERE blob_id = ?",
            )
            .await?;
        stmt.execute((
            category.as_str(),
            error,
            opt_text(endpoint.map(str::to_string)),
            now_z().as_str(),
            blob_id,
        ))
        .await?;
        Ok(())
    }

    /// Record a mirror write after a sha mismatch: the row stays `failed`
    /// and `uri` stays untouched, but the forensic copy is reachable.
    pub async fn mark_failed_with_mirror(
        mm: &ModelManager,
        blob_id: i64,
        mirror_uri: &str,
        actual_sha256: &str,
        error: &str,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE patch_blobs
                 SET materialize_status = 'failed', error_category = ?,
                     last_error = ?, mirror_uri = ?, mirror_sha256 = ?,
                     attempts = attempts + 1, updated_ts = ?
                 WHERE blob_id = ?",
            )
            .await?;
        stmt.execute((
            ErrorCategory::ValidationError.as_str(),
            error,
            mirror_uri,
            actual_sha256.to_lowercase().as_str(),
            now_z().as_str(),
            blob_id,
        ))
        .await?;
        Ok(())
    }

    /// Release a claim without recording an attempt (fetch was never tried).
    pub async fn release_to_pending(mm: &ModelManager, blob_id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE patch_blobs SET materialize_status = 'pending', updated_ts = ?
                 WHERE blob_id = ? AND materialize_status = 'in_progress'",
            )
            .await?;
        stmt.execute((now_z().as_str(), blob_id)).await?;
        Ok(())
    }

    pub async fn list_done(mm: &ModelManager, limit: usize) -> Result<Vec<PatchBlob>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "{SELECT_COLS} FROM patch_blobs WHERE materialize_status = 'done'
                 ORDER BY blob_id LIMIT ?"
            ))
            .await?;
        let mut rows = stmt.query([limit as i64]).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push(Self::from_row(row)?);
        }
        Ok(res)
    }

    pub async fn list_all(mm: &ModelManager, limit: usize) -> Result<Vec<PatchBlob>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "{SELECT_COLS} FROM patch_blobs ORDER BY blob_id LIMIT ?"
            ))
            .await?;
        let mut rows = stmt.query([limit as i64]).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push(Self::from_row(row)?);
        }
        Ok(res)
    }

    fn from_row(row: libsql::Row) -> Result<PatchBlob> {
        let format_raw: String = row.get(3)?;
        let status_raw: String = row.get(8)?;
        Ok(PatchBlob {
            blob_id: row.get(0)?,
            source_type: row.get(1)?,
            source_id: row.get(2)?,
            format: PatchFormat::parse(&format_raw)?,
            uri: row.get(4)?,
            sha256: row.get(5)?,
            size_bytes: row.get(6)?,
            evidence_uri: row.get(7)?,
            materialize_status: MaterializeStatus::parse(&status_raw)?,
            attempts: row.get(9)?,
            last_error: row.get(10)?,
            last_endpoint: row.get(11)?,
            error_category: row.get(12)?,
            mirror_uri: row.get(13)?,
            mirror_sha256: row.get(14)?,
            degraded: row.get::<i64>(15)? != 0,
            degrade_reason: row.get(16)?,
            chunking_version: row.get(17)?,
        })
    }

    /// Attach or refresh the expected sha before handing a row to the
    /// materializer (sync pipelines know the sha when they computed the
    /// body themselves).
    pub async fn set_expected_sha(mm: &ModelManager, blob_id: i64, sha256: &str) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE patch_blobs SET sha256 = ?, updated_ts = ?
                 WHERE blob_id = ? AND materialize_status != 'done'",
            )
            .await?;
        stmt.execute((
            sha256.to_lowercase().as_str(),
            now_z().as_str(),
            blob_id,
        ))
        .await?;
        Ok(())
    }

    /// Count rows per materialize status (reporting).
    pub async fn count_by_status(mm: &ModelManager) -> Result<Vec<(String, i64)>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT materialize_status, COUNT(*) FROM patch_blobs
                 GROUP BY materialize_status ORDER BY materialize_status",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push((row.get(0)?, row.get(1)?));
        }
        Ok(res)
    }
}

const SELECT_COLS: &str = "SELECT blob_id, source_type, source_id, format, uri, sha256, \
     size_bytes, evidence_uri, materialize_status, attempts, last_error, last_endpoint, \
     error_category, mirror_uri, mirror_sha256, degraded, degrade_reason, chunking_version";
