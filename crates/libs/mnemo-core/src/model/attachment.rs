//! Evidence attachments.
//!
//! `kind='patch'` rows must carry a `memory://patch_blobs/...` URI; every
//! other kind uses `memory://attachments/<id>/<sha256>` (I6). The two-step
//! create exists because the canonical URI embeds the row id.

use crate::ids::build_attachment_evidence_uri;
use crate::model::{ModelManager, opt_int, opt_text};
use crate::time::now_z;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub attachment_id: i64,
    pub item_id: Option<i64>,
    pub kind: String,
    pub uri: Option<String>,
    pub sha256: Option<String>,
    pub size_bytes: Option<i64>,
    pub meta_json: Option<serde_json::Value>,
    pub chunking_version: Option<i64>,
    pub created_ts: String,
}

#[derive(Debug, Clone)]
pub struct AttachmentForCreate {
    pub item_id: Option<i64>,
    pub kind: String,
    pub sha256: String,
    pub size_bytes: i64,
    pub meta_json: Option<serde_json::Value>,
}

pub struct AttachmentBmc;

impl AttachmentBmc {
    /// Insert the row, then stamp its canonical `memory://attachments/...`
    /// URI (the URI needs the generated id).
    pub async fn create(mm: &ModelManager, attachment_c: AttachmentForCreate) -> Result<Attachment> {
        let db = mm.db();
        let meta = attachment_c
            .meta_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let sha = attachment_c.sha256.to_lowercase();

        let stmt = db
            .prepare(
                "INSERT INTO attachments (item_id, kind, sha256, size_bytes, meta_json, created_ts)
                 VALUES (?, ?, ?, ?, ?, ?)
                 RETURNING attachment_id",
            )
            .await?;
        let mut rows = stmt
            .query((
                opt_int(attachment_c.item_id),
                attachment_c.kind.as_str(),
                sha.as_str(),
                attachment_c.size_bytes,
                opt_text(meta),
                now_z().as_str(),
            ))
            .await?;
        let attachment_id: i64 = if let Some(row) = rows.next().await? {
            row.get(0)?
        } else {
            return Err(Error::InvalidInput("failed to create attachment".into()));
        };

        let uri = build_attachment_evidence_uri(attachment_id, &sha);
        let stmt = db
            .prepare("UPDATE attachments SET uri = ? WHERE attachment_id = ?")
            .await?;
        stmt.execute((uri.as_str(), attachment_id)).await?;

        Self::get(mm, attachment_id).await
    }

    /// Create with an explicit URI (patch pointers produced by the sync).
    pub async fn create_with_uri(
        mm: &ModelManager,
        attachment_c: AttachmentForCreate,
        uri: &str,
    ) -> Result<Attachment> {
        let db = mm.db();
        let meta = attachment_c
            .meta_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let stmt = db
            .prepare(
                "INSERT INTO attachments
                   (item_id, kind, uri, sha256, size_bytes, meta_json, created_ts)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 RETURNING attachment_id",
            )
            .await?;
        let mut rows = stmt
            .query((
                opt_int(attachment_c.item_id),
                attachment_c.kind.as_str(),
                uri,
                attachment_c.sha256.to_lowercase().as_str(),
                attachment_c.size_bytes,
                opt_text(meta),
                now_z().as_str(),
            ))
            .await?;
        let attachment_id: i64 = if let Some(row) = rows.next().await? {
            row.get(0)?
        } else {
            return Err(Error::InvalidInput("failed to create attachment".into()));
        };
        Self::get(mm, attachment_id).await
    }

    pub async fn get(mm: &ModelManager, attachment_id: i64) -> Result<Attachment> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT attachment_id, item_id, kind, uri, sha256, size_bytes, meta_json,
                        chunking_version, created_ts
                 FROM attachments WHERE attachment_id = ?",
            )
            .await?;
        let mut rows = stmt.query([attachment_id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::AttachmentNotFound(attachment_id))
        }
    }

    pub async fn list(mm: &ModelManager, limit: usize) -> Result<Vec<Attachment>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT attachment_id, item_id, kind, uri, sha256, size_bytes, meta_json,
                        chunking_version, created_ts
                 FROM attachments ORDER BY attachment_id LIMIT ?",
            )
            .await?;
        let mut rows = stmt.query([limit as i64]).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push(Self::from_row(row)?);
        }
        Ok(res)
    }

    fn from_row(row: libsql::Row) -> Result<Attachment> {
        let meta_raw: Option<String> = row.get(6)?;
        Ok(Attachment {
            attachment_id: row.get(0)?,
            item_id: row.get(1)?,
            kind: row.get(2)?,
            uri: row.get(3)?,
            sha256: row.get(4)?,
            size_bytes: row.get(5)?,
            meta_json: meta_raw.map(|s| serde_json::from_str(&s)).transpose()?,
            chunking_version: row.get(7)?,
            created_ts: row.get(8)?,
        })
    }
}
