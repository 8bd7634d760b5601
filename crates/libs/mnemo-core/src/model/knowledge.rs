//! Knowledge candidates: the gateway's dedup index keyed by `payload_sha`
//! and the fallback corpus used when the external memory search is down.

use crate::model::{ModelManager, opt_text};
use crate::time::now_z;
use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeCandidate {
    pub id: i64,
    pub payload_sha: String,
    pub payload_md: String,
    pub memory_id: Option<String>,
    pub target_space: String,
    pub created_ts: String,
}

pub struct KnowledgeBmc;

impl KnowledgeBmc {
    /// Dedup probe: a hit returns the previously stored memory id.
    pub async fn check_dedup(
        mm: &ModelManager,
        payload_sha: &str,
    ) -> Result<Option<KnowledgeCandidate>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, payload_sha, payload_md, memory_id, target_space, created_ts
                 FROM knowledge_candidates WHERE payload_sha = ?",
            )
            .await?;
        let mut rows = stmt.query([payload_sha]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Self::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Record a stored (or deferred) payload; re-recording the same sha
    /// keeps the earliest row but backfills a missing memory_id.
    pub async fn record(
        mm: &ModelManager,
        payload_sha: &str,
        payload_md: &str,
        memory_id: Option<&str>,
        target_space: &str,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO knowledge_candidates
                   (payload_sha, payload_md, memory_id, target_space, created_ts)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(payload_sha) DO UPDATE SET
                   memory_id = COALESCE(knowledge_candidates.memory_id, excluded.memory_id)",
            )
            .await?;
        stmt.execute((
            payload_sha,
            payload_md,
            opt_text(memory_id.map(str::to_string)),
            target_space,
            now_z().as_str(),
        ))
        .await?;
        Ok(())
    }

    /// Prefix-text fallback query for degraded search.
    pub async fn search_prefix(
        mm: &ModelManager,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeCandidate>> {
        let db = mm.db();
        let pattern = format!("{}%", query.replace('%', "").replace('_', ""));
        let stmt = db
            .prepare(
                "SELECT id, payload_sha, payload_md, memory_id, target_space, created_ts
                 FROM knowledge_candidates
                 WHERE payload_md LIKE ?
                 ORDER BY id DESC LIMIT ?",
            )
            .await?;
        let mut rows = stmt.query((pattern.as_str(), limit as i64)).await?;
        let mut res = Vec::new();
        while let Some(row) = rows.next().await? {
            res.push(Self::from_row(row)?);
        }
        Ok(res)
    }

    fn from_row(row: libsql::Row) -> Result<KnowledgeCandidate> {
        Ok(KnowledgeCandidate {
            id: row.get(0)?,
            payload_sha: row.get(1)?,
            payload_md: row.get(2)?,
            memory_id: row.get(3)?,
            target_space: row.get(4)?,
            created_ts: row.get(5)?,
        })
    }
}
