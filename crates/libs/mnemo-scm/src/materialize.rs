//! Patch blob materialization.
//!
//! Takes `patch_blobs` rows whose `uri` is absent or unresolvable, fetches
//! the content from the owning SCM, derives the body for the row's format,
//! verifies the sha256 against the stored expectation, writes the artifact,
//! and finalizes the row with a conditional update.
//!
//! Sha mismatches follow the configured policy: `strict` marks the row
//! failed without writing any artifact (no orphan file), `mirror` writes
//! the observed content at a path keyed by its actual sha and records
//! `mirror_uri` for forensic access while the row stays failed.

use crate::AdapterError;
use crate::diffstat::{
    generate_diffstat, generate_ministat_from_changed_paths, generate_ministat_from_diff,
    generate_ministat_from_stats,
};
use crate::gitlab::GitLabClient;
use crate::svn::{SvnAdapter, SvnChangedPath};
use mnemo_core::artifact::build_scm_artifact_path;
use mnemo_core::ids::{SourceId, build_patch_blob_evidence_uri};
use mnemo_core::model::ModelManager;
use mnemo_core::model::git_commit::GitCommitBmc;
use mnemo_core::model::patch_blob::{MaterializeStatus, PatchBlob, PatchBlobBmc, PatchFormat};
use mnemo_core::model::repo::{Repo, RepoBmc};
use mnemo_core::model::svn_revision::SvnRevisionBmc;
use mnemo_core::{ErrorCategory, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Default content cap: 10 MiB.
pub const MAX_DIFF_SIZE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaMismatchPolicy {
    Strict,
    Mirror,
}

impl ShaMismatchPolicy {
    pub fn parse(s: &str) -> Self {
        match s {
            "mirror" => ShaMismatchPolicy::Mirror,
            _ => ShaMismatchPolicy::Strict,
        }
    }
}

/// Outcome of one blob materialization attempt. `Skipped` outcomes are
/// reported in the batch summary but never stored as a row status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeOutcome {
    Done {
        uri: String,
        sha256: String,
        size_bytes: usize,
    },
    /// Row already resolved or owned by another worker.
    Skipped { reason: &'static str },
    Failed {
        category: ErrorCategory,
    },
    /// Sha mismatch under the mirror policy: failed, but content kept.
    Mirrored {
        mirror_uri: String,
        actual_sha256: String,
    },
}

/// Per-batch counters, keyed the way operators read them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub mirrored: usize,
    pub by_category: BTreeMap<String, usize>,
}

/// Content source abstraction so the algorithm can be exercised without
/// a live SVN or GitLab behind it.
pub trait PatchFetcher: Send + Sync {
    fn fetch_diff(
        &self,
        repo: &Repo,
        source: &SourceId,
    ) -> impl std::future::Future<Output = std::result::Result<String, AdapterError>> + Send;
}

/// Production fetcher: routes to the SVN CLI or the GitLab API by source
/// type.
pub struct LivePatchFetcher {
    pub svn: SvnAdapter,
    pub gitlab: Option<GitLabClient>,
    /// Explicit project id/path override; defaults to the repo URL path.
    pub gitlab_project_id: Option<String>,
}

impl PatchFetcher for LivePatchFetcher {
    async fn fetch_diff(
        &self,
        repo: &Repo,
        source: &SourceId,
    ) -> std::result::Result<String, AdapterError> {
        match source {
            SourceId::Svn { rev, .. } => self.svn.fetch_diff(&repo.url, *rev).await,
            SourceId::Git { sha, .. } => {
                let client = self.gitlab.as_ref().ok_or_else(|| {
                    AdapterError::new(
                        ErrorCategory::DependencyMissing,
                        "gitlab client not configured",
                    )
                })?;
                let project_id = self
                    .gitlab_project_id
                    .clone()
                    .or_else(|| project_path_from_url(&repo.url))
                    .ok_or_else(|| {
                        AdapterError::new(
                            ErrorCategory::ValidationError,
                            format!("cannot derive project path from {}", repo.url),
                        )
                    })?;
                client.get_commit_diff_text(&project_id, sha).await
            }
            SourceId::Mr { .. } => Err(AdapterError::new(
                ErrorCategory::ValidationError,
                "merge requests carry no direct diff blob",
            )),
        }
    }
}

/// `https://gitlab.example.com/group/proj` → `group/proj`
pub fn project_path_from_url(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let (_host, path) = rest.split_once('/')?;
    if path.is_empty() {
        return None;
    }
    Some(path.to_string())
}

pub struct Materializer<'a, F> {
    mm: &'a ModelManager,
    fetcher: &'a F,
    max_size_bytes: usize,
    sha_mismatch_policy: ShaMismatchPolicy,
}

impl<'a, F: PatchFetcher> Materializer<'a, F> {
    pub fn new(
        mm: &'a ModelManager,
        fetcher: &'a F,
        max_size_bytes: usize,
        sha_mismatch_policy: ShaMismatchPolicy,
    ) -> Self {
        Materializer {
            mm,
            fetcher,
            max_size_bytes,
            sha_mismatch_policy,
        }
    }

    /// Materialize one blob end to end.
    pub async fn materialize_blob(&self, blob_id: i64) -> Result<MaterializeOutcome> {
        let blob = PatchBlobBmc::get(self.mm, blob_id).await?;

        // Already resolved: nothing to do.
        if blob.materialize_status == MaterializeStatus::Done
            && blob
                .uri
                .as_deref()
                .is_some_and(|u| self.mm.artifacts().exists(u))
        {
            return Ok(MaterializeOutcome::Skipped {
                reason: "already_materialized",
            });
        }

        // Advisory claim; losing it means another worker is on the row.
        if !PatchBlobBmc::claim_in_progress(self.mm, blob_id).await? {
            return Ok(MaterializeOutcome::Skipped {
                reason: "owned_by_other_worker",
            });
        }

        let source = match SourceId::parse(&blob.source_id) {
            Ok(source) => source,
            Err(e) => {
                PatchBlobBmc::mark_failed(
                    self.mm,
                    blob_id,
                    ErrorCategory::ValidationError,
                    &e.to_string(),
                    None,
                )
                .await?;
                return Ok(MaterializeOutcome::Failed {
                    category: ErrorCategory::ValidationError,
                });
            }
        };

        let repo = match RepoBmc::get(self.mm, source.repo_id()).await {
            Ok(repo) => repo,
            Err(e) => {
                PatchBlobBmc::mark_failed(
                    self.mm,
                    blob_id,
                    ErrorCategory::ValidationError,
                    &e.to_string(),
                    None,
                )
                .await?;
                return Ok(MaterializeOutcome::Failed {
                    category: ErrorCategory::ValidationError,
                });
            }
        };

        let body = match self.derive_body(&blob, &repo, &source).await {
            Ok(body) => body,
            Err(err) => {
                PatchBlobBmc::mark_failed(
                    self.mm,
                    blob_id,
                    err.category,
                    &err.message,
                    err.endpoint.as_deref(),
                )
                .await?;
                return Ok(MaterializeOutcome::Failed {
                    category: err.category,
                });
            }
        };

        if body.len() > self.max_size_bytes {
            let msg = format!(
                "content {} bytes exceeds cap {}",
                body.len(),
                self.max_size_bytes
            );
            PatchBlobBmc::mark_failed(
                self.mm,
                blob_id,
                ErrorCategory::ContentTooLarge,
                &msg,
                None,
            )
            .await?;
            return Ok(MaterializeOutcome::Failed {
                category: ErrorCategory::ContentTooLarge,
            });
        }

        let actual_sha = mnemo_core::artifact::sha256_hex(body.as_bytes());

        // Expected-sha verification.
        if let Some(expected) = blob
            .sha256
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            && expected != actual_sha
        {
            return self
                .handle_sha_mismatch(&blob, &repo, &source, &body, &expected, &actual_sha)
                .await;
        }

        // Write the artifact, then finalize the row.
        let rel_path = build_scm_artifact_path(
            &repo.project_key,
            &repo.repo_id.to_string(),
            &blob.source_type,
            &source.rev_or_sha(),
            &actual_sha,
            blob.format.ext(),
        )?;
        let info = self.mm.artifacts().put(&rel_path, body.as_bytes())?;
        let evidence_uri =
            build_patch_blob_evidence_uri(&blob.source_type, &blob.source_id, &actual_sha);

        let updated = PatchBlobBmc::mark_done(
            self.mm,
            blob_id,
            &info.uri,
            &actual_sha,
            body.len() as i64,
            &evidence_uri,
            false,
            None,
        )
        .await?;
        if !updated {
            // Concurrency lost after the artifact write; the store is
            // content-addressed, so the orphan re-put is a no-op later.
            return Ok(MaterializeOutcome::Skipped {
                reason: "finalize_lost_race",
            });
        }

        info!(blob_id, uri = %info.uri, size = body.len(), "materialized patch blob");
        Ok(MaterializeOutcome::Done {
            uri: info.uri,
            sha256: actual_sha,
            size_bytes: body.len(),
        })
    }

    /// Process a batch of unresolved blobs, reporting per-outcome counts.
    pub async fn materialize_batch(
        &self,
        retry_failed: bool,
        source_type: Option<&str>,
        batch_size: usize,
    ) -> Result<BatchSummary> {
        let blobs =
            PatchBlobBmc::list_for_materialize(self.mm, retry_failed, source_type, batch_size)
                .await?;
        let mut summary = BatchSummary::default();

        for blob in blobs {
            summary.processed += 1;
            match self.materialize_blob(blob.blob_id).await? {
                MaterializeOutcome::Done { .. } => summary.done += 1,
                MaterializeOutcome::Skipped { .. } => summary.skipped += 1,
                MaterializeOutcome::Failed { category } => {
                    summary.failed += 1;
                    *summary
                        .by_category
                        .entry(category.as_str().to_string())
                        .or_insert(0) += 1;
                }
                MaterializeOutcome::Mirrored { .. } => {
                    summary.mirrored += 1;
                    *summary
                        .by_category
                        .entry(ErrorCategory::ValidationError.as_str().to_string())
                        .or_insert(0) += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Derive the body for the blob's format (§ materialize step 4).
    async fn derive_body(
        &self,
        blob: &PatchBlob,
        repo: &Repo,
        source: &SourceId,
    ) -> std::result::Result<String, AdapterError> {
        match blob.format {
            PatchFormat::Diff => self.fetcher.fetch_diff(repo, source).await,
            PatchFormat::Diffstat => {
                let diff = self.fetcher.fetch_diff(repo, source).await?;
                Ok(generate_diffstat(&diff))
            }
            PatchFormat::Ministat => self.derive_ministat(repo, source).await,
        }
    }

    /// Ministat prefers recorded metadata; the diff fetch is the last
    /// resort.
    async fn derive_ministat(
        &self,
        repo: &Repo,
        source: &SourceId,
    ) -> std::result::Result<String, AdapterError> {
        match source {
            SourceId::Git { repo_id, sha } => {
                if let Ok(commit) = GitCommitBmc::get(self.mm, *repo_id, sha).await {
                    let stats = commit.change_summary();
                    if stats.total_changes > 0 || stats.files_changed > 0 {
                        let (additions, deletions) = commit
                            .meta_json
                            .as_ref()
                            .and_then(|m| m.get("stats"))
                            .map(|s| {
                                (
                                    s.get("additions").and_then(|v| v.as_i64()).unwrap_or(0),
                                    s.get("deletions").and_then(|v| v.as_i64()).unwrap_or(0),
                                )
                            })
                            .unwrap_or((0, 0));
                        return Ok(generate_ministat_from_stats(
                            additions,
                            deletions,
                            stats.total_changes,
                        ));
                    }
                }
                let diff = self.fetcher.fetch_diff(repo, source).await?;
                Ok(generate_ministat_from_diff(&diff))
            }
            SourceId::Svn { repo_id, rev } => {
                if let Ok(revision) = SvnRevisionBmc::get(self.mm, *repo_id, *rev).await
                    && let Some(paths) = revision
                        .meta_json
                        .as_ref()
                        .and_then(|m| m.get("changed_paths"))
                        .and_then(|v| {
                            serde_json::from_value::<Vec<SvnChangedPath>>(v.clone()).ok()
                        })
                    && !paths.is_empty()
                {
                    return Ok(generate_ministat_from_changed_paths(&paths));
                }
                let diff = self.fetcher.fetch_diff(repo, source).await?;
                Ok(generate_ministat_from_diff(&diff))
            }
            SourceId::Mr { .. } => Err(AdapterError::new(
                ErrorCategory::ValidationError,
                "merge requests carry no direct diff blob",
            )),
        }
    }

    async fn handle_sha_mismatch(
        &self,
        blob: &PatchBlob,
        repo: &Repo,
        source: &SourceId,
        body: &str,
        expected: &str,
        actual: &str,
    ) -> Result<MaterializeOutcome> {
        let msg = format!("sha256 mismatch: expected {expected}, got {actual}");
        warn!(blob_id = blob.blob_id, %msg, "patch blob checksum disagreement");

        match self.sha_mismatch_policy {
            ShaMismatchPolicy::Strict => {
                // No artifact write: strict mode must not leave an orphan.
                PatchBlobBmc::mark_failed(
                    self.mm,
                    blob.blob_id,
                    ErrorCategory::ValidationError,
                    &msg,
                    None,
                )
                .await?;
                Ok(MaterializeOutcome::Failed {
                    category: ErrorCategory::ValidationError,
                })
            }
            ShaMismatchPolicy::Mirror => {
                let rel_path = build_scm_artifact_path(
                    &repo.project_key,
                    &repo.repo_id.to_string(),
                    &blob.source_type,
                    &source.rev_or_sha(),
                    actual,
                    blob.format.ext(),
                )?;
                let info = self.mm.artifacts().put(&rel_path, body.as_bytes())?;
                PatchBlobBmc::mark_failed_with_mirror(
                    self.mm,
                    blob.blob_id,
                    &info.uri,
                    actual,
                    &msg,
                )
                .await?;
                Ok(MaterializeOutcome::Mirrored {
                    mirror_uri: info.uri,
                    actual_sha256: actual.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_path_extraction() {
        assert_eq!(
            project_path_from_url("https://gitlab.example.com/group/proj").as_deref(),
            Some("group/proj")
        );
        assert_eq!(
            project_path_from_url("https://gitlab.example.com/a/b/c").as_deref(),
            Some("a/b/c")
        );
        assert!(project_path_from_url("https://gitlab.example.com").is_none());
        assert!(project_path_from_url("no-scheme").is_none());
    }

    #[test]
    fn sha_mismatch_policy_parse() {
        assert_eq!(ShaMismatchPolicy::parse("mirror"), ShaMismatchPolicy::Mirror);
        assert_eq!(ShaMismatchPolicy::parse("strict"), ShaMismatchPolicy::Strict);
        assert_eq!(ShaMismatchPolicy::parse("anything"), ShaMismatchPolicy::Strict);
    }
}
