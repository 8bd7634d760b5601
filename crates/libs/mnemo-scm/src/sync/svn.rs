//! SVN revision sync.
//!
//! Revisions are totally ordered by `rev_num`, so the watermark is a plain
//! integer. Patch fetching over SVN is slow; the loop renews its lease
//! every `renew_interval_revs` processed revisions, and a failed renew
//! aborts the run without advancing the cursor past completed work.

use crate::diffstat::{generate_diffstat, generate_ministat_from_changed_paths};
use crate::policy::{DiffMode, SvnPatchFetchController};
use crate::svn::{SvnAdapter, SvnLogEntry};
use crate::sync::{JOB_TYPE_SVN, SyncMode, SyncReport};
use mnemo_core::artifact::build_scm_artifact_path;
use mnemo_core::ids::{SourceId, build_patch_blob_evidence_uri};
use mnemo_core::model::ModelManager;
use mnemo_core::model::cursor::{CursorBmc, CursorTarget};
use mnemo_core::model::lease::LeaseBmc;
use mnemo_core::model::patch_blob::{PatchBlobBmc, PatchBlobForCreate, PatchFormat};
use mnemo_core::model::repo::Repo;
use mnemo_core::model::svn_revision::{SvnRevisionBmc, SvnRevisionForUpsert};
use mnemo_core::model::sync_run::{RunCounts, RunStatus, SyncRunBmc};
use mnemo_core::{ErrorCategory, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SvnSyncConfig {
    pub batch_size: usize,
    pub overlap: i64,
    pub mode: SyncMode,
    pub diff_mode: DiffMode,
    pub lease_seconds: i64,
    pub renew_interval_revs: usize,
    pub bulk_changed_paths_threshold: i64,
    pub bulk_diff_size_threshold: i64,
}

pub struct SvnSync<'a> {
    mm: &'a ModelManager,
    adapter: &'a SvnAdapter,
    config: SvnSyncConfig,
}

impl<'a> SvnSync<'a> {
    pub fn new(mm: &'a ModelManager, adapter: &'a SvnAdapter, config: SvnSyncConfig) -> Self {
        SvnSync {
            mm,
            adapter,
            config,
        }
    }

    /// One sync invocation for `repo` under `worker_id`.
    pub async fn run(&self, repo: &Repo, worker_id: &str) -> Result<SyncReport> {
        let claimed = LeaseBmc::claim(
            self.mm,
            repo.repo_id,
            JOB_TYPE_SVN,
            worker_id,
            self.config.lease_seconds,
        )
        .await?;
        if !claimed {
            info!(repo_id = repo.repo_id, "svn sync lease held elsewhere, skipping");
            return Ok(SyncReport::locked());
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let cursor = CursorBmc::load(self.mm, repo.repo_id, JOB_TYPE_SVN).await?;
        let cursor_before = cursor.as_ref().map(|c| c.describe());

        SyncRunBmc::start(
            self.mm,
            &run_id,
            repo.repo_id,
            JOB_TYPE_SVN,
            self.config.mode.as_str(),
            cursor_before.clone(),
        )
        .await?;

        let result = self.run_inner(repo, worker_id, cursor.as_ref().and_then(|c| c.last_rev)).await;

        let (status, counts, cursor_after, error_summary) = match &result {
            Ok((counts, cursor_after)) => {
                let status = if counts.fetched == 0 {
                    RunStatus::NoData
                } else {
                    RunStatus::Completed
                };
                (status, counts.clone(), cursor_after.clone(), None)
            }
            Err(e) => (
                RunStatus::Failed,
                RunCounts::default(),
                None,
                Some(e.to_string()),
            ),
        };

        SyncRunBmc::finish(
            self.mm,
            &run_id,
            status,
            cursor_after.clone(),
            &counts,
            error_summary,
            None,
        )
        .await?;
        let _ = LeaseBmc::release(self.mm, repo.repo_id, JOB_TYPE_SVN, worker_id).await?;

        result.map(|(counts, cursor_after)| SyncReport {
            run_id,
            locked: false,
            skipped: false,
            status: status.as_str().to_string(),
            counts,
            cursor_before,
            cursor_after,
        })
    }

    async fn run_inner(
        &self,
        repo: &Repo,
        worker_id: &str,
        last_rev: Option<i64>,
    ) -> Result<(RunCounts, Option<String>)> {
        let mut counts = RunCounts::default();

        // [last_rev + 1 - overlap, HEAD], floored at r1.
        let start_rev = (last_rev.unwrap_or(0) + 1 - self.config.overlap).max(1);

        // One extra entry tells us whether the batch was truncated.
        let entries = match self
            .adapter
            .fetch_log(&repo.url, start_rev, self.config.batch_size + 1)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(repo_id = repo.repo_id, error = %e, "svn log fetch failed");
                return Err(mnemo_core::Error::InvalidInput(format!(
                    "svn log fetch failed: {e}"
                )));
            }
        };

        // Watermark filter (overlap re-reads already persisted revisions),
        // then ascending order and batch truncation.
        let watermark = last_rev.unwrap_or(0);
        let mut entries: Vec<SvnLogEntry> = entries
            .into_iter()
            .filter(|e| e.revision > watermark)
            .collect();
        entries.sort_by_key(|e| e.revision);
        counts.has_more = entries.len() > self.config.batch_size;
        entries.truncate(self.config.batch_size);
        counts.fetched = entries.len();

        if entries.is_empty() {
            return Ok((counts, None));
        }

        let mut fetch_controller = SvnPatchFetchController::new(self.config.renew_interval_revs);
        let mut last_success: Option<i64> = None;
        let mut stopped = false;

        for entry in &entries {
            let changed_paths_count = entry.changed_paths.len() as i64;
            let mut is_bulk = changed_paths_count > self.config.bulk_changed_paths_threshold;
            let mut bulk_reason = is_bulk.then(|| {
                format!(
                    "changed_paths={changed_paths_count}>{}",
                    self.config.bulk_changed_paths_threshold
                )
            });

            // Patch content first: its size can reclassify the revision
            // as bulk before the row is persisted.
            let mut blob_plan: Option<BlobPlan> = None;
            if self.config.diff_mode != DiffMode::None {
                match self.adapter.fetch_diff(&repo.url, entry.revision).await {
                    Ok(diff) => {
                        if diff.len() as i64 > self.config.bulk_diff_size_threshold {
                            is_bulk = true;
                            bulk_reason = Some(format!(
                                "diff_size={}>{}",
                                diff.len(),
                                self.config.bulk_diff_size_threshold
                            ));
                        }
                        blob_plan = Some(BlobPlan::Content { diff });
                    }
                    Err(e) => {
                        if e.category.unrecoverable() {
                            counts.unrecoverable_errors.push(e.category.as_str().to_string());
                        }
                        match self.config.diff_mode {
                            DiffMode::Always => {
                                blob_plan = Some(BlobPlan::Failed {
                                    category: e.category,
                                    message: e.message.clone(),
                                    endpoint: e.endpoint.clone(),
                                });
                                if self.config.mode == SyncMode::Strict
                                    && e.category.unrecoverable()
                                {
                                    stopped = true;
                                }
                            }
                            DiffMode::BestEffort => {
                                counts.missing_types.push("diff".to_string());
                                blob_plan = Some(BlobPlan::Degraded {
                                    category: e.category,
                                });
                            }
                            DiffMode::None => {}
                        }
                    }
                }
            }

            let meta = serde_json::json!({
                "changed_paths": entry.changed_paths,
                "changed_paths_count": changed_paths_count,
            });
            SvnRevisionBmc::upsert(
                self.mm,
                SvnRevisionForUpsert {
                    repo_id: repo.repo_id,
                    rev_num: entry.revision,
                    author_raw: entry.author.clone(),
                    ts: entry.date.clone(),
                    message: entry.message.clone(),
                    is_merge: false,
                    is_bulk,
                    bulk_reason,
                    meta_json: Some(meta),
                },
            )
            .await?;
            counts.persisted += 1;

            if let Some(plan) = blob_plan {
                self.apply_blob_plan(repo, entry, is_bulk, plan, &mut counts)
                    .await?;
            }

            if stopped {
                counts.cursor_advance_stopped_at = last_success.map(|r| format!("r{r}"));
                break;
            }
            last_success = Some(entry.revision);

            if fetch_controller.should_renew() {
                let renewed = LeaseBmc::renew(
                    self.mm,
                    repo.repo_id,
                    JOB_TYPE_SVN,
                    worker_id,
                    self.config.lease_seconds,
                )
                .await?;
                if !renewed {
                    warn!(repo_id = repo.repo_id, "svn sync lease lost mid-run, aborting");
                    break;
                }
            }
        }

        // Cursor advancement: strict stops at the last success, best-effort
        // advances over failures.
        let target_rev = if self.config.mode == SyncMode::Strict {
            last_success
        } else {
            entries.last().map(|e| e.revision)
        };
        let cursor_after = match target_rev {
            Some(rev) => {
                CursorBmc::save(
                    self.mm,
                    repo.repo_id,
                    JOB_TYPE_SVN,
                    &CursorTarget::SvnRev(rev),
                    counts.persisted as i64,
                )
                .await?;
                Some(format!("r{rev}"))
            }
            None => None,
        };

        Ok((counts, cursor_after))
    }

    async fn apply_blob_plan(
        &self,
        repo: &Repo,
        entry: &SvnLogEntry,
        is_bulk: bool,
        plan: BlobPlan,
        counts: &mut RunCounts,
    ) -> Result<()> {
        let source_id = SourceId::svn(repo.repo_id, entry.revision);
        // Bulk content is summarized as diffstat; a degraded fetch is
        // downgraded to ministat.
        let format = match &plan {
            BlobPlan::Degraded { .. } => PatchFormat::Ministat,
            _ if is_bulk => PatchFormat::Diffstat,
            _ => PatchFormat::Diff,
        };
        let blob_id = PatchBlobBmc::create_pending(
            self.mm,
            PatchBlobForCreate {
                source_type: "svn".to_string(),
                source_id: source_id.to_string(),
                format,
                sha256: None,
            },
        )
        .await?;
        if !PatchBlobBmc::claim_in_progress(self.mm, blob_id).await? {
            return Ok(());
        }

        match plan {
            BlobPlan::Content { diff } => {
                let body = match format {
                    PatchFormat::Diffstat => generate_diffstat(&diff),
                    _ => diff,
                };
                self.write_blob(repo, entry, blob_id, format, &body, false, None)
                    .await?;
                counts.blobs_done += 1;
            }
            BlobPlan::Degraded { category } => {
                let body = generate_ministat_from_changed_paths(&entry.changed_paths);
                self.write_blob(
                    repo,
                    entry,
                    blob_id,
                    format,
                    &body,
                    true,
                    Some(category.as_str()),
                )
                .await?;
                counts.blobs_done += 1;
                counts.degraded += 1;
            }
            BlobPlan::Failed {
                category,
                message,
                endpoint,
            } => {
                PatchBlobBmc::mark_failed(self.mm, blob_id, category, &message, endpoint.as_deref())
                    .await?;
                counts.blobs_failed += 1;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_blob(
        &self,
        repo: &Repo,
        entry: &SvnLogEntry,
        blob_id: i64,
        format: PatchFormat,
        body: &str,
        degraded: bool,
        degrade_reason: Option<&str>,
    ) -> Result<()> {
        let sha = mnemo_core::artifact::sha256_hex(body.as_bytes());
        let source_id = SourceId::svn(repo.repo_id, entry.revision);
        let rel_path = build_scm_artifact_path(
            &repo.project_key,
            &repo.repo_id.to_string(),
            "svn",
            &format!("r{}", entry.revision),
            &sha,
            format.ext(),
        )?;
        let info = self.mm.artifacts().put(&rel_path, body.as_bytes())?;
        let evidence_uri = build_patch_blob_evidence_uri("svn", &source_id.to_string(), &sha);
        let updated = PatchBlobBmc::mark_done(
            self.mm,
            blob_id,
            &info.uri,
            &sha,
            body.len() as i64,
            &evidence_uri,
            degraded,
            degrade_reason,
        )
        .await?;
        if !updated {
            warn!(blob_id, "svn blob finalize lost a race, leaving row as-is");
        }
        Ok(())
    }
}

enum BlobPlan {
    Content { diff: String },
    Degraded { category: ErrorCategory },
    Failed {
        category: ErrorCategory,
        message: String,
        endpoint: Option<String>,
    },
}
