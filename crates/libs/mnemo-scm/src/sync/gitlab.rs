//! GitLab commit sync.
//!
//! Commits are ordered by `(committed_date, sha)`; the sha tie-break makes
//! a burst of same-second commits process deterministically in one run.
//! The degradation controller tunes the window, batch size, and diff mode
//! between runs in loop mode.

use crate::diffstat::{generate_diffstat, generate_ministat_from_stats};
use crate::gitlab::{DiffOutcome, GitLabClient, GitLabCommit};
use crate::policy::{BatchObservation, DegradationController, DiffMode};
use crate::sync::{JOB_TYPE_GITLAB_COMMITS, SyncMode, SyncReport};
use crate::window::{
    EventKey, FetchWindow, WindowParams, compute_window, filter_past_watermark, sort_ascending,
};
use mnemo_core::artifact::build_scm_artifact_path;
use mnemo_core::ids::{SourceId, build_patch_blob_evidence_uri};
use mnemo_core::model::ModelManager;
use mnemo_core::model::cursor::{Cursor, CursorBmc, CursorTarget};
use mnemo_core::model::git_commit::{GitCommitBmc, GitCommitForUpsert};
use mnemo_core::model::lease::LeaseBmc;
use mnemo_core::model::patch_blob::{PatchBlobBmc, PatchBlobForCreate, PatchFormat};
use mnemo_core::model::repo::Repo;
use mnemo_core::model::sync_run::{RunCounts, RunStatus, SyncRunBmc};
use mnemo_core::time::normalize_iso_ts_z;
use mnemo_core::{ErrorCategory, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GitLabSyncConfig {
    pub project_id: String,
    pub ref_name: Option<String>,
    pub mode: SyncMode,
    pub lease_seconds: i64,
    pub max_diff_size_bytes: usize,
    pub bulk_total_changes_threshold: i64,
    pub bulk_files_changed_threshold: i64,
    pub bulk_diff_size_threshold: i64,
    pub window: WindowParams,
}

/// Normalized commit event, ready for dedup/sort/persist.
#[derive(Debug, Clone)]
struct CommitEvent {
    sha: String,
    ts: String,
    commit: GitLabCommit,
}

pub struct GitLabSync<'a> {
    mm: &'a ModelManager,
    client: &'a GitLabClient,
    config: GitLabSyncConfig,
}

impl<'a> GitLabSync<'a> {
    pub fn new(mm: &'a ModelManager, client: &'a GitLabClient, config: GitLabSyncConfig) -> Self {
        GitLabSync { mm, client, config }
    }

    /// One sync invocation; the controller carries adaptive state across
    /// invocations in loop mode.
    pub async fn run(
        &self,
        repo: &Repo,
        worker_id: &str,
        controller: &mut DegradationController,
    ) -> Result<SyncReport> {
        let claimed = LeaseBmc::claim(
            self.mm,
            repo.repo_id,
            JOB_TYPE_GITLAB_COMMITS,
            worker_id,
            self.config.lease_seconds,
        )
        .await?;
        if !claimed {
            info!(repo_id = repo.repo_id, "gitlab sync lease held elsewhere, skipping");
            return Ok(SyncReport::locked());
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let cursor = CursorBmc::load(self.mm, repo.repo_id, JOB_TYPE_GITLAB_COMMITS).await?;
        let cursor_before = cursor.as_ref().map(|c| c.describe());

        SyncRunBmc::start(
            self.mm,
            &run_id,
            repo.repo_id,
            JOB_TYPE_GITLAB_COMMITS,
            self.config.mode.as_str(),
            cursor_before.clone(),
        )
        .await?;

        let result = self.run_inner(repo, cursor.as_ref(), controller).await;

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

        let degradation = serde_json::to_value(controller.snapshot()).ok();
        SyncRunBmc::finish(
            self.mm,
            &run_id,
            status,
            cursor_after.clone(),
            &counts,
            error_summary,
            degradation,
        )
        .await?;
        let _ = LeaseBmc::release(self.mm, repo.repo_id, JOB_TYPE_GITLAB_COMMITS, worker_id)
            .await?;

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
        cursor: Option<&Cursor>,
        controller: &mut DegradationController,
    ) -> Result<(RunCounts, Option<String>)> {
        let mut counts = RunCounts::default();
        let mut observation = BatchObservation::default();
        let batch_size = controller.batch_size();
        let diff_mode = controller.diff_mode();

        let window_params = WindowParams {
            forward_window_seconds: controller.forward_window_seconds(),
            ..self.config.window
        };
        let window: FetchWindow =
            compute_window(cursor, &window_params, chrono::Utc::now());

        let fetched = self
            .client
            .get_commits_window(
                &self.config.project_id,
                Some(&window.since),
                Some(&window.until),
                self.config.ref_name.as_deref(),
                batch_size + 1,
            )
            .await;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                observation.note(e.category);
                controller.observe(&observation);
                warn!(repo_id = repo.repo_id, error = %e, "gitlab commit fetch failed");
                return Err(mnemo_core::Error::InvalidInput(format!(
                    "gitlab commit fetch failed: {e}"
                )));
            }
        };

        // Normalize, watermark-filter, sort ascending, truncate.
        let events: Vec<CommitEvent> = fetched
            .into_iter()
            .filter_map(|commit| {
                let ts = commit
                    .committed_date
                    .as_deref()
                    .and_then(normalize_iso_ts_z)?;
                Some(CommitEvent {
                    sha: commit.id.to_lowercase(),
                    ts,
                    commit,
                })
            })
            .collect();

        let mut events = filter_past_watermark(events, cursor, |e| {
            EventKey::new(e.ts.clone(), e.sha.clone())
        });
        sort_ascending(&mut events, |e| EventKey::new(e.ts.clone(), e.sha.clone()));
        counts.has_more = events.len() > batch_size;
        events.truncate(batch_size);
        counts.fetched = events.len();

        if events.is_empty() {
            controller.observe(&observation);
            return Ok((counts, None));
        }

        let mut last_success: Option<&CommitEvent> = None;
        let mut stopped = false;

        for event in &events {
            let stats = event.commit.stats.clone().unwrap_or_default();
            let mut is_bulk = stats.total > self.config.bulk_total_changes_threshold;
            let mut bulk_reason = is_bulk.then(|| {
                format!(
                    "total_changes={}>{}",
                    stats.total, self.config.bulk_total_changes_threshold
                )
            });

            let mut blob_plan: Option<BlobPlan> = None;
            if diff_mode != DiffMode::None {
                match self
                    .client
                    .get_commit_diff_safe(
                        &self.config.project_id,
                        &event.sha,
                        self.config.max_diff_size_bytes,
                    )
                    .await
                {
                    Ok(DiffOutcome::Ok(diff)) => {
                        let files_changed = crate::diffstat::count_files_changed(&diff) as i64;
                        if files_changed > self.config.bulk_files_changed_threshold {
                            is_bulk = true;
                            bulk_reason = Some(format!(
                                "files_changed={files_changed}>{}",
                                self.config.bulk_files_changed_threshold
                            ));
                        }
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
                    Ok(DiffOutcome::TooLarge { size, max }) => {
                        observation.note(ErrorCategory::ContentTooLarge);
                        // Size overflow is recoverable: degrade, advance.
                        counts.missing_types.push("diff".to_string());
                        blob_plan = Some(BlobPlan::Degraded {
                            category: ErrorCategory::ContentTooLarge,
                            stats: stats.clone(),
                        });
                        is_bulk = true;
                        bulk_reason = Some(format!("diff_size={size}>{max}"));
                    }
                    Err(e) => {
                        observation.note(e.category);
                        if e.category.unrecoverable() {
                            counts
                                .unrecoverable_errors
                                .push(e.category.as_str().to_string());
                        }
                        match diff_mode {
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
                                    stats: stats.clone(),
                                });
                            }
                            DiffMode::None => {}
                        }
                    }
                }
            }

            let meta = serde_json::json!({
                "parent_ids": event.commit.parent_ids,
                "stats": {
                    "additions": stats.additions,
                    "deletions": stats.deletions,
                    "total_changes": stats.total,
                },
                "web_url": event.commit.web_url,
            });
            GitCommitBmc::upsert(
                self.mm,
                GitCommitForUpsert {
                    repo_id: repo.repo_id,
                    commit_sha: event.sha.clone(),
                    author_raw: format!(
                        "{} <{}>",
                        event.commit.author_name, event.commit.author_email
                    ),
                    ts: Some(event.ts.clone()),
                    message: event.commit.message.clone(),
                    is_merge: event.commit.parent_ids.len() > 1,
                    is_bulk,
                    bulk_reason,
                    meta_json: Some(meta),
                },
            )
            .await?;
            counts.persisted += 1;

            if let Some(plan) = blob_plan {
                self.apply_blob_plan(repo, event, is_bulk, plan, &mut counts)
                    .await?;
            }

            if stopped {
                counts.cursor_advance_stopped_at = last_success.map(|e| e.sha.clone());
                break;
            }
            last_success = Some(event);
        }

        observation.commit_count = counts.persisted;
        controller.observe(&observation);

        // Cursor advancement per the strict/best-effort table.
        let target = if self.config.mode == SyncMode::Strict {
            last_success
        } else {
            events.last()
        };
        let cursor_after = match target {
            Some(event) => {
                CursorBmc::save(
                    self.mm,
                    repo.repo_id,
                    JOB_TYPE_GITLAB_COMMITS,
                    &CursorTarget::Git {
                        ts: event.ts.clone(),
                        sha: event.sha.clone(),
                    },
                    counts.persisted as i64,
                )
                .await?;
                Some(format!("{}@{}", event.ts, event.sha))
            }
            None => None,
        };

        Ok((counts, cursor_after))
    }

    async fn apply_blob_plan(
        &self,
        repo: &Repo,
        event: &CommitEvent,
        is_bulk: bool,
        plan: BlobPlan,
        counts: &mut RunCounts,
    ) -> Result<()> {
        let source_id = SourceId::git(repo.repo_id, event.sha.as_str());
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
                source_type: "git".to_string(),
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
                self.write_blob(repo, event, blob_id, format, &body, false, None)
                    .await?;
                counts.blobs_done += 1;
            }
            BlobPlan::Degraded { category, stats } => {
                let body =
                    generate_ministat_from_stats(stats.additions, stats.deletions, stats.total);
                self.write_blob(
                    repo,
                    event,
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
        event: &CommitEvent,
        blob_id: i64,
        format: PatchFormat,
        body: &str,
        degraded: bool,
        degrade_reason: Option<&str>,
    ) -> Result<()> {
        let sha = mnemo_core::artifact::sha256_hex(body.as_bytes());
        let source_id = SourceId::git(repo.repo_id, event.sha.as_str());
        let rel_path = build_scm_artifact_path(
            &repo.project_key,
            &repo.repo_id.to_string(),
            "git",
            &event.sha,
            &sha,
            format.ext(),
        )?;
        let info = self.mm.artifacts().put(&rel_path, body.as_bytes())?;
        let evidence_uri = build_patch_blob_evidence_uri("git", &source_id.to_string(), &sha);
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
            warn!(blob_id, "gitlab blob finalize lost a race, leaving row as-is");
        }
        Ok(())
    }
}

enum BlobPlan {
    Content {
        diff: String,
    },
    Degraded {
        category: ErrorCategory,
        stats: crate::gitlab::GitLabCommitStats,
    },
    Failed {
        category: ErrorCategory,
        message: String,
        endpoint: Option<String>,
    },
}
