//! Offline integrity scan.
//!
//! Reports typed issues without modifying state; the only write path is
//! the opt-in `fix` mode, which repairs deterministic source-id mismatches
//! (recomputed from the row's own identity columns). Issue class names are
//! stable; downstream tooling matches on them.

use mnemo_core::ids::{EvidenceUri, SourceId, is_sha256_hex, normalize_repo_url};
use mnemo_core::model::ModelManager;
use mnemo_core::model::attachment::AttachmentBmc;
use mnemo_core::model::git_commit::GitCommitBmc;
use mnemo_core::model::patch_blob::{MaterializeStatus, PatchBlobBmc};
use mnemo_core::model::repo::RepoBmc;
use mnemo_core::model::svn_revision::SvnRevisionBmc;
use mnemo_core::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Stable issue classes; contributors may not rename these.
pub mod issue_class {
    pub const MISSING_INDEX: &str = "missing_index";
    pub const MISSING_EVIDENCE_URI: &str = "missing_evidence_uri";
    pub const UNREADABLE_ARTIFACT: &str = "unreadable_artifact";
    pub const SHA_MISMATCH: &str = "sha_mismatch";
    pub const SCHEME_VIOLATION: &str = "scheme_violation";
    pub const ATTACHMENT_MISSING_URI: &str = "attachment_missing_uri";
    pub const ATTACHMENT_UNREADABLE: &str = "attachment_unreadable";
    pub const ATTACHMENT_SHA_MISMATCH: &str = "attachment_sha_mismatch";
    pub const INDEX_MISSING: &str = "index_missing";
    pub const INDEX_METADATA_MISMATCH: &str = "index_metadata_mismatch";
    pub const SOURCE_ID_INVALID: &str = "source_id_invalid";
    pub const REPO_URL_COLLISION: &str = "repo_url_collision";
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityIssue {
    pub class: String,
    pub entity: String,
    pub entity_id: String,
    pub detail: String,
    /// Whether `fix` mode repaired it.
    pub fixed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
    pub counts_by_class: BTreeMap<String, usize>,
    pub rows_checked: usize,
    pub fixes_applied: usize,
}

impl IntegrityReport {
    pub fn clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, class: &str, entity: &str, entity_id: impl ToString, detail: String) {
        *self.counts_by_class.entry(class.to_string()).or_insert(0) += 1;
        self.issues.push(IntegrityIssue {
            class: class.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            detail,
            fixed: false,
        });
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntegrityOptions {
    /// Verify artifact files exist for resolved blob/attachment URIs.
    pub check_artifacts: bool,
    /// Re-hash artifact content against stored sha256 values.
    pub verify_sha256: bool,
    /// Cap on rows for the (slow) sha verification scan.
    pub limit: usize,
    /// Apply deterministic source-id repairs.
    pub fix: bool,
}

impl Default for IntegrityOptions {
    fn default() -> Self {
        IntegrityOptions {
            check_artifacts: false,
            verify_sha256: false,
            limit: 100,
            fix: false,
        }
    }
}

pub struct IntegrityChecker<'a> {
    mm: &'a ModelManager,
    options: IntegrityOptions,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(mm: &'a ModelManager, options: IntegrityOptions) -> Self {
        IntegrityChecker { mm, options }
    }

    pub async fn run(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::default();

        self.check_source_ids(&mut report).await?;
        self.check_repo_url_collisions(&mut report).await?;
        self.check_patch_blobs(&mut report).await?;
        self.check_attachments(&mut report).await?;

        info!(
            issues = report.issues.len(),
            rows_checked = report.rows_checked,
            fixes = report.fixes_applied,
            "integrity scan finished"
        );
        Ok(report)
    }

    /// Source-id format and value checks across revision/commit rows.
    async fn check_source_ids(&self, report: &mut IntegrityReport) -> Result<()> {
        for (repo_id, rev_num, source_id) in SvnRevisionBmc::list_identity(self.mm).await? {
            report.rows_checked += 1;
            let expected = SourceId::svn(repo_id, rev_num).to_string();
            if source_id != expected {
                report.push(
                    issue_class::SOURCE_ID_INVALID,
                    "svn_revisions",
                    format!("{repo_id}:{rev_num}"),
                    format!("source_id {source_id:?}, expected {expected:?}"),
                );
                if self.options.fix {
                    SvnRevisionBmc::set_source_id(self.mm, repo_id, rev_num, &expected).await?;
                    if let Some(issue) = report.issues.last_mut() {
                        issue.fixed = true;
                    }
                    report.fixes_applied += 1;
                }
            }
        }

        for (repo_id, commit_sha, source_id) in GitCommitBmc::list_identity(self.mm).await? {
            report.rows_checked += 1;
            let expected = SourceId::git(repo_id, commit_sha.as_str()).to_string();
            if source_id != expected {
                report.push(
                    issue_class::SOURCE_ID_INVALID,
                    "git_commits",
                    format!("{repo_id}:{commit_sha}"),
                    format!("source_id {source_id:?}, expected {expected:?}"),
                );
                if self.options.fix {
                    GitCommitBmc::set_source_id(self.mm, repo_id, &commit_sha, &expected).await?;
                    if let Some(issue) = report.issues.last_mut() {
                        issue.fixed = true;
                    }
                    report.fixes_applied += 1;
                }
            }
        }
        Ok(())
    }

    /// Detect distinct repo rows that normalize to the same canonical URL.
    /// No automatic merge: the remediation stays manual.
    async fn check_repo_url_collisions(&self, report: &mut IntegrityReport) -> Result<()> {
        let repos = RepoBmc::list(self.mm).await?;
        let mut by_canonical: HashMap<String, Vec<i64>> = HashMap::new();
        for repo in &repos {
            report.rows_checked += 1;
            let canonical = normalize_repo_url(&repo.url).unwrap_or_else(|_| repo.url.clone());
            by_canonical.entry(canonical).or_default().push(repo.repo_id);
        }
        for (url, ids) in by_canonical {
            if ids.len() > 1 {
                report.push(
                    issue_class::REPO_URL_COLLISION,
                    "scm_repos",
                    ids.iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                    format!("{} repos normalize to {url}", ids.len()),
                );
            }
        }
        Ok(())
    }

    async fn check_patch_blobs(&self, report: &mut IntegrityReport) -> Result<()> {
        let blobs = PatchBlobBmc::list_all(self.mm, usize::MAX >> 1).await?;
        let mut verified = 0usize;

        for blob in &blobs {
            report.rows_checked += 1;

            if !SourceId::is_valid(&blob.source_id) {
                report.push(
                    issue_class::SOURCE_ID_INVALID,
                    "patch_blobs",
                    blob.blob_id,
                    format!("source_id {:?} matches no canonical shape", blob.source_id),
                );
            }

            if blob.materialize_status != MaterializeStatus::Done {
                continue;
            }

            // Done rows must carry a canonical patch-blob pointer (I2, I6).
            match blob.evidence_uri.as_deref() {
                None | Some("") => {
                    report.push(
                        issue_class::MISSING_EVIDENCE_URI,
                        "patch_blobs",
                        blob.blob_id,
                        "done blob without evidence_uri".to_string(),
                    );
                }
                Some(uri) => match EvidenceUri::parse(uri) {
                    Ok(parsed) if parsed.is_patch_blob_pointer() => {}
                    Ok(_) => {
                        report.push(
                            issue_class::SCHEME_VIOLATION,
                            "patch_blobs",
                            blob.blob_id,
                            format!("evidence_uri {uri:?} is not a memory://patch_blobs/ pointer"),
                        );
                    }
                    Err(_) => {
                        report.push(
                            issue_class::SCHEME_VIOLATION,
                            "patch_blobs",
                            blob.blob_id,
                            format!("evidence_uri {uri:?} has an illegal scheme"),
                        );
                    }
                },
            }

            if blob.chunking_version.is_none() {
                report.push(
                    issue_class::MISSING_INDEX,
                    "patch_blobs",
                    blob.blob_id,
                    "done blob without chunking_version (index drift)".to_string(),
                );
            }

            let Some(uri) = blob.uri.as_deref() else {
                report.push(
                    issue_class::UNREADABLE_ARTIFACT,
                    "patch_blobs",
                    blob.blob_id,
                    "done blob without artifact uri".to_string(),
                );
                continue;
            };

            if self.options.check_artifacts && !self.mm.artifacts().exists(uri) {
                report.push(
                    issue_class::UNREADABLE_ARTIFACT,
                    "patch_blobs",
                    blob.blob_id,
                    format!("artifact missing at {uri}"),
                );
                continue;
            }

            if self.options.verify_sha256 && verified < self.options.limit {
                verified += 1;
                match self.mm.artifacts().stat(uri) {
                    Ok(stat) => {
                        let stored = blob.sha256.clone().unwrap_or_default();
                        if !is_sha256_hex(&stored) || stat.sha256 != stored.to_lowercase() {
                            report.push(
                                issue_class::SHA_MISMATCH,
                                "patch_blobs",
                                blob.blob_id,
                                format!(
                                    "stored sha256 {stored:?} != artifact {}",
                                    stat.sha256
                                ),
                            );
                        } else if blob.size_bytes.is_some_and(|s| s as u64 != stat.size) {
                            report.push(
                                issue_class::SHA_MISMATCH,
                                "patch_blobs",
                                blob.blob_id,
                                format!(
                                    "stored size {:?} != artifact {}",
                                    blob.size_bytes, stat.size
                                ),
                            );
                        }
                    }
                    Err(_) => {
                        report.push(
                            issue_class::UNREADABLE_ARTIFACT,
                            "patch_blobs",
                            blob.blob_id,
                            format!("artifact unreadable at {uri}"),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn check_attachments(&self, report: &mut IntegrityReport) -> Result<()> {
        let attachments = AttachmentBmc::list(self.mm, usize::MAX >> 1).await?;

        for attachment in &attachments {
            report.rows_checked += 1;

            let Some(uri) = attachment.uri.as_deref().filter(|u| !u.is_empty()) else {
                report.push(
                    issue_class::ATTACHMENT_MISSING_URI,
                    "attachments",
                    attachment.attachment_id,
                    "attachment without uri".to_string(),
                );
                continue;
            };

            match EvidenceUri::parse(uri) {
                // Patch attachments point at patch blobs; everything else
                // at attachment storage. Cross-use violates I6.
                Ok(parsed) => {
                    let ok = if attachment.kind == "patch" {
                        parsed.is_patch_blob_pointer()
                    } else {
                        !parsed.is_patch_blob_pointer()
                    };
                    if !ok {
                        report.push(
                            issue_class::SCHEME_VIOLATION,
                            "attachments",
                            attachment.attachment_id,
                            format!("kind {:?} with uri {uri:?}", attachment.kind),
                        );
                        continue;
                    }
                }
                Err(_) => {
                    report.push(
                        issue_class::SCHEME_VIOLATION,
                        "attachments",
                        attachment.attachment_id,
                        format!("illegal uri scheme: {uri:?}"),
                    );
                    continue;
                }
            }

            // Readability/sha checks only make sense for locally resolvable
            // storage.
            if self.options.check_artifacts
                && (uri.starts_with("artifact://") || uri.starts_with("file://"))
            {
                if !self.mm.artifacts().exists(uri) {
                    report.push(
                        issue_class::ATTACHMENT_UNREADABLE,
                        "attachments",
                        attachment.attachment_id,
                        format!("attachment content missing at {uri}"),
                    );
                    continue;
                }
                if self.options.verify_sha256 {
                    if let Ok(stat) = self.mm.artifacts().stat(uri) {
                        let stored = attachment.sha256.clone().unwrap_or_default();
                        if stat.sha256 != stored.to_lowercase() {
                            report.push(
                                issue_class::ATTACHMENT_SHA_MISMATCH,
                                "attachments",
                                attachment.attachment_id,
                                format!("stored sha256 {stored:?} != content {}", stat.sha256),
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
