//! Content-addressed artifact store.
//!
//! Artifacts live under a single root directory and are addressed by a
//! relative path whose last component embeds the content sha256. `put` is
//! idempotent: re-writing identical bytes at the same path succeeds,
//! differing bytes fail with a storage collision.
//!
//! The SCM path schema lives here too:
//!
//! - new layout: `scm/<project_key>/<repo_id>/<source_type>/<rev_or_sha>/<sha256>.<ext>`
//! - legacy layout: `scm/<repo_id>/svn/r<rev>.<ext>` and
//!   `scm/<repo_id>/git/commits/<sha>.<ext>`
//!
//! Readers resolve the new layout first and fall back to legacy.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const SCM_EXT_DIFF: &str = "diff";
pub const SCM_EXT_DIFFSTAT: &str = "diffstat";
pub const SCM_EXT_MINISTAT: &str = "ministat";

const SCM_SOURCE_TYPES: [&str; 3] = ["svn", "git", "gitlab"];
const SCM_EXTS: [&str; 3] = [SCM_EXT_DIFF, SCM_EXT_DIFFSTAT, SCM_EXT_MINISTAT];

/// Result of a `put` or `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub uri: String,
    pub sha256: String,
    pub size: u64,
}

/// Compute the lowercase hex sha256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Filesystem-backed artifact store with object-store semantics.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store bytes at `rel_path`, atomically.
    ///
    /// Idempotent: if the path already holds content with the same sha256
    /// the call succeeds without rewriting; differing content fails with
    /// [`Error::StorageCollision`].
    pub fn put(&self, rel_path: &str, bytes: &[u8]) -> Result<ArtifactInfo> {
        let sha256 = sha256_hex(bytes);
        let abs = self.abs_path(rel_path)?;

        if abs.exists() {
            let existing = std::fs::read(&abs)?;
            let existing_sha = sha256_hex(&existing);
            if existing_sha == sha256 {
                return Ok(ArtifactInfo {
                    uri: uri_for(rel_path),
                    sha256,
                    size: bytes.len() as u64,
                });
            }
            return Err(Error::StorageCollision {
                path: rel_path.to_string(),
                existing: existing_sha,
                incoming: sha256,
            });
        }

        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Temp-file + rename keeps readers from seeing partial writes.
        let tmp = abs.with_extension("tmp-write");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &abs)?;

        Ok(ArtifactInfo {
            uri: uri_for(rel_path),
            sha256,
            size: bytes.len() as u64,
        })
    }

    pub fn exists(&self, uri: &str) -> bool {
        self.resolve_uri(uri)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    pub fn read(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self
            .resolve_uri(uri)
            .ok_or_else(|| Error::ArtifactUnreadable(uri.to_string()))?;
        std::fs::read(&path).map_err(|_| Error::ArtifactUnreadable(uri.to_string()))
    }

    /// Read-and-hash; the store keeps no sidecar metadata.
    pub fn stat(&self, uri: &str) -> Result<ArtifactInfo> {
        let bytes = self.read(uri)?;
        Ok(ArtifactInfo {
            uri: uri.to_string(),
            sha256: sha256_hex(&bytes),
            size: bytes.len() as u64,
        })
    }

    /// Map an `artifact://` or `file://` URI (or a bare relative path) to
    /// an absolute filesystem path. Returns `None` for other schemes.
    pub fn resolve_uri(&self, uri: &str) -> Option<PathBuf> {
        if let Some(rest) = uri.strip_prefix("artifact://") {
            return self.abs_path(rest).ok();
        }
        if let Some(rest) = uri.strip_prefix("file://") {
            return Some(PathBuf::from(rest));
        }
        if uri.contains("://") {
            return None;
        }
        self.abs_path(uri).ok()
    }

    fn abs_path(&self, rel_path: &str) -> Result<PathBuf> {
        let rel = Path::new(rel_path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::InvalidInput(format!(
                "artifact path must be relative without ..: {rel_path}"
            )));
        }
        Ok(self.root.join(rel))
    }
}

fn uri_for(rel_path: &str) -> String {
    format!("artifact://{rel_path}")
}

// ---------------------------------------------------------------------------
// SCM path schema
// ---------------------------------------------------------------------------

/// Parsed SCM artifact path, either layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmArtifactPath {
    pub project_key: Option<String>,
    pub repo_id: String,
    pub source_type: String,
    pub rev_or_sha: String,
    pub sha256: Option<String>,
    pub ext: String,
    pub is_legacy: bool,
}

/// Build the canonical SCM artifact path.
///
/// SVN `rev_or_sha` must be `r<num>`; git/gitlab must be >= 7 hex chars.
pub fn build_scm_artifact_path(
    project_key: &str,
    repo_id: &str,
    source_type: &str,
    rev_or_sha: &str,
    sha256: &str,
    ext: &str,
) -> Result<String> {
    if project_key.is_empty() {
        return Err(Error::InvalidInput("project_key must not be empty".into()));
    }
    let source_type = source_type.trim().to_lowercase();
    if !SCM_SOURCE_TYPES.contains(&source_type.as_str()) {
        return Err(Error::InvalidInput(format!(
            "invalid source_type: {source_type}"
        )));
    }
    if !SCM_EXTS.contains(&ext) {
        return Err(Error::InvalidInput(format!("invalid ext: {ext}")));
    }

    if source_type == "svn" {
        let digits = rev_or_sha.strip_prefix('r').unwrap_or("");
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidInput(format!(
                "svn rev_or_sha must be r<rev>: {rev_or_sha}"
            )));
        }
    } else {
        if rev_or_sha.len() < 7 {
            return Err(Error::InvalidInput(format!(
                "git rev_or_sha must be at least 7 chars: {rev_or_sha}"
            )));
        }
        if !rev_or_sha.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput(format!(
                "git rev_or_sha must be hex: {rev_or_sha}"
            )));
        }
    }

    Ok(format!(
        "scm/{}/{}/{}/{}/{}.{}",
        project_key,
        repo_id,
        source_type,
        rev_or_sha,
        sha256.to_lowercase(),
        ext
    ))
}

/// Build the legacy SCM artifact path (still written nowhere, still read
/// everywhere).
pub fn build_legacy_scm_path(
    repo_id: &str,
    source_type: &str,
    rev_or_sha: &str,
    ext: &str,
) -> Result<String> {
    let source_type = source_type.trim().to_lowercase();
    if !SCM_SOURCE_TYPES.contains(&source_type.as_str()) {
        return Err(Error::InvalidInput(format!(
            "invalid source_type: {source_type}"
        )));
    }
    if !SCM_EXTS.contains(&ext) {
        return Err(Error::InvalidInput(format!("invalid ext: {ext}")));
    }
    if source_type == "svn" {
        let rev = if rev_or_sha.starts_with('r') {
            rev_or_sha.to_string()
        } else {
            format!("r{rev_or_sha}")
        };
        Ok(format!("scm/{repo_id}/svn/{rev}.{ext}"))
    } else {
        Ok(format!("scm/{repo_id}/git/commits/{rev_or_sha}.{ext}"))
    }
}

/// Parse either layout back into its parts. Accepts backslash separators.
pub fn parse_scm_artifact_path(path: &str) -> Option<ScmArtifactPath> {
    let normalized = path.replace('\\', "/");
    let parts: Vec<&str> = normalized.split('/').collect();
    if parts.first() != Some(&"scm") {
        return None;
    }

    let split_ext = |file: &str| -> Option<(String, String)> {
        let (stem, ext) = file.rsplit_once('.')?;
        if !SCM_EXTS.contains(&ext) {
            return None;
        }
        Some((stem.to_string(), ext.to_string()))
    };

    match parts.as_slice() {
        // scm/<project_key>/<repo_id>/<source_type>/<rev_or_sha>/<sha256>.<ext>
        ["scm", project_key, repo_id, source_type, rev_or_sha, file]
            if SCM_SOURCE_TYPES.contains(source_type) =>
        {
            let (sha256, ext) = split_ext(file)?;
            Some(ScmArtifactPath {
                project_key: Some((*project_key).to_string()),
                repo_id: (*repo_id).to_string(),
                source_type: (*source_type).to_string(),
                rev_or_sha: (*rev_or_sha).to_string(),
                sha256: Some(sha256),
                ext,
                is_legacy: false,
            })
        }
        // scm/<repo_id>/git/commits/<sha>.<ext>
        ["scm", repo_id, "git", "commits", file] => {
            let (sha, ext) = split_ext(file)?;
            Some(ScmArtifactPath {
                project_key: None,
                repo_id: (*repo_id).to_string(),
                source_type: "git".to_string(),
                rev_or_sha: sha,
                sha256: None,
                ext,
                is_legacy: true,
            })
        }
        // scm/<repo_id>/svn/r<rev>.<ext>
        ["scm", repo_id, "svn", file] => {
            let (stem, ext) = split_ext(file)?;
            let rev = stem.strip_prefix('r')?.to_string();
            Some(ScmArtifactPath {
                project_key: None,
                repo_id: (*repo_id).to_string(),
                source_type: "svn".to_string(),
                rev_or_sha: rev,
                sha256: None,
                ext,
                is_legacy: true,
            })
        }
        _ => None,
    }
}

/// Resolve an SCM artifact on disk: new layout first, then legacy.
/// Returns the relative path that exists, or `None`.
pub fn resolve_scm_artifact_path(
    store: &LocalArtifactStore,
    project_key: &str,
    repo_id: &str,
    source_type: &str,
    rev_or_sha: &str,
    sha256: &str,
    ext: &str,
) -> Option<String> {
    let svn_rev = if source_type == "svn" && !rev_or_sha.starts_with('r') {
        format!("r{rev_or_sha}")
    } else {
        rev_or_sha.to_string()
    };
    if let Ok(new_path) =
        build_scm_artifact_path(project_key, repo_id, source_type, &svn_rev, sha256, ext)
        && store.exists(&new_path)
    {
        return Some(new_path);
    }
    if let Ok(legacy) = build_legacy_scm_path(repo_id, source_type, rev_or_sha, ext)
        && store.exists(&legacy)
    {
        return Some(legacy);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_basic_paths() {
        let p = build_scm_artifact_path("proj_a", "1", "svn", "r100", "ABC123DEF", "diff");
        assert_eq!(p.ok().as_deref(), Some("scm/proj_a/1/svn/r100/abc123def.diff"));

        let p = build_scm_artifact_path("proj_b", "2", "GIT", "abc123def", "e3b0c442", "ministat");
        assert_eq!(
            p.ok().as_deref(),
            Some("scm/proj_b/2/git/abc123def/e3b0c442.ministat")
        );
    }

    #[test]
    fn build_rejects_invalid_inputs() {
        assert!(build_scm_artifact_path("", "1", "svn", "r1", "x", "diff").is_err());
        assert!(build_scm_artifact_path("p", "1", "hg", "r1", "x", "diff").is_err());
        assert!(build_scm_artifact_path("p", "1", "svn", "100", "x", "diff").is_err());
        assert!(build_scm_artifact_path("p", "1", "git", "abc12", "x", "diff").is_err());
        assert!(build_scm_artifact_path("p", "1", "git", "zzzzzzz", "x", "diff").is_err());
        assert!(build_scm_artifact_path("p", "1", "svn", "r1", "x", "patch").is_err());
    }

    #[test]
    fn legacy_paths() {
        assert_eq!(
            build_legacy_scm_path("1", "svn", "100", "diff").ok().as_deref(),
            Some("scm/1/svn/r100.diff")
        );
        assert_eq!(
            build_legacy_scm_path("1", "git", "abc123def", "diffstat")
                .ok()
                .as_deref(),
            Some("scm/1/git/commits/abc123def.diffstat")
        );
    }

    #[test]
    fn parse_new_and_legacy() {
        let parsed = parse_scm_artifact_path("scm/proj_a/1/svn/r100/abc123.diff");
        let parsed = parsed.as_ref();
        assert_eq!(parsed.map(|p| p.project_key.as_deref()), Some(Some("proj_a")));
        assert_eq!(parsed.map(|p| p.is_legacy), Some(false));

        let legacy = parse_scm_artifact_path("scm/1/svn/r100.diff");
        let legacy = legacy.as_ref();
        assert_eq!(legacy.map(|p| p.rev_or_sha.as_str()), Some("100"));
        assert_eq!(legacy.map(|p| p.is_legacy), Some(true));

        let legacy_git = parse_scm_artifact_path("scm/1/git/commits/abc123.diff");
        assert_eq!(
            legacy_git.as_ref().map(|p| p.source_type.as_str()),
            Some("git")
        );

        assert!(parse_scm_artifact_path("invalid/path").is_none());
        assert!(parse_scm_artifact_path("scm").is_none());
        assert!(parse_scm_artifact_path("").is_none());

        // Backslash separators are normalized.
        let win = parse_scm_artifact_path("scm\\proj_a\\1\\svn\\r100\\abc123.diff");
        assert_eq!(
            win.and_then(|p| p.project_key),
            Some("proj_a".to_string())
        );
    }

    #[test]
    fn put_is_idempotent_and_collision_safe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalArtifactStore::new(dir.path());

        let info = store.put("scm/p/1/svn/r1/aa.diff", b"hello").expect("put");
        assert_eq!(info.uri, "artifact://scm/p/1/svn/r1/aa.diff");
        assert_eq!(info.size, 5);

        // Same bytes: ok
        let again = store.put("scm/p/1/svn/r1/aa.diff", b"hello").expect("re-put");
        assert_eq!(again.sha256, info.sha256);

        // Different bytes: collision
        let err = store.put("scm/p/1/svn/r1/aa.diff", b"world");
        assert!(matches!(err, Err(Error::StorageCollision { .. })));
    }

    #[test]
    fn read_stat_exists_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalArtifactStore::new(dir.path());

        let info = store.put("scm/p/1/git/abcdef0/bb.diff", b"diff body").expect("put");
        assert!(store.exists(&info.uri));
        assert_eq!(store.read(&info.uri).expect("read"), b"diff body");

        let stat = store.stat(&info.uri).expect("stat");
        assert_eq!(stat.sha256, info.sha256);
        assert_eq!(stat.size, 9);

        assert!(!store.exists("artifact://scm/p/1/git/abcdef0/missing.diff"));
        assert!(store.read("artifact://missing").is_err());
    }

    #[test]
    fn path_traversal_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalArtifactStore::new(dir.path());
        assert!(store.put("../outside.diff", b"x").is_err());
        assert!(store.put("/abs/path.diff", b"x").is_err());
    }

    #[test]
    fn resolver_prefers_new_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalArtifactStore::new(dir.path());

        store
            .put("scm/1/svn/r100.diff", b"legacy content")
            .expect("legacy put");
        assert_eq!(
            resolve_scm_artifact_path(&store, "proj_a", "1", "svn", "100", "abc123", "diff")
                .as_deref(),
            Some("scm/1/svn/r100.diff")
        );

        store
            .put("scm/proj_a/1/svn/r100/abc123.diff", b"new content")
            .expect("new put");
        assert_eq!(
            resolve_scm_artifact_path(&store, "proj_a", "1", "svn", "100", "abc123", "diff")
                .as_deref(),
            Some("scm/proj_a/1/svn/r100/abc123.diff")
        );

        assert!(
            resolve_scm_artifact_path(&store, "proj_a", "9", "svn", "1", "zz", "diff").is_none()
        );
    }
}
