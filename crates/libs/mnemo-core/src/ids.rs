//! Canonical identity strings.
//!
//! Source IDs name an SCM event (`svn:<repo>:<rev>`, `git:<repo>:<sha>`,
//! `mr:<repo>:<iid>`), evidence URIs point at stored content
//! (`memory://patch_blobs/...`, `memory://attachments/...`,
//! `artifact://...`, `file://...`), and correlation IDs trace one
//! originating request (`corr-<16-hex>`). Everything here is regex-checked
//! so the integrity checker and the gateway share one notion of validity.

use crate::{Error, Result};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref SVN_SOURCE_ID_RE: Regex =
        Regex::new(r"^svn:\d+:\d+$").unwrap_or_else(|_| unreachable!());
    static ref GIT_SOURCE_ID_RE: Regex =
        Regex::new(r"^git:\d+:[a-f0-9]{7,40}$").unwrap_or_else(|_| unreachable!());
    static ref MR_SOURCE_ID_RE: Regex =
        Regex::new(r"^mr:\d+:\d+$").unwrap_or_else(|_| unreachable!());
    static ref CORRELATION_ID_RE: Regex =
        Regex::new(r"^corr-[a-fA-F0-9]{16}$").unwrap_or_else(|_| unreachable!());
    static ref SHA256_HEX_RE: Regex =
        Regex::new(r"^[a-fA-F0-9]{64}$").unwrap_or_else(|_| unreachable!());
}

/// Canonical identity of an SCM event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    Svn { repo_id: i64, rev: i64 },
    Git { repo_id: i64, sha: String },
    Mr { repo_id: i64, iid: i64 },
}

impl SourceId {
    pub fn svn(repo_id: i64, rev: i64) -> Self {
        SourceId::Svn { repo_id, rev }
    }

    pub fn git(repo_id: i64, sha: impl Into<String>) -> Self {
        SourceId::Git {
            repo_id,
            sha: sha.into().to_lowercase(),
        }
    }

    pub fn mr(repo_id: i64, iid: i64) -> Self {
        SourceId::Mr { repo_id, iid }
    }

    pub fn repo_id(&self) -> i64 {
        match self {
            SourceId::Svn { repo_id, .. }
            | SourceId::Git { repo_id, .. }
            | SourceId::Mr { repo_id, .. } => *repo_id,
        }
    }

    /// The revision or sha part, formatted for artifact paths
    /// (`r<rev>` for SVN, the sha for git).
    pub fn rev_or_sha(&self) -> String {
        match self {
            SourceId::Svn { rev, .. } => format!("r{rev}"),
            SourceId::Git { sha, .. } => sha.clone(),
            SourceId::Mr { iid, .. } => iid.to_string(),
        }
    }

    pub fn source_type(&self) -> &'static str {
        match self {
            SourceId::Svn { .. } => "svn",
            SourceId::Git { .. } => "git",
            SourceId::Mr { .. } => "mr",
        }
    }

    /// Parse a canonical source-id string, validating its regex.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (kind, repo, key) = match (parts.next(), parts.next(), parts.next()) {
            (Some(k), Some(r), Some(v)) => (k, r, v),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "invalid source_id format: {s}"
                )));
            }
        };
        let repo_id: i64 = repo
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid source_id repo_id: {s}")))?;
        match kind {
            "svn" if SVN_SOURCE_ID_RE.is_match(s) => Ok(SourceId::Svn {
                repo_id,
                rev: key
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("invalid svn rev: {s}")))?,
            }),
            "git" if GIT_SOURCE_ID_RE.is_match(s) => Ok(SourceId::Git {
                repo_id,
                sha: key.to_string(),
            }),
            "mr" if MR_SOURCE_ID_RE.is_match(s) => Ok(SourceId::Mr {
                repo_id,
                iid: key
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("invalid mr iid: {s}")))?,
            }),
            _ => Err(Error::InvalidInput(format!("invalid source_id: {s}"))),
        }
    }

    /// True when `s` matches one of the three canonical shapes.
    pub fn is_valid(s: &str) -> bool {
        SVN_SOURCE_ID_RE.is_match(s) || GIT_SOURCE_ID_RE.is_match(s) || MR_SOURCE_ID_RE.is_match(s)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Svn { repo_id, rev } => write!(f, "svn:{repo_id}:{rev}"),
            SourceId::Git { repo_id, sha } => write!(f, "git:{repo_id}:{sha}"),
            SourceId::Mr { repo_id, iid } => write!(f, "mr:{repo_id}:{iid}"),
        }
    }
}

/// URI scheme accepted for evidence pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceScheme {
    Memory,
    Artifact,
    File,
}

/// Parsed evidence URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceUri {
    pub scheme: EvidenceScheme,
    /// Path after `<scheme>://`.
    pub path: String,
}

impl EvidenceUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::InvalidInput(format!("evidence uri missing scheme: {uri}")))?;
        let scheme = match scheme {
            "memory" => EvidenceScheme::Memory,
            "artifact" => EvidenceScheme::Artifact,
            "file" => EvidenceScheme::File,
            other => {
                return Err(Error::InvalidInput(format!(
                    "illegal evidence uri scheme: {other}"
                )));
            }
        };
        Ok(EvidenceUri {
            scheme,
            path: rest.to_string(),
        })
    }

    /// True for `memory://patch_blobs/...` pointers.
    pub fn is_patch_blob_pointer(&self) -> bool {
        self.scheme == EvidenceScheme::Memory && self.path.starts_with("patch_blobs/")
    }

    /// True for `memory://attachments/...` pointers.
    pub fn is_attachment_pointer(&self) -> bool {
        self.scheme == EvidenceScheme::Memory && self.path.starts_with("attachments/")
    }
}

/// `memory://patch_blobs/<source_type>/<source_id>/<sha256>`
pub fn build_patch_blob_evidence_uri(source_type: &str, source_id: &str, sha256: &str) -> String {
    format!(
        "memory://patch_blobs/{}/{}/{}",
        source_type,
        source_id,
        sha256.to_lowercase()
    )
}

/// `memory://attachments/<attachment_id>/<sha256>`
pub fn build_attachment_evidence_uri(attachment_id: i64, sha256: &str) -> String {
    format!(
        "memory://attachments/{}/{}",
        attachment_id,
        sha256.to_lowercase()
    )
}

/// Entry-level tracing token, format `corr-<16-hex>`.
///
/// Generated exactly once at the process/request boundary (HTTP handler or
/// CLI main) and threaded unchanged through every audit row that request
/// produces. Helpers below the entry layer take it as a parameter; they
/// never regenerate it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 8] = rng.r#gen();
        CorrelationId(format!("corr-{}", hex::encode(bytes)))
    }

    pub fn parse(s: &str) -> Result<Self> {
        if CORRELATION_ID_RE.is_match(s) {
            Ok(CorrelationId(s.to_string()))
        } else {
            Err(Error::InvalidInput(format!("invalid correlation_id: {s}")))
        }
    }

    pub fn is_valid(s: &str) -> bool {
        CORRELATION_ID_RE.is_match(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `^[a-fA-F0-9]{64}$`
pub fn is_sha256_hex(s: &str) -> bool {
    SHA256_HEX_RE.is_match(s)
}

/// Canonicalize a repository URL: https scheme for http(s), lowercased
/// host and path, no trailing slash, no `.git` suffix. Non-HTTP schemes
/// (`svn://`) keep their scheme but get the same host/path treatment.
pub fn normalize_repo_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| Error::InvalidInput(format!("repo url missing scheme: {url}")))?;
    let scheme = match scheme.to_lowercase().as_str() {
        "http" | "https" => "https".to_string(),
        other => other.to_string(),
    };
    let mut rest = rest.to_lowercase();
    while rest.ends_with('/') {
        rest.pop();
    }
    if let Some(stripped) = rest.strip_suffix(".git") {
        rest = stripped.to_string();
    }
    if rest.is_empty() {
        return Err(Error::InvalidInput(format!("repo url has no host: {url}")));
    }
    Ok(format!("{scheme}://{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_round_trip() {
        let svn = SourceId::svn(12, 4587);
        assert_eq!(svn.to_string(), "svn:12:4587");
        assert_eq!(SourceId::parse("svn:12:4587").ok(), Some(svn));

        let git = SourceId::git(3, "AB12CD34EF56AB12CD34");
        assert_eq!(git.to_string(), "git:3:ab12cd34ef56ab12cd34");
        assert!(SourceId::parse(&git.to_string()).is_ok());

        let mr = SourceId::mr(7, 42);
        assert_eq!(mr.to_string(), "mr:7:42");
        assert_eq!(SourceId::parse("mr:7:42").ok(), Some(mr));
    }

    #[test]
    fn source_id_rejects_malformed() {
        for bad in [
            "svn:1",
            "svn:a:2",
            "git:1:xyz",
            "git:1:abc12", // < 7 hex chars
            "mr:1:abc",
            "hg:1:2",
            "",
        ] {
            assert!(SourceId::parse(bad).is_err(), "{bad}");
            assert!(!SourceId::is_valid(bad), "{bad}");
        }
    }

    #[test]
    fn rev_or_sha_formats() {
        assert_eq!(SourceId::svn(1, 100).rev_or_sha(), "r100");
        assert_eq!(SourceId::git(1, "abcdef0123").rev_or_sha(), "abcdef0123");
    }

    #[test]
    fn evidence_uri_schemes() {
        let pb = EvidenceUri::parse("memory://patch_blobs/svn/svn:1:100/abc").ok();
        assert!(pb.as_ref().is_some_and(|u| u.is_patch_blob_pointer()));
        let at = EvidenceUri::parse("memory://attachments/5/abc").ok();
        assert!(at.as_ref().is_some_and(|u| u.is_attachment_pointer()));
        assert!(EvidenceUri::parse("artifact://scm/p/1/svn/r1/x.diff").is_ok());
        assert!(EvidenceUri::parse("file:///tmp/x.diff").is_ok());
        assert!(EvidenceUri::parse("s3://bucket/key").is_err());
        assert!(EvidenceUri::parse("no-scheme").is_err());
    }

    #[test]
    fn correlation_id_format() {
        let id = CorrelationId::new();
        assert!(CorrelationId::is_valid(id.as_str()), "{id}");
        assert!(CorrelationId::is_valid("corr-0123456789abcdef"));
        assert!(!CorrelationId::is_valid("corr-0123456789abcde")); // 15 chars
        assert!(!CorrelationId::is_valid("corr-0123456789abcdeg")); // non-hex
        assert!(!CorrelationId::is_valid("0123456789abcdef"));
    }

    #[test]
    fn correlation_ids_are_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn repo_url_normalization() {
        assert_eq!(
            normalize_repo_url("HTTP://GitLab.Example.com/Group/Proj.git/")
                .ok()
                .as_deref(),
            Some("https://gitlab.example.com/group/proj")
        );
        assert_eq!(
            normalize_repo_url("svn://svn.example.com/Project/trunk/")
                .ok()
                .as_deref(),
            Some("svn://svn.example.com/project/trunk")
        );
        assert!(normalize_repo_url("not-a-url").is_err());
    }

    #[test]
    fn sha256_hex_check() {
        assert!(is_sha256_hex(&"a".repeat(64)));
        assert!(is_sha256_hex(
            "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        ));
        assert!(!is_sha256_hex(&"a".repeat(63)));
        assert!(!is_sha256_hex(&"g".repeat(64)));
    }
}
