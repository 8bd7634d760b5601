//! Memory card rendering.
//!
//! Cards render to canonical Markdown with a fixed section order, so two
//! renderings of the same card are byte-identical and `payload_sha` is a
//! stable dedup key. Raw diff or log content in a detail is never stored:
//! the body is replaced by a pointer block carrying the sha256 of the
//! original text.

use lazy_static::lazy_static;
use mnemo_core::artifact::sha256_hex;
use mnemo_core::ids::is_sha256_hex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

lazy_static! {
    /// Unified-diff shapes at line start.
    static ref DIFF_RE: Regex =
        Regex::new(r"(?m)^(?:[-+]{3}\s|@@\s|diff --git|Index:)").unwrap_or_else(|_| unreachable!());
    /// Log lines: ISO dates or bracketed levels at line start.
    static ref LOG_RE: Regex = Regex::new(
        r"(?m)^(?:\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}|\[(?:INFO|WARN|WARNING|ERROR|DEBUG)\])"
    )
    .unwrap_or_else(|_| unreachable!());
}

/// Card kinds; free-form strings are normalized to uppercase and
/// validated against this set.
pub const CARD_KINDS: [&str; 6] = [
    "FACT",
    "PROCEDURE",
    "PITFALL",
    "DECISION",
    "REVIEW_GUIDE",
    "REFLECTION",
];

/// Trimming limits applied at render time.
#[derive(Debug, Clone)]
pub struct RenderLimits {
    pub max_summary_len: usize,
    pub max_detail_len: usize,
    pub max_details_count: usize,
    pub max_evidence_count: usize,
    pub max_total_length: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        RenderLimits {
            max_summary_len: 200,
            max_detail_len: 500,
            max_details_count: 8,
            max_evidence_count: 10,
            max_total_length: 4000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub svn_rev: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mr: Option<i64>,
}

impl EvidenceRef {
    /// Card evidence accepts `memory`, `svn`, `git`, and `https` schemes;
    /// sha256 when present must be 64 hex chars.
    pub fn validate(&self) -> Result<(), String> {
        let scheme = self
            .uri
            .split_once(':')
            .map(|(s, _)| s)
            .unwrap_or_default();
        if !matches!(scheme, "memory" | "svn" | "git" | "https") {
            return Err(format!("evidence uri scheme {scheme:?} not allowed"));
        }
        if let Some(sha) = self.sha256.as_deref()
            && !is_sha256_hex(sha)
        {
            return Err(format!("evidence sha256 malformed: {sha:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCard {
    #[serde(default = "default_kind")]
    pub kind: String,
    pub owner: String,
    #[serde(default)]
    pub module: String,
    pub summary: String,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
    #[serde(default = "default_confidence")]
    pub confidence: String,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    #[serde(default = "default_ttl")]
    pub ttl: String,
}

fn default_kind() -> String {
    "FACT".to_string()
}

fn default_confidence() -> String {
    "mid".to_string()
}

fn default_visibility() -> String {
    "team".to_string()
}

fn default_ttl() -> String {
    "mid".to_string()
}

impl MemoryCard {
    pub fn validate(&self) -> Result<(), String> {
        let kind = self.kind.to_uppercase();
        if !CARD_KINDS.contains(&kind.as_str()) {
            return Err(format!("unknown card kind: {:?}", self.kind));
        }
        if self.owner.is_empty() {
            return Err("owner must not be empty".to_string());
        }
        if self.summary.trim().is_empty() {
            return Err("summary must not be empty".to_string());
        }
        Ok(())
    }
}

/// A rendered card: canonical Markdown plus its fingerprint.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedCard {
    pub payload_md: String,
    pub payload_sha: String,
    /// Details dropped by the count cap.
    pub dropped_details: usize,
    /// Details replaced by diff/log pointers.
    pub replaced_details: usize,
}

/// Render a card to canonical Markdown and compute `payload_sha`.
///
/// Deterministic: the same card always produces the same bytes.
pub fn render_card(card: &MemoryCard, limits: &RenderLimits) -> RenderedCard {
    let mut out = String::new();

    out.push_str(&format!("[Kind] {}\n", card.kind.to_uppercase()));
    out.push_str(&format!("[Owner] {}\n", card.owner));
    out.push_str(&format!("[Module] {}\n", card.module));
    out.push_str(&format!("[Visibility] {}\n", card.visibility));
    out.push_str(&format!("[TTL] {}\n", card.ttl));
    out.push_str(&format!("[Confidence] {}\n", card.confidence));

    out.push_str("\n[Summary]\n");
    out.push_str(&truncate_chars(card.summary.trim(), limits.max_summary_len));
    out.push('\n');

    let mut dropped_details = 0;
    let mut replaced_details = 0;
    if !card.details.is_empty() {
        out.push_str("\n[Details]\n");
        for (i, detail) in card.details.iter().enumerate() {
            if i >= limits.max_details_count {
                dropped_details += 1;
                debug!(index = i, "detail dropped by count cap");
                continue;
            }
            let body = match classify_payload(detail) {
                Some(kind) => {
                    replaced_details += 1;
                    pointer_block(kind, detail)
                }
                None => truncate_chars(detail.trim(), limits.max_detail_len),
            };
            out.push_str(&format!("{}. {}\n", i + 1, body.replace('\n', " ")));
        }
    }

    if !card.evidence.is_empty() {
        out.push_str("\n[Evidence]\n");
        for evidence in card.evidence.iter().take(limits.max_evidence_count) {
            out.push_str(&format!("- uri={}", evidence.uri));
            if let Some(sha) = &evidence.sha256 {
                out.push_str(&format!(" sha256={}", sha.to_lowercase()));
            }
            if let Some(event_id) = &evidence.event_id {
                out.push_str(&format!(" event_id={event_id}"));
            }
            if let Some(rev) = evidence.svn_rev {
                out.push_str(&format!(" svn_rev={rev}"));
            }
            if let Some(commit) = &evidence.git_commit {
                out.push_str(&format!(" git_commit={commit}"));
            }
            if let Some(mr) = evidence.mr {
                out.push_str(&format!(" mr={mr}"));
            }
            out.push('\n');
        }
    }

    let payload_md = truncate_chars(&out, limits.max_total_length);
    let payload_sha = sha256_hex(payload_md.as_bytes());

    RenderedCard {
        payload_md,
        payload_sha,
        dropped_details,
        replaced_details,
    }
}

/// Detect raw diff/log bodies. Returns the pointer label kind.
fn classify_payload(text: &str) -> Option<&'static str> {
    if DIFF_RE.is_match(text) {
        Some("diff")
    } else if LOG_RE.is_match(text) {
        Some("log")
    } else {
        None
    }
}

/// The card never stores raw diffs or logs; the body becomes a pointer to
/// content addressed by the sha of the original text.
fn pointer_block(kind: &str, original: &str) -> String {
    let sha = sha256_hex(original.as_bytes());
    format!("[{kind} 内容已移除，仅保留指针] uri=memory://attachments/inline/{sha} sha256={sha}")
}

/// Char-boundary-safe truncation.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
