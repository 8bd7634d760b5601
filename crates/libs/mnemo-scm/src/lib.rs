//! # mnemo-scm: incremental SCM ingestion
//!
//! Cursor-driven ingestion of SVN and GitLab histories into the relational
//! store, plus materialization of patch content into the content-addressed
//! artifact store.
//!
//! The moving parts:
//!
//! - [`svn`]: subprocess adapter around the SVN CLI with uniform outcome
//!   classification
//! - [`gitlab`]: HTTP adapter with token provider, rate limiting, retries
//! - [`window`]: fetch-window selection (first-sync and incremental)
//! - [`policy`]: in-loop adaptive tuning of window/batch/diff-mode
//! - [`materialize`]: patch-blob materialization with sha verification
//! - [`sync`]: the per-`(repo, job_type)` pipelines running under a lease
//! - [`integrity`]: offline consistency scan

pub mod diffstat;
pub mod gitlab;
pub mod integrity;
pub mod materialize;
pub mod policy;
pub mod svn;
pub mod sync;
pub mod window;

/// Adapter-level failure: a classified category plus context. Adapters
/// return this instead of throwing across their boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{category}: {message}")]
pub struct AdapterError {
    pub category: mnemo_core::ErrorCategory,
    pub message: String,
    /// Endpoint or command that failed, already redacted.
    pub endpoint: Option<String>,
    pub status: Option<u16>,
}

impl AdapterError {
    pub fn new(category: mnemo_core::ErrorCategory, message: impl Into<String>) -> Self {
        AdapterError {
            category,
            message: message.into(),
            endpoint: None,
            status: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}
