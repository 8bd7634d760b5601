//! Error types for mnemo-core operations.
//!
//! Two layers live here:
//!
//! - [`Error`]: the crate error enum (external wrappers plus domain
//!   failures), converted automatically from underlying error types.
//! - [`ErrorCategory`]: the single failure taxonomy shared by the SVN and
//!   GitLab adapters, the materializer, the sync pipelines, and the outbox
//!   worker. Components never invent parallel category strings; they
//!   stringify this enum at serialization boundaries only.

use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use thiserror::Error;

/// The error type for mnemo-core operations.
#[derive(Debug, Error, AsRefStr)]
pub enum Error {
    // -- External errors from dependencies
    /// Database error from libsql.
    #[error("Libsql Error: {0}")]
    Libsql(#[from] libsql::Error),

    /// JSON serialization/deserialization error.
    #[error("Serde JSON Error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Standard I/O error.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    // -- Internal errors for common failure modes
    /// Generic entity not found.
    #[error("Entity not found")]
    NotFound,

    /// Input validation error.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // -- Model-specific errors
    /// Repo lookup failed.
    #[error("Repo not found: {0}")]
    RepoNotFound(i64),

    /// Patch blob lookup failed.
    #[error("Patch blob not found: {0}")]
    PatchBlobNotFound(i64),

    /// Outbox entry lookup failed.
    #[error("Outbox entry not found: {0}")]
    OutboxEntryNotFound(i64),

    /// Attachment lookup failed.
    #[error("Attachment not found: {0}")]
    AttachmentNotFound(i64),

    /// An artifact path already holds different content.
    #[error("Storage collision at {path}: existing sha256 {existing} != {incoming}")]
    StorageCollision {
        path: String,
        existing: String,
        incoming: String,
    },

    /// Artifact referenced by URI is missing or unreadable.
    #[error("Artifact unreadable: {0}")]
    ArtifactUnreadable(String),
}

/// A specialized [`Result`] type for mnemo-core operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Stable failure taxonomy shared across components.
///
/// Adapters never throw across their boundary; they classify outcomes into
/// one of these kinds. The materializer and the sync pipelines persist the
/// serialized form (`error_category`, `degrade_reason` columns), and the
/// outbox worker reuses it for last_error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    RateLimited,
    AuthError,
    /// 4xx/5xx without a finer class.
    HttpError,
    ServerError,
    ClientError,
    NetworkError,
    ContentTooLarge,
    ValidationError,
    CommandError,
    ParseError,
    DependencyMissing,
    StorageCollision,
    Unknown,
}

impl ErrorCategory {
    /// Serialized form used in DB columns and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::AuthError => "auth_error",
            ErrorCategory::HttpError => "http_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::ContentTooLarge => "content_too_large",
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::CommandError => "command_error",
            ErrorCategory::ParseError => "parse_error",
            ErrorCategory::DependencyMissing => "dependency_missing",
            ErrorCategory::StorageCollision => "storage_collision",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "timeout" => ErrorCategory::Timeout,
            "rate_limited" => ErrorCategory::RateLimited,
            "auth_error" => ErrorCategory::AuthError,
            "http_error" => ErrorCategory::HttpError,
            "server_error" => ErrorCategory::ServerError,
            "client_error" => ErrorCategory::ClientError,
            "network_error" => ErrorCategory::NetworkError,
            "content_too_large" => ErrorCategory::ContentTooLarge,
            "validation_error" => ErrorCategory::ValidationError,
            "command_error" => ErrorCategory::CommandError,
            "parse_error" => ErrorCategory::ParseError,
            "dependency_missing" => ErrorCategory::DependencyMissing,
            "storage_collision" => ErrorCategory::StorageCollision,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether a retry can plausibly succeed without operator action.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout
                | ErrorCategory::RateLimited
                | ErrorCategory::ServerError
                | ErrorCategory::NetworkError
                | ErrorCategory::HttpError
        )
    }

    /// Unrecoverable in the sync sense: stops cursor advancement in strict
    /// mode. Recoverable errors (parse, per-item size overflow) let the
    /// cursor advance past the failing event.
    pub fn unrecoverable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimited
                | ErrorCategory::Timeout
                | ErrorCategory::ServerError
                | ErrorCategory::NetworkError
                | ErrorCategory::AuthError
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_strings() {
        for cat in [
            ErrorCategory::Timeout,
            ErrorCategory::RateLimited,
            ErrorCategory::AuthError,
            ErrorCategory::HttpError,
            ErrorCategory::ServerError,
            ErrorCategory::ClientError,
            ErrorCategory::NetworkError,
            ErrorCategory::ContentTooLarge,
            ErrorCategory::ValidationError,
            ErrorCategory::CommandError,
            ErrorCategory::ParseError,
            ErrorCategory::DependencyMissing,
            ErrorCategory::StorageCollision,
            ErrorCategory::Unknown,
        ] {
            assert_eq!(ErrorCategory::parse(cat.as_str()), cat);
        }
        assert_eq!(ErrorCategory::parse("bogus"), ErrorCategory::Unknown);
    }

    #[test]
    fn retryable_and_unrecoverable_sets() {
        assert!(ErrorCategory::RateLimited.retryable());
        assert!(ErrorCategory::Timeout.unrecoverable());
        assert!(!ErrorCategory::ContentTooLarge.unrecoverable());
        assert!(!ErrorCategory::ParseError.unrecoverable());
        assert!(ErrorCategory::AuthError.unrecoverable());
        assert!(!ErrorCategory::AuthError.retryable());
    }
}
