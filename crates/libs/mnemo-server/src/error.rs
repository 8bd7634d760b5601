//! Server error envelope.
//!
//! Expected fault modes never surface as 5xx: the handler returns a 200
//! with `{ok:false, error_code, message, suggestion?, retryable}` and the
//! client branches on `error_code`.

use axum::Json;
use axum::response::{IntoResponse, Response};
use mnemo_core::ErrorCategory;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Core Error: {0}")]
    Core(#[from] mnemo_core::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON Error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

pub type Result<T> = core::result::Result<T, ServerError>;

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    ok: bool,
    error_code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
    retryable: bool,
}

impl ServerError {
    fn envelope(&self) -> ErrorEnvelope {
        match self {
            ServerError::Core(e) => {
                let (error_code, suggestion, retryable) = classify_core(e);
                ErrorEnvelope {
                    ok: false,
                    error_code,
                    message: e.to_string(),
                    suggestion,
                    retryable,
                }
            }
            ServerError::Io(e) => ErrorEnvelope {
                ok: false,
                error_code: ErrorCategory::Unknown.as_str().to_string(),
                message: e.to_string(),
                suggestion: None,
                retryable: true,
            },
            ServerError::SerdeJson(e) => ErrorEnvelope {
                ok: false,
                error_code: ErrorCategory::ParseError.as_str().to_string(),
                message: e.to_string(),
                suggestion: None,
                retryable: false,
            },
            ServerError::BadRequest(message) => ErrorEnvelope {
                ok: false,
                error_code: ErrorCategory::ValidationError.as_str().to_string(),
                message: message.clone(),
                suggestion: Some("check the request payload fields".to_string()),
                retryable: false,
            },
        }
    }
}

fn classify_core(e: &mnemo_core::Error) -> (String, Option<String>, bool) {
    match e {
        mnemo_core::Error::InvalidInput(_) => (
            ErrorCategory::ValidationError.as_str().to_string(),
            Some("check the request payload fields".to_string()),
            false,
        ),
        mnemo_core::Error::StorageCollision { .. } => (
            ErrorCategory::StorageCollision.as_str().to_string(),
            Some("store large evidence in external storage".to_string()),
            false,
        ),
        mnemo_core::Error::ArtifactUnreadable(_) => (
            ErrorCategory::DependencyMissing.as_str().to_string(),
            Some("verify the artifacts root is mounted and readable".to_string()),
            true,
        ),
        mnemo_core::Error::Libsql(_) => (
            ErrorCategory::DependencyMissing.as_str().to_string(),
            Some("verify the database file is reachable and writable".to_string()),
            true,
        ),
        _ => (ErrorCategory::Unknown.as_str().to_string(), None, false),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "request failed");
        // Expected fault modes stay 200 with the structured envelope.
        Json(self.envelope()).into_response()
    }
}
