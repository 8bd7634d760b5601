//! External semantic-memory service client.
//!
//! The service is a collaborator, not part of the core: an HTTP JSON API
//! with `store(payload_md, metadata) → memory_id` and
//! `search(query, filters) → hits`. Failures are classified into the
//! shared taxonomy; the gateway turns them into outbox deferrals, never
//! into 5xx responses.

use mnemo_core::ErrorCategory;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Classified failure from the external memory service.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{category}: {message}")]
pub struct ExternalError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ExternalError {
    fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        ExternalError {
            category,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryHit {
    #[serde(alias = "id")]
    pub memory_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ExternalMemoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl ExternalMemoryClient {
    pub fn new(base_url: impl Into<String>, timeout_seconds: u64) -> Result<Self, ExternalError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ExternalError::new(ErrorCategory::Unknown, e.to_string()))?;
        Ok(ExternalMemoryClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `store(payload_md, metadata) → memory_id`
    pub async fn store(
        &self,
        payload_md: &str,
        space: &str,
    ) -> Result<String, ExternalError> {
        let url = format!("{}/api/memory/store", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "payload_md": payload_md,
                "metadata": {"space": space},
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExternalError::new(
                classify_status(status.as_u16()),
                format!("memory store returned {}", status.as_u16()),
            ));
        }

        #[derive(Deserialize)]
        struct StoreResponse {
            #[serde(alias = "id")]
            memory_id: String,
        }
        let body: StoreResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::new(ErrorCategory::ParseError, e.to_string()))?;
        Ok(body.memory_id)
    }

    /// `search(query, filters) → hits`
    pub async fn search(
        &self,
        query: &str,
        space: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, ExternalError> {
        let url = format!("{}/api/memory/search", self.base_url);
        let mut filters = serde_json::Map::new();
        if let Some(space) = space {
            filters.insert("space".to_string(), json!(space));
        }
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "query": query,
                "filters": filters,
                "limit": limit,
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExternalError::new(
                classify_status(status.as_u16()),
                format!("memory search returned {}", status.as_u16()),
            ));
        }

        #[derive(Deserialize)]
        struct SearchResponse {
            #[serde(default, alias = "results")]
            hits: Vec<MemoryHit>,
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::new(ErrorCategory::ParseError, e.to_string()))?;
        Ok(body.hits)
    }
}

fn classify_transport(e: reqwest::Error) -> ExternalError {
    if e.is_timeout() {
        ExternalError::new(ErrorCategory::Timeout, e.to_string())
    } else {
        ExternalError::new(ErrorCategory::NetworkError, e.to_string())
    }
}

fn classify_status(status: u16) -> ErrorCategory {
    match status {
        429 => ErrorCategory::RateLimited,
        401 | 403 => ErrorCategory::AuthError,
        413 => ErrorCategory::ContentTooLarge,
        500..=599 => ErrorCategory::ServerError,
        400..=499 => ErrorCategory::ClientError,
        _ => ErrorCategory::HttpError,
    }
}

/// Redact an external error for audit storage: category plus a trimmed,
/// token-free message.
pub fn redact_error(err: &ExternalError) -> String {
    let mut message: String = err
        .message
        .chars()
        .filter(|c| !c.is_control())
        .take(160)
        .collect();
    if let Some(idx) = message.find("Bearer ") {
        message.truncate(idx);
    }
    format!("{}: {}", err.category, message)
}
