//! JSON API handlers. Every response carries the correlation id minted at
//! this boundary.

use crate::{AppState, error::Result};
use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use mnemo_core::ids::CorrelationId;
use mnemo_gateway::card::MemoryCard;
use mnemo_gateway::report;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub struct StorePayload {
    #[serde(flatten)]
    pub card: MemoryCard,
    pub target_space: String,
    /// Whether the caller resolved the actor against the identity
    /// registry; unresolved actors go through the unknown-actor policy.
    #[serde(default = "default_true")]
    pub actor_known: bool,
}

fn default_true() -> bool {
    true
}

pub async fn memory_store(
    State(state): State<AppState>,
    Json(payload): Json<StorePayload>,
) -> Result<Response> {
    let correlation_id = CorrelationId::new();
    let outcome = state
        .gateway
        .store(
            &payload.card,
            payload.actor_known,
            &payload.target_space,
            &correlation_id,
        )
        .await?;
    Ok(Json(outcome).into_response())
}

#[derive(Deserialize)]
pub struct QueryPayload {
    pub query: String,
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn memory_query(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> Result<Response> {
    let correlation_id = CorrelationId::new();
    let outcome = state
        .gateway
        .query(
            &payload.query,
            payload.space.as_deref(),
            payload.limit.clamp(1, 100),
            &correlation_id,
        )
        .await?;
    Ok(Json(outcome).into_response())
}

#[derive(Deserialize)]
pub struct EvidencePayload {
    pub kind: String,
    #[serde(default)]
    pub filename: Option<String>,
    pub content_b64: String,
    #[serde(default)]
    pub item_id: Option<i64>,
}

pub async fn memory_evidence(
    State(state): State<AppState>,
    Json(payload): Json<EvidencePayload>,
) -> Result<Response> {
    let correlation_id = CorrelationId::new();
    let bytes = BASE64.decode(payload.content_b64.as_bytes()).map_err(|e| {
        crate::ServerError::BadRequest(format!("content_b64 is not valid base64: {e}"))
    })?;

    let outcome = state
        .gateway
        .store_evidence(
            &payload.kind,
            payload.filename.as_deref(),
            &bytes,
            payload.item_id,
        )
        .await?;

    let mut body = serde_json::to_value(&outcome)?;
    if let Some(map) = body.as_object_mut() {
        map.insert(
            "correlation_id".to_string(),
            json!(correlation_id.to_string()),
        );
    }
    Ok(Json(body).into_response())
}

pub async fn reliability_report(State(state): State<AppState>) -> Result<Response> {
    let report = report::build_report(state.gateway.mm()).await?;
    Ok(Json(report).into_response())
}
