//! # mnemo-server: the gateway's HTTP surface
//!
//! Routes: `/health`, `/reliability/report`, `/memory/store`,
//! `/memory/query`, `/memory/evidence`, and the JSON-RPC `/mcp` endpoint.
//! Correlation ids are generated here, at the boundary, and threaded into
//! every gateway call.

use axum::routing::{get, post};
use axum::{Router, extract::State, response::IntoResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod mcp;

pub use error::ServerError;
use mnemo_common::config::AppConfig;
use mnemo_gateway::gateway::MemoryGateway;

// --- Application State
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<MemoryGateway>,
    pub seekdb_enabled: bool,
}

impl AppState {
    pub fn new(gateway: Arc<MemoryGateway>, config: &AppConfig) -> Self {
        AppState {
            gateway,
            seekdb_enabled: config.gateway.seekdb_enabled,
        }
    }
}

/// Build the full router; extracted so tests can drive it with
/// `tower::ServiceExt::oneshot`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/reliability/report", get(api::reliability_report))
        .route("/memory/store", post(api::memory_store))
        .route("/memory/query", post(api::memory_query))
        .route("/memory/evidence", post(api::memory_evidence))
        .route("/mcp", post(mcp::mcp_handler))
        // Evidence uploads arrive base64-encoded; the handler enforces the
        // decoded-size cap, so the transport limit sits above it.
        .layer(axum::extract::DefaultBodyLimit::max(64 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run(state: AppState, config: &AppConfig) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ServerError::BadRequest(format!("invalid listen address: {e}")))?;

    let app = app(state);

    tracing::info!("memory gateway listening on {addr}");
    tracing::info!("health check: http://{addr}/health");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[allow(clippy::expect_used)] // Signal handler setup is infallible in practice
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Signal received, starting graceful shutdown");
}

#[derive(serde::Serialize)]
struct HealthResponse {
    ok: bool,
    status: &'static str,
    service: &'static str,
    seekdb: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(HealthResponse {
        ok: true,
        status: "ok",
        service: "memory-gateway",
        seekdb: if state.seekdb_enabled {
            "enabled"
        } else {
            "disabled"
        },
    })
}
