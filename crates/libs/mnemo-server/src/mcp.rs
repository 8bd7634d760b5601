//! JSON-RPC 2.0 endpoint exposing the gateway as MCP-style tools.
//!
//! Methods: `initialize`, `tools/list`, `tools/call`. Tool results wrap
//! the same JSON the REST surface returns. Unknown methods are `-32601`,
//! malformed JSON is `-32700`, bad params are `-32602`.

use crate::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use mnemo_core::ids::CorrelationId;
use mnemo_core::model::team_settings::TeamSettingsBmc;
use mnemo_gateway::card::MemoryCard;
use mnemo_gateway::report;
use serde_json::{Value, json};

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

fn rpc_result(id: Value, result: Value) -> Json<Value> {
    Json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

fn rpc_error(id: Value, code: i64, message: &str) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    }))
}

/// Wrap a tool payload in MCP content form.
fn tool_content(payload: &Value) -> Value {
    json!({
        "content": [{"type": "text", "text": payload.to_string()}],
        "isError": false,
    })
}

pub async fn mcp_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return rpc_error(Value::Null, PARSE_ERROR, "Parse error").into_response();
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return rpc_error(id, INVALID_PARAMS, "missing method").into_response();
    };
    let params = request.get("params").cloned().unwrap_or(json!({}));

    match method {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "memory-gateway", "version": env!("CARGO_PKG_VERSION")},
                "capabilities": {"tools": {}},
            }),
        )
        .into_response(),
        "tools/list" => rpc_result(id, json!({"tools": tool_schemas()})).into_response(),
        "tools/call" => tools_call(state, id, params).await.into_response(),
        _ => rpc_error(id, METHOD_NOT_FOUND, "Method not found").into_response(),
    }
}

async fn tools_call(state: AppState, id: Value, params: Value) -> Json<Value> {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return rpc_error(id, INVALID_PARAMS, "missing tool name");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    match name {
        "memory_store" => {
            let target_space = arguments
                .get("target_space")
                .and_then(Value::as_str)
                .unwrap_or("team")
                .to_string();
            let actor_known = arguments
                .get("actor_known")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let card: MemoryCard = match serde_json::from_value(arguments) {
                Ok(card) => card,
                Err(e) => return rpc_error(id, INVALID_PARAMS, &format!("invalid card: {e}")),
            };
            let correlation_id = CorrelationId::new();
            match state
                .gateway
                .store(&card, actor_known, &target_space, &correlation_id)
                .await
            {
                Ok(outcome) => match serde_json::to_value(&outcome) {
                    Ok(payload) => rpc_result(id, tool_content(&payload)),
                    Err(e) => rpc_error(id, INTERNAL_ERROR, &e.to_string()),
                },
                Err(e) => rpc_error(id, INTERNAL_ERROR, &e.to_string()),
            }
        }
        "memory_query" => {
            let Some(query) = arguments.get("query").and_then(Value::as_str) else {
                return rpc_error(id, INVALID_PARAMS, "missing query");
            };
            let space = arguments
                .get("space")
                .and_then(Value::as_str)
                .map(str::to_string);
            let limit = arguments
                .get("limit")
                .and_then(Value::as_u64)
                .unwrap_or(10)
                .clamp(1, 100) as usize;
            let correlation_id = CorrelationId::new();
            match state
                .gateway
                .query(query, space.as_deref(), limit, &correlation_id)
                .await
            {
                Ok(outcome) => match serde_json::to_value(&outcome) {
                    Ok(payload) => rpc_result(id, tool_content(&payload)),
                    Err(e) => rpc_error(id, INTERNAL_ERROR, &e.to_string()),
                },
                Err(e) => rpc_error(id, INTERNAL_ERROR, &e.to_string()),
            }
        }
        "reliability_report" => match report::build_report(state.gateway.mm()).await {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(payload) => rpc_result(id, tool_content(&payload)),
                Err(e) => rpc_error(id, INTERNAL_ERROR, &e.to_string()),
            },
            Err(e) => rpc_error(id, INTERNAL_ERROR, &e.to_string()),
        },
        "governance_update" => {
            let Some(project_key) = arguments.get("project_key").and_then(Value::as_str) else {
                return rpc_error(id, INVALID_PARAMS, "missing project_key");
            };
            let Some(team_write_enabled) = arguments
                .get("team_write_enabled")
                .and_then(Value::as_bool)
            else {
                return rpc_error(id, INVALID_PARAMS, "missing team_write_enabled");
            };
            let policy = arguments.get("policy").cloned();
            match TeamSettingsBmc::upsert(
                state.gateway.mm(),
                project_key,
                team_write_enabled,
                policy,
            )
            .await
            {
                Ok(()) => rpc_result(
                    id,
                    tool_content(&json!({
                        "ok": true,
                        "project_key": project_key,
                        "team_write_enabled": team_write_enabled,
                    })),
                ),
                Err(e) => rpc_error(id, INTERNAL_ERROR, &e.to_string()),
            }
        }
        other => rpc_error(id, INVALID_PARAMS, &format!("unknown tool: {other}")),
    }
}

fn tool_schemas() -> Value {
    json!([
        {
            "name": "memory_store",
            "description": "Store a structured memory card through the write-gated path",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "kind": {"type": "string"},
                    "owner": {"type": "string"},
                    "module": {"type": "string"},
                    "summary": {"type": "string"},
                    "details": {"type": "array", "items": {"type": "string"}},
                    "evidence": {"type": "array"},
                    "confidence": {"type": "string"},
                    "visibility": {"type": "string"},
                    "ttl": {"type": "string"},
                    "target_space": {"type": "string"},
                },
                "required": ["owner", "summary", "target_space"],
            },
        },
        {
            "name": "memory_query",
            "description": "Search stored memories, with a local fallback when the backend is down",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "space": {"type": "string"},
                    "limit": {"type": "integer"},
                },
                "required": ["query"],
            },
        },
        {
            "name": "reliability_report",
            "description": "Aggregate outbox and audit statistics",
            "inputSchema": {"type": "object", "properties": {}},
        },
        {
            "name": "governance_update",
            "description": "Update per-project write policy settings",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project_key": {"type": "string"},
                    "team_write_enabled": {"type": "boolean"},
                    "policy": {"type": "object"},
                },
                "required": ["project_key", "team_write_enabled"],
            },
        },
    ])
}
