//! HTTP surface tests driven through the router with `oneshot`: response
//! shapes, correlation ids, MCP dispatch, error envelopes.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use mnemo_common::config::AppConfig;
use mnemo_core::ModelManager;
use mnemo_core::ids::CorrelationId;
use mnemo_gateway::external::ExternalMemoryClient;
use mnemo_gateway::gateway::MemoryGateway;
use mnemo_server::{AppState, app};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

struct TestServer {
    router: Router,
    #[allow(dead_code)]
    temp_dir: TempDir,
}

async fn test_server(external_url: &str) -> TestServer {
    let temp_dir = TempDir::new().expect("temp dir");
    let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = temp_dir.path().join(format!("server_test_{counter}.db"));
    let artifacts_root = temp_dir.path().join("artifacts");
    std::fs::create_dir_all(&artifacts_root).expect("artifacts dir");

    let config = AppConfig::default();
    let db = mnemo_core::store::open_and_migrate(&db_path).await.expect("db");
    let mm = ModelManager::new_for_test(db, artifacts_root, Arc::new(config.clone()));
    let external = ExternalMemoryClient::new(external_url, 2).expect("external");
    let gateway = Arc::new(MemoryGateway::new(mm, external, config.gateway.clone()));

    TestServer {
        router: app(AppState::new(gateway, &config)),
        temp_dir,
    }
}

async fn json_request(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let request = builder.body(body).expect("request");
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

fn store_payload() -> Value {
    json!({
        "kind": "FACT",
        "owner": "alice",
        "module": "scm/sync",
        "summary": "Cursor advancement is monotonic",
        "details": ["Watermark compares (ts, sha) lexicographically"],
        "target_space": "team:alpha",
    })
}

#[tokio::test]
async fn health_reports_the_contracted_shape() {
    let server = test_server("http://127.0.0.1:1").await;
    let (status, body) = json_request(&server.router, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["service"], json!("memory-gateway"));
    assert_eq!(body["seekdb"], json!("disabled"));
}

#[tokio::test]
async fn memory_store_returns_contract_fields() {
    let external = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/memory/store"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"memory_id": "mem-1"})))
        .mount(&external)
        .await;

    let server = test_server(&external.uri()).await;
    let (status, body) =
        json_request(&server.router, "POST", "/memory/store", Some(store_payload())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["action"], json!("allow"));
    assert_eq!(body["memory_id"], json!("mem-1"));
    let corr = body["correlation_id"].as_str().expect("correlation id");
    assert!(CorrelationId::is_valid(corr), "{corr}");
}

#[tokio::test]
async fn deferred_store_carries_outbox_id() {
    let server = test_server("http://127.0.0.1:1").await;
    let (status, body) =
        json_request(&server.router, "POST", "/memory/store", Some(store_payload())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["action"], json!("deferred"));
    assert!(body["outbox_id"].is_i64(), "{body}");
    assert!(
        body["reason"]
            .as_str()
            .is_some_and(|r| r.starts_with("openmemory_write_failed:")),
        "{body}"
    );
}

#[tokio::test]
async fn query_response_includes_correlation_id() {
    let external = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/memory/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": []})))
        .mount(&external)
        .await;

    let server = test_server(&external.uri()).await;
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/memory/query",
        Some(json!({"query": "cursor"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["degraded"], json!(false));
    assert!(
        body["correlation_id"]
            .as_str()
            .is_some_and(CorrelationId::is_valid)
    );
}

#[tokio::test]
async fn reliability_report_shape() {
    let server = test_server("http://127.0.0.1:1").await;

    // Produce one deferred write so the report has content.
    let _ = json_request(&server.router, "POST", "/memory/store", Some(store_payload())).await;

    let (status, body) = json_request(&server.router, "GET", "/reliability/report", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["outbox_stats"]["total"], json!(1));
    assert_eq!(body["outbox_stats"]["by_status"]["pending"], json!(1));
    assert!(body["outbox_stats"]["by_status"]["dead"].is_i64());
    assert_eq!(body["audit_stats"]["by_action"]["redirect"], json!(1));
    assert!(body["audit_stats"]["by_reason"].is_object());
    assert!(body["generated_at"].as_str().is_some_and(|t| t.ends_with('Z')));
}

#[tokio::test]
async fn evidence_upload_rounds_trip_and_caps() {
    use base64::Engine as _;
    let server = test_server("http://127.0.0.1:1").await;

    let content = base64::engine::general_purpose::STANDARD.encode(b"evidence bytes");
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/memory/evidence",
        Some(json!({"kind": "log", "filename": "build.log", "content_b64": content})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert!(body["attachment_id"].is_i64());
    assert!(
        body["uri"]
            .as_str()
            .is_some_and(|u| u.starts_with("memory://attachments/")),
        "{body}"
    );
    assert!(
        body["correlation_id"]
            .as_str()
            .is_some_and(CorrelationId::is_valid)
    );

    // Oversized content is a structured failure, not a 5xx.
    let big = base64::engine::general_purpose::STANDARD
        .encode(vec![0u8; 10 * 1024 * 1024 + 1]);
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/memory/evidence",
        Some(json!({"kind": "log", "content_b64": big})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["error_code"], json!("content_too_large"));
}

#[tokio::test]
async fn mcp_tools_list_enumerates_the_contracted_tools() {
    let server = test_server("http://127.0.0.1:1").await;
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/mcp",
        Some(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jsonrpc"], json!("2.0"));
    assert_eq!(body["id"], json!(1));
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .expect("tools")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    for expected in [
        "memory_store",
        "memory_query",
        "reliability_report",
        "governance_update",
    ] {
        assert!(names.contains(&expected), "{names:?}");
    }
}

#[tokio::test]
async fn mcp_unknown_method_is_32601() {
    let server = test_server("http://127.0.0.1:1").await;
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/mcp",
        Some(json!({"jsonrpc": "2.0", "id": 7, "method": "resources/list"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], json!(-32601));
    assert_eq!(body["id"], json!(7));
}

#[tokio::test]
async fn mcp_tools_call_dispatches_memory_store() {
    let external = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/memory/store"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"memory_id": "mem-5"})))
        .mount(&external)
        .await;

    let server = test_server(&external.uri()).await;
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/mcp",
        Some(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "memory_store", "arguments": store_payload()},
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let text = body["result"]["content"][0]["text"].as_str().expect("text");
    let inner: Value = serde_json::from_str(text).expect("inner json");
    assert_eq!(inner["action"], json!("allow"));
    assert_eq!(inner["memory_id"], json!("mem-5"));
}

#[tokio::test]
async fn mcp_governance_update_flips_policy() {
    let external = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/memory/store"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"memory_id": "mem-6"})))
        .mount(&external)
        .await;

    let server = test_server(&external.uri()).await;

    let (_, body) = json_request(
        &server.router,
        "POST",
        "/mcp",
        Some(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {
                "name": "governance_update",
                "arguments": {"project_key": "default", "team_write_enabled": false},
            },
        })),
    )
    .await;
    assert!(body["result"]["content"][0]["text"].is_string(), "{body}");

    // The next team-space store redirects.
    let (_, body) =
        json_request(&server.router, "POST", "/memory/store", Some(store_payload())).await;
    assert_eq!(body["action"], json!("redirect"));
    assert_eq!(body["reason"], json!("policy:team_write_disabled"));
}

#[tokio::test]
async fn mcp_missing_tool_is_invalid_params() {
    let server = test_server("http://127.0.0.1:1").await;
    let (_, body) = json_request(
        &server.router,
        "POST",
        "/mcp",
        Some(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "no_such_tool", "arguments": {}},
        })),
    )
    .await;
    assert_eq!(body["error"]["code"], json!(-32602));
}
