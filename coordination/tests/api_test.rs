//! HTTP API tests
//!
//! Drives the axum router in-process with `oneshot`:
//! - Agent registration and the duplicate conflict
//! - Structured 400 bodies for malformed input
//! - Domain rejections as 200 REJECTED responses
//! - Full single-phase flow ending in a queryable trace
//! - Cancellation and consensus lookups

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use swarm_coordinator::api::{create_router, AppState};
use swarm_coordinator::{Engine, EngineConfig};

fn test_app() -> Router {
    let config = EngineConfig {
        phases: vec!["only".to_string()],
        aggregation_wait_ms: 20,
        aggregation_poll_ms: 5,
        ..EngineConfig::default()
    };
    let engine = Engine::in_memory(config).unwrap().shared();
    create_router(AppState::new(engine))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn report(work_item: &str, level: &str, agent: &str, correlation: &str) -> Value {
    json!({
        "work_item_id": work_item,
        "phase": "only",
        "agent_level": level,
        "agent_id": agent,
        "payload": {"result": "ok"},
        "correlation_id": correlation,
    })
}

#[tokio::test]
async fn test_health_on_fresh_engine() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "HEALTHY");
    assert_eq!(body["registered_agents"], 0);
    assert_eq!(body["active_work_item"], Value::Null);
}

#[tokio::test]
async fn test_register_and_duplicate_conflict() {
    let app = test_app();
    let agent = json!({"agent_id": "au-1", "level": "L1", "capabilities": ["action_unit"]});

    let (status, body) = send(&app, "POST", "/agents/register", Some(agent.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent_id"], "au-1");
    assert_eq!(body["level"], "L1");

    let (status, body) = send(&app, "POST", "/agents/register", Some(agent)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_AGENT");

    let (status, _) = send(
        &app,
        "POST",
        "/agents/deregister",
        Some(json!({"agent_id": "au-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health["registered_agents"], 0);
}

#[tokio::test]
async fn test_malformed_body_is_structured_400() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/coordinate")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "MALFORMED_BODY");

    // Unknown level is a schema error, not a domain rejection
    let (status, body) = send(
        &app,
        "POST",
        "/coordinate",
        Some(report("V1", "L9", "au-1", "c-1")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MALFORMED_BODY");
}

#[tokio::test]
async fn test_domain_rejection_is_200() {
    let app = test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/coordinate",
        Some(report("V1", "L1", "ghost", "c-1")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "REJECTED");
    assert_eq!(body["reason"], "UNKNOWN_AGENT");
    assert_eq!(body["correlation_id"], "c-1");
}

#[tokio::test]
async fn test_single_phase_flow_records_trace() {
    let app = test_app();
    send(
        &app,
        "POST",
        "/agents/register",
        Some(json!({"agent_id": "ceo", "level": "L5"})),
    )
    .await;

    let (status, item) = send(
        &app,
        "POST",
        "/work-items",
        Some(json!({"video_id": "V1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["id"], "V1");
    assert_eq!(item["state"], "ACTIVE");

    let (status, snapshot) = send(&app, "GET", "/consensus?work_item_id=V1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["threshold_met"], true);

    let (status, body) = send(
        &app,
        "POST",
        "/coordinate",
        Some(report("V1", "L5", "ceo", "c-1")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COORDINATED");
    assert_eq!(body["next_actions"], json!(["update-traces", "advance-to-next-item"]));

    let (status, trace) = send(&app, "GET", "/traces/V1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trace["work_item_id"], "V1");

    let (status, traces) = send(&app, "GET", "/traces?from=V1&to=V1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(traces.as_array().map(Vec::len), Some(1));

    let (_, recent) = send(&app, "GET", "/traces?limit=5", None).await;
    assert_eq!(recent.as_array().map(Vec::len), Some(1));

    let (status, body) = send(&app, "GET", "/traces?from=V1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MALFORMED_QUERY");

    let (status, body) = send(
        &app,
        "POST",
        "/work-items",
        Some(json!({"work_item_id": "V1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_WORK_ITEM");
}

#[tokio::test]
async fn test_missing_trace_is_404() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/traces/V404", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "TRACE_NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_then_report_is_item_canceled() {
    let app = test_app();
    send(
        &app,
        "POST",
        "/agents/register",
        Some(json!({"agent_id": "au-1", "level": "L1", "capabilities": ["action_unit"]})),
    )
    .await;
    send(&app, "POST", "/work-items", Some(json!({"work_item_id": "V1"}))).await;

    let (status, item) = send(&app, "POST", "/work-items/V1/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["state"], "FAILED");

    let (_, body) = send(
        &app,
        "POST",
        "/coordinate",
        Some(report("V1", "L1", "au-1", "c-2")),
    )
    .await;
    assert_eq!(body["status"], "REJECTED");
    assert_eq!(body["reason"], "ITEM_CANCELED");

    let (status, _) = send(&app, "POST", "/work-items/V9/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_consensus_for_pending_item_conflicts() {
    let app = test_app();
    send(&app, "POST", "/work-items", Some(json!({"work_item_id": "V1"}))).await;
    send(&app, "POST", "/work-items", Some(json!({"work_item_id": "V2"}))).await;

    let (status, body) = send(&app, "GET", "/consensus?work_item_id=V2", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NO_ACTIVE_ITEM");

    let (status, _) = send(&app, "GET", "/consensus?work_item_id=V7", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
