use super::*;
use crate::test_support::{auto_state, queued_state};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use drawbridge_protocols::{AnnotationDraft, AnnotationState, TargetDescriptor};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::http::handlers::ANNOTATION_ID_HEADER;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn submit_body(selector: &str) -> Value {
    json!({
        "annotation": {
            "kind": "element",
            "target": { "selector": selector, "text": "Get Started" },
            "pathname": "/pricing"
        },
        "comment": "make it green"
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let (state, _dirs) = queued_state();
    let app = create_live_router(state);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "queued");
    assert_eq!(body["annotations"]["pending"], 0);
}

#[tokio::test]
async fn test_queued_submit_returns_accepted() {
    let (state, _dirs) = queued_state();
    let app = create_live_router(state.clone());

    let response = app
        .oneshot(post_json("/annotations", submit_body(".btn")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    assert_eq!(body["route"], "queued");
    assert_eq!(body["state"], "pending");

    let id = body["annotationId"].as_str().unwrap();
    let record = state.store.get(id).await.unwrap();
    assert_eq!(record.comment, "make it green");
    assert_eq!(record.pathname, "/pricing");
}

#[tokio::test]
async fn test_submit_rejects_malformed_body() {
    let (state, _dirs) = queued_state();
    let app = create_live_router(state);

    let response = app
        .oneshot(post_json("/annotations", json!({"nonsense": true, "target": 3})))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_list_get_and_filter() {
    let (state, _dirs) = queued_state();
    let first = state
        .store
        .submit(AnnotationDraft::element(TargetDescriptor::new("h1"), "bigger"))
        .await
        .unwrap();
    state
        .store
        .submit(AnnotationDraft::element(TargetDescriptor::new("h2"), "smaller"))
        .await
        .unwrap();
    state
        .store
        .transition(&first.id, drawbridge_protocols::LifecycleEvent::Acknowledge)
        .await
        .unwrap();
    let app = create_live_router(state);

    let response = app.clone().oneshot(get("/annotations")).await.unwrap();
    let all = body_json(response).await;
    assert_eq!(all.as_array().unwrap().len(), 2);
    assert_eq!(all[0]["id"], first.id.as_str());

    let response = app
        .clone()
        .oneshot(get("/annotations?state=acknowledged"))
        .await
        .unwrap();
    let acked = body_json(response).await;
    assert_eq!(acked.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/annotations/{}", first.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "acknowledged");

    let response = app.oneshot(get("/annotations/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn test_export_document() {
    let (state, _dirs) = queued_state();
    let mut draft = AnnotationDraft::element(TargetDescriptor::new(".cta"), "rounder");
    draft.pathname = "/home".to_string();
    state.store.submit(draft).await.unwrap();
    let app = create_live_router(state);

    let response = app
        .oneshot(get("/annotations/export?pathname=/home"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["pathname"], "/home");
    assert_eq!(body["annotations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_dismisses_and_stamps_revert() {
    let (state, _dirs) = queued_state();
    let annotation = state
        .store
        .submit(AnnotationDraft::element(TargetDescriptor::new("h1"), "bigger"))
        .await
        .unwrap();
    let app = create_live_router(state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/annotations/{}", annotation.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["outcome"], "no_changes");

    let record = state.store.get(&annotation.id).await.unwrap();
    assert_eq!(record.state, AnnotationState::Dismissed);
    assert!(record.reverted_at.is_some());
}

#[tokio::test]
async fn test_auto_submit_streams_progress_until_done() {
    let (state, worker, _dirs) = auto_state("echo '{\"type\":\"result\",\"content\":\"ok\"}'");
    let shutdown = tokio_util::sync::CancellationToken::new();
    worker.spawn(shutdown.clone());
    let app = create_live_router(state.clone());

    let response = app
        .oneshot(post_json("/annotations", submit_body(".btn")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = response
        .headers()
        .get(ANNOTATION_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let events: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(events.last().unwrap()["type"], "done");
    assert!(events.iter().any(|e| e["type"] == "result"));
    assert!(events.iter().all(|e| e["annotationId"] == id.as_str()));

    let record = state.store.get(&id).await.unwrap();
    assert_eq!(record.state, AnnotationState::Resolved);
    shutdown.cancel();
}

#[tokio::test]
async fn test_control_router_serves_json_rpc() {
    let (state, _dirs) = queued_state();
    let app = create_control_router(state);

    let response = app
        .clone()
        .oneshot(post_json(
            "/mcp",
            json!({"jsonrpc": "2.0", "id": 7, "method": "get_pending"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], 7);
    assert_eq!(body["result"], json!([]));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
    assert!(body["id"].is_null());

    let response = app
        .oneshot(post_json(
            "/mcp",
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}
