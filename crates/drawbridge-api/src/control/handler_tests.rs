use super::*;
use crate::test_support::queued_state;
use drawbridge_protocols::{AnnotationDraft, AnnotationState, TargetDescriptor};
use std::time::Duration;

fn draft(selector: &str) -> AnnotationDraft {
    AnnotationDraft::element(TargetDescriptor::new(selector), "make it pop")
}

async fn call(state: &AppState, method: &str, params: Value) -> McpResponse {
    let request = McpRequest::new(1i64, method).with_params(params);
    handle_request(state, request).await.unwrap()
}

#[tokio::test]
async fn test_initialize_and_list_tools() {
    let (state, _dirs) = queued_state();

    let resp = call(&state, "initialize", json!({})).await;
    let result = resp.result.unwrap();
    assert_eq!(result["serverInfo"]["name"], "drawbridge");
    assert!(result["capabilities"].get("tools").is_some());

    let resp = call(&state, "tools/list", json!({})).await;
    let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
    assert_eq!(tools.len(), 7);
    assert!(tools.iter().all(|t| t.get("inputSchema").is_some()));
}

#[tokio::test]
async fn test_notification_gets_no_response() {
    let (state, _dirs) = queued_state();
    let request: McpRequest =
        serde_json::from_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .unwrap();
    assert!(handle_request(&state, request).await.is_none());
}

#[tokio::test]
async fn test_queue_lifecycle_over_bare_methods() {
    let (state, _dirs) = queued_state();
    let annotation = state.store.submit(draft(".btn")).await.unwrap();

    let resp = call(&state, "get_pending", json!({})).await;
    let pending = resp.result.unwrap();
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["id"], annotation.id.as_str());
    assert_eq!(pending[0]["state"], "pending");

    let resp = call(&state, "acknowledge", json!({"id": annotation.id})).await;
    assert_eq!(resp.result.unwrap()["state"], "acknowledged");

    let resp = call(&state, "resolve", json!({"id": annotation.id, "summary": "done"})).await;
    assert_eq!(resp.result.unwrap()["state"], "resolved");

    let resp = call(&state, "get_pending", json!({})).await;
    assert!(resp.result.unwrap().as_array().unwrap().is_empty());

    let resp = call(&state, "get_all_annotations", json!({})).await;
    assert_eq!(resp.result.unwrap().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_transition_is_reported_without_mutation() {
    let (state, _dirs) = queued_state();
    let annotation = state.store.submit(draft(".btn")).await.unwrap();

    let resp = call(&state, "resolve", json!({"id": annotation.id, "summary": "done"})).await;
    assert_eq!(resp.error.unwrap().code, McpError::INVALID_TRANSITION);

    let record = state.store.get(&annotation.id).await.unwrap();
    assert_eq!(record.state, AnnotationState::Pending);
}

#[tokio::test]
async fn test_unknown_id_and_method() {
    let (state, _dirs) = queued_state();

    let resp = call(&state, "get_annotation", json!({"id": "missing"})).await;
    assert_eq!(resp.error.unwrap().code, McpError::NOT_FOUND);

    let resp = call(&state, "frobnicate", json!({})).await;
    assert_eq!(resp.error.unwrap().code, McpError::METHOD_NOT_FOUND);

    let resp = call(&state, "dismiss", json!({"id": "x"})).await;
    assert_eq!(resp.error.unwrap().code, McpError::INVALID_PARAMS);
}

#[tokio::test]
async fn test_tool_call_errors_are_results() {
    let (state, _dirs) = queued_state();

    let resp = call(
        &state,
        "tools/call",
        json!({"name": "acknowledge", "arguments": {"id": "missing"}}),
    )
    .await;
    let result = resp.result.unwrap();
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"].as_str().unwrap().starts_with("not_found"));

    let annotation = state.store.submit(draft("h1")).await.unwrap();
    let resp = call(
        &state,
        "tools/call",
        json!({"name": "get_annotation", "arguments": {"id": annotation.id}}),
    )
    .await;
    let result = resp.result.unwrap();
    assert_eq!(result["isError"], false);
    let text = result["content"][0]["text"].as_str().unwrap();
    let record: Value = serde_json::from_str(text).unwrap();
    assert_eq!(record["id"], annotation.id.as_str());
}

#[tokio::test]
async fn test_watch_times_out_with_no_new_work() {
    let (state, _dirs) = queued_state();
    let started = std::time::Instant::now();
    let resp = call(&state, "watch", json!({"timeoutSeconds": 1})).await;
    assert_eq!(resp.result.unwrap()["status"], "no_new_work");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_watch_returns_new_submission_promptly() {
    let (state, _dirs) = queued_state();

    let watcher = {
        let state = state.clone();
        tokio::spawn(async move { call(&state, "watch", json!({"timeoutSeconds": 30})).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let annotation = state.store.submit(draft(".late")).await.unwrap();

    let resp = tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .unwrap()
        .unwrap();
    let result = resp.result.unwrap();
    assert_eq!(result["status"], "new_work");
    assert_eq!(result["annotations"][0]["id"], annotation.id.as_str());
}
