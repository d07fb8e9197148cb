//! Daemon scenarios driven over real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use drawbridge_api::{DrawbridgeServer, Services};
use drawbridge_config::{Config, Mode, ProviderKind};
use drawbridge_protocols::AnnotationState;

struct Daemon {
    services_state: std::sync::Arc<drawbridge_api::AppState>,
    live: SocketAddr,
    control: SocketAddr,
    shutdown: CancellationToken,
    work: TempDir,
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn config(work: &TempDir, mode: Mode, script: &str, timeout_secs: u64) -> Config {
    let mut config = Config::default();
    config.mode = mode;
    config.work_dir = Some(work.path().to_path_buf());
    config.agent.provider = ProviderKind::Command;
    config.agent.command = Some("sh".to_string());
    config.agent.args = vec!["-c".to_string(), script.to_string()];
    config.agent.timeout_secs = timeout_secs;
    config.agent.grace_period_secs = 1;
    config.server.host = "127.0.0.1".to_string();
    config.resolve_paths(work.path())
}

async fn start(mode: Mode, script: &str, timeout_secs: u64) -> Daemon {
    let work = TempDir::new().unwrap();
    std::fs::write(work.path().join("button.css"), ".btn { color: blue; }\n").unwrap();
    let config = config(&work, mode, script, timeout_secs);

    let shutdown = CancellationToken::new();
    let services = Services::from_config(&config, shutdown.clone()).await.unwrap();
    if let Some(worker) = services.worker {
        worker.spawn(shutdown.clone());
    }
    let server = DrawbridgeServer::new("127.0.0.1:0", "127.0.0.1:0", services.state.clone());
    let handle = server.start(shutdown.clone()).await.unwrap();

    Daemon {
        services_state: services.state,
        live: handle.live_addr(),
        control: handle.control_addr(),
        shutdown,
        work,
    }
}

fn submit_message() -> String {
    json!({
        "type": "annotation_submit",
        "annotation": {
            "kind": "element",
            "target": {
                "selector": ".btn",
                "tagName": "button",
                "text": "Get Started"
            },
            "pathname": "/",
            "viewport": { "width": 1280, "height": 800, "scrollX": 0, "scrollY": 0 }
        },
        "comment": "make the button green"
    })
    .to_string()
}

/// Read live messages until the `done` event for the submission arrives.
async fn read_until_done(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Vec<Value> {
    let mut messages = Vec::new();
    tokio::time::timeout(Duration::from_secs(20), async {
        while let Some(frame) = ws.next().await {
            let Message::Text(text) = frame.unwrap() else {
                continue;
            };
            let value: Value = serde_json::from_str(&text).unwrap();
            let done = value["type"] == "done";
            messages.push(value);
            if done {
                break;
            }
        }
    })
    .await
    .expect("no done event");
    messages
}

async fn rpc(control: SocketAddr, method: &str, params: Value) -> Value {
    let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    reqwest::Client::new()
        .post(format!("http://{control}/mcp"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap()
}

#[tokio::test]
async fn auto_mode_resolves_and_records_change() {
    let script = r#"
echo '{"type":"tool_use","tool_name":"Edit","tool_input":{"file_path":"button.css"}}'
echo '.btn { color: green; }' > button.css
echo '{"type":"result","content":"Button is green now"}'
"#;
    let daemon = start(Mode::Auto, script, 30).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", daemon.live))
        .await
        .unwrap();
    ws.send(Message::Text(submit_message())).await.unwrap();

    let messages = read_until_done(&mut ws).await;
    assert_eq!(messages[0]["type"], "connected");
    let accepted = messages.iter().find(|m| m["type"] == "accepted").unwrap();
    assert_eq!(accepted["route"], "dispatched");
    let id = accepted["annotationId"].as_str().unwrap().to_string();

    let progress: Vec<&Value> = messages
        .iter()
        .filter(|m| m.get("timestamp").is_some())
        .collect();
    assert!(progress.iter().all(|m| m["annotationId"] == id.as_str()));
    assert!(progress.iter().any(|m| m["type"] == "tool_use"));

    // The worker resolves after the final event; give it a moment.
    let mut record = daemon.services_state.store.get(&id).await.unwrap();
    for _ in 0..50 {
        if record.state == AnnotationState::Resolved {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        record = daemon.services_state.store.get(&id).await.unwrap();
    }
    assert_eq!(record.state, AnnotationState::Resolved);
    assert_eq!(record.resolution.as_deref(), Some("Button is green now"));

    let changes = daemon
        .services_state
        .dispatcher
        .tree()
        .snapshots()
        .records_for(&id);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].touched_paths, vec!["button.css".to_string()]);

    // Deleting the annotation puts the file back.
    ws.send(Message::Text(
        json!({"type": "annotation_delete", "annotationId": id}).to_string(),
    ))
    .await
    .unwrap();
    let reverted = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "reverted" {
                    return value;
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(reverted["outcome"], "reverted");
    assert_eq!(
        std::fs::read_to_string(daemon.work.path().join("button.css")).unwrap(),
        ".btn { color: blue; }\n"
    );

    // Submitting the reverted annotation again runs the agent again.
    let mut again: Value = serde_json::from_str(&submit_message()).unwrap();
    again["annotation"]["id"] = json!(id);
    ws.send(Message::Text(again.to_string())).await.unwrap();
    let messages = read_until_done(&mut ws).await;
    let accepted = messages.iter().find(|m| m["type"] == "accepted").unwrap();
    assert_eq!(accepted["annotationId"], id.as_str());

    let record = wait_for_state(&daemon, &id, AnnotationState::Resolved).await;
    assert!(record.reverted_at.is_none());
    let changes = daemon
        .services_state
        .dispatcher
        .tree()
        .snapshots()
        .records_for(&id);
    assert_eq!(changes.len(), 1);
    assert_eq!(
        std::fs::read_to_string(daemon.work.path().join("button.css")).unwrap(),
        ".btn { color: green; }\n"
    );
}

#[tokio::test]
async fn queued_mode_is_driven_by_external_agent() {
    let daemon = start(Mode::Queued, "exit 1", 30).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", daemon.live))
        .await
        .unwrap();
    ws.send(Message::Text(submit_message())).await.unwrap();

    let id = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "accepted" {
                    assert_eq!(value["route"], "queued");
                    return value["annotationId"].as_str().unwrap().to_string();
                }
            }
        }
    })
    .await
    .unwrap();

    let pending = rpc(daemon.control, "get_pending", json!({})).await;
    let pending = pending["result"].as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["id"], id.as_str());
    assert_eq!(pending[0]["state"], "pending");

    let acked = rpc(daemon.control, "acknowledge", json!({"id": id})).await;
    assert_eq!(acked["result"]["state"], "acknowledged");

    let resolved = rpc(daemon.control, "resolve", json!({"id": id, "summary": "done"})).await;
    assert_eq!(resolved["result"]["state"], "resolved");

    let pending = rpc(daemon.control, "get_pending", json!({})).await;
    assert!(pending["result"].as_array().unwrap().is_empty());

    let again = rpc(daemon.control, "acknowledge", json!({"id": id})).await;
    assert_eq!(again["error"]["code"], -32002);
}

/// Submit over `POST /annotations` and collect the SSE stream.
async fn post_annotation(daemon: &Daemon, body: Value) -> (String, Vec<Value>) {
    let response = reqwest::Client::new()
        .post(format!("http://{}/annotations", daemon.live))
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let id = response
        .headers()
        .get("x-annotation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let body = tokio::time::timeout(Duration::from_secs(20), response.text())
        .await
        .unwrap()
        .unwrap();
    let events = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();
    (id, events)
}

async fn wait_for_state(
    daemon: &Daemon,
    id: &str,
    state: AnnotationState,
) -> drawbridge_protocols::Annotation {
    let mut record = daemon.services_state.store.get(id).await.unwrap();
    for _ in 0..100 {
        if record.state == state {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        record = daemon.services_state.store.get(id).await.unwrap();
    }
    assert_eq!(record.state, state);
    record
}

#[tokio::test]
async fn timed_out_run_commits_nothing_and_can_retry() {
    // The first attempt hangs; later ones edit the file and finish.
    let script = r#"
mkdir -p .drawbridge
n=$(cat .drawbridge/attempts 2>/dev/null || echo 0)
n=$((n + 1))
echo "$n" > .drawbridge/attempts
if [ "$n" -eq 1 ]; then
    echo '.btn { color: red; }' > button.css
    sleep 30
fi
echo ".btn { color: green; border: ${n}px; }" > button.css
echo "{\"type\":\"result\",\"content\":\"attempt $n\"}"
"#;
    let daemon = start(Mode::Auto, script, 1).await;
    let body = json!({
        "target": { "selector": ".btn", "text": "Get Started" },
        "comment": "make the button green"
    });

    let (id, events) = post_annotation(&daemon, body.clone()).await;
    let done = events.last().unwrap();
    assert_eq!(done["type"], "done");
    assert_eq!(done["is_error"], true);

    let record = wait_for_state(&daemon, &id, AnnotationState::Pending).await;
    assert_eq!(record.attempts, 1);
    assert!(record.last_failure.unwrap().contains("timed out"));

    let snapshots = daemon.services_state.dispatcher.tree().snapshots();
    assert!(snapshots.records_for(&id).is_empty());
    assert_eq!(
        std::fs::read_to_string(daemon.work.path().join("button.css")).unwrap(),
        ".btn { color: blue; }\n"
    );

    // Eligible for an external agent now.
    let pending = rpc(daemon.control, "get_pending", json!({})).await;
    assert_eq!(pending["result"][0]["id"], id.as_str());

    // Re-submitting the same id runs it again.
    let mut retry = body.clone();
    retry["id"] = json!(id);
    let (retried_id, events) = post_annotation(&daemon, retry.clone()).await;
    assert_eq!(retried_id, id);
    assert_eq!(events.last().unwrap()["is_error"], false);
    let record = wait_for_state(&daemon, &id, AnnotationState::Resolved).await;
    assert_eq!(record.resolution.as_deref(), Some("attempt 2"));
    assert_eq!(snapshots.records_for(&id).len(), 1);

    // A resolved record re-opens and adds a second change record.
    let (_, events) = post_annotation(&daemon, retry).await;
    assert_eq!(events.last().unwrap()["is_error"], false);
    let record = wait_for_state(&daemon, &id, AnnotationState::Resolved).await;
    assert_eq!(record.resolution.as_deref(), Some("attempt 3"));
    assert_eq!(snapshots.records_for(&id).len(), 2);
    assert_eq!(daemon.services_state.store.len().await, 1);
}

#[tokio::test]
async fn live_disconnect_does_not_abort_run() {
    let script = r#"
echo 'working on it'
sleep 1
echo '.btn { color: green; }' > button.css
echo '{"type":"result","content":"finished without a listener"}'
"#;
    let daemon = start(Mode::Auto, script, 30).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", daemon.live))
        .await
        .unwrap();
    ws.send(Message::Text(submit_message())).await.unwrap();

    let id = tokio::time::timeout(Duration::from_secs(10), async {
        let mut id = None;
        let mut running = false;
        loop {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "accepted" {
                    id = value["annotationId"].as_str().map(String::from);
                }
                running |= value["type"] == "message";
            }
            if let (Some(id), true) = (&id, running) {
                return id.clone();
            }
        }
    })
    .await
    .unwrap();

    // Gone while the agent is still running.
    drop(ws);

    let record = wait_for_state(&daemon, &id, AnnotationState::Resolved).await;
    assert_eq!(record.resolution.as_deref(), Some("finished without a listener"));
    let changes = daemon
        .services_state
        .dispatcher
        .tree()
        .snapshots()
        .records_for(&id);
    assert_eq!(changes.len(), 1);
    assert_eq!(
        std::fs::read_to_string(daemon.work.path().join("button.css")).unwrap(),
        ".btn { color: green; }\n"
    );
}
