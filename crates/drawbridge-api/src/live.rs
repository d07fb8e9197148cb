//! Live channel WebSocket handler.
//!
//! Each overlay connection is a session. Submissions are routed with the
//! session as the event sink, so progress reaches only the submitter.
//! Fragmented frames are reassembled by the WebSocket layer before they
//! get here.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use drawbridge_protocols::{ControlMessage, LiveInbound, LiveOutbound};

use crate::error::ApiError;
use crate::session::{EventSink, SessionSender};
use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, "live session connected");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<LiveOutbound>();
    state.sessions.register(session_id.clone(), tx.clone());

    let _ = tx.send(
        ControlMessage::Connected {
            session_id: session_id.clone(),
        }
        .into(),
    );

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg.to_text() {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "failed to encode live message"),
            }
        }
    });

    while let Some(result) = receiver.next().await {
        let parsed = match result {
            Ok(Message::Text(text)) => LiveInbound::parse(text.as_str()),
            Ok(Message::Binary(bytes)) => LiveInbound::parse_bytes(&bytes),
            Ok(Message::Close(_)) => {
                debug!(session_id = %session_id, "close frame received");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "live session error");
                break;
            }
        };

        match parsed {
            Ok(msg @ LiveInbound::AnnotationDelete { .. }) => {
                // Reverts can wait on a running agent; keep reading meanwhile.
                let state = state.clone();
                let tx = tx.clone();
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    handle_message(msg, &state, &session_id, &tx).await;
                });
            }
            Ok(msg) => handle_message(msg, &state, &session_id, &tx).await,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "invalid live message");
                let _ = tx.send(
                    ControlMessage::Rejected {
                        code: "invalid_message".to_string(),
                        message: e.to_string(),
                    }
                    .into(),
                );
            }
        }
    }

    // In-flight runs keep going; their events are dropped from here on.
    state.sessions.unregister(&session_id);
    drop(tx);
    sender_task.abort();
    info!(session_id = %session_id, "live session disconnected");
}

async fn handle_message(msg: LiveInbound, state: &AppState, session_id: &str, tx: &SessionSender) {
    let reply = match msg {
        LiveInbound::Ping => ControlMessage::Pong,
        LiveInbound::AnnotationDelete { annotation_id } => {
            match state.dispatcher.revert(&annotation_id).await {
                Ok(outcome) => ControlMessage::Reverted {
                    annotation_id,
                    outcome: outcome.status(),
                    paths: outcome.paths().to_vec(),
                },
                Err(e) => rejected(&e),
            }
        }
        msg @ LiveInbound::AnnotationSubmit { .. } => {
            let Some(draft) = msg.into_draft() else {
                return;
            };
            // Accepted must precede any progress for the annotation, so
            // it is queued on the session before routing.
            let annotation = match state.store.resubmit(draft).await {
                Ok(annotation) => annotation,
                Err(e) => {
                    let _ = tx.send(rejected(&ApiError::from(e)).into());
                    return;
                }
            };
            let _ = tx.send(
                ControlMessage::Accepted {
                    annotation_id: annotation.id.clone(),
                    route: state.router.kind(),
                }
                .into(),
            );
            let sink = EventSink::session(state.sessions.clone(), session_id);
            match state.router.route(annotation, sink).await {
                Ok(_) => return,
                Err(e) => rejected(&e),
            }
        }
    };
    let _ = tx.send(reply.into());
}

fn rejected(e: &ApiError) -> ControlMessage {
    ControlMessage::Rejected {
        code: e.code().to_string(),
        message: e.to_string(),
    }
}
