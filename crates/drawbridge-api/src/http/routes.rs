//! HTTP route definitions.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::control::mcp_handler;
use crate::http::handlers::{
    delete_annotation, export_annotations, get_annotation, health, list_annotations,
    submit_annotation,
};
use crate::live::ws_handler;
use crate::state::AppState;

/// Router for the live listener.
///
/// ```text
/// GET    /ws                   - Live channel (WebSocket)
/// POST   /annotations          - Submit; SSE progress (auto) or 202 (queued)
/// GET    /annotations          - List, filtered by ?state= and ?pathname=
/// GET    /annotations/export   - Export document for ?pathname=
/// GET    /annotations/{id}     - One record
/// DELETE /annotations/{id}     - Revert the annotation's changes
/// GET    /health               - Mode, counts, uptime
/// ```
pub fn create_live_router(state: Arc<AppState>) -> Router {
    let annotation_routes = Router::new()
        .route("/", post(submit_annotation).get(list_annotations))
        .route("/export", get(export_annotations))
        .route("/{id}", get(get_annotation).delete(delete_annotation))
        .with_state(state.clone());

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
        .nest("/annotations", annotation_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Router for the control listener: `POST /mcp` plus `GET /health`.
pub fn create_control_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
