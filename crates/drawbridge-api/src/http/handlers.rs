//! Handlers for the annotation REST endpoints and health.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use drawbridge_protocols::{
    AnnotationDraft, AnnotationState, ExportDocument, LiveOutbound, RevertStatus, RouteKind,
};
use drawbridge_store::{ListFilter, StateCounts};

use crate::error::ApiError;
use crate::session::EventSink;
use crate::state::AppState;

/// Correlates an SSE progress stream with its annotation.
pub const ANNOTATION_ID_HEADER: &str = "x-annotation-id";

/// Body of `POST /annotations`: a draft, optionally wrapped like the live
/// channel's submit message.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SubmitRequest {
    Wrapped {
        annotation: AnnotationDraft,
        #[serde(default)]
        comment: Option<String>,
    },
    Bare(AnnotationDraft),
}

impl SubmitRequest {
    fn into_draft(self) -> AnnotationDraft {
        match self {
            SubmitRequest::Wrapped {
                mut annotation,
                comment,
            } => {
                if let Some(comment) = comment.filter(|c| !c.trim().is_empty()) {
                    annotation.comment = comment;
                }
                annotation
            }
            SubmitRequest::Bare(draft) => draft,
        }
    }
}

/// Queued-mode reply to a submission.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub annotation_id: String,
    pub route: RouteKind,
    pub state: AnnotationState,
}

/// Submit an annotation.
///
/// Auto mode answers with a Server-Sent Events stream of the run's
/// progress, ending after the `done` event. Queued mode answers `202`.
pub async fn submit_annotation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    let draft = request.into_draft();

    if state.router.kind() == RouteKind::Queued {
        let (annotation, route) = state.submit(draft, EventSink::Detached).await?;
        let body = SubmitResponse {
            annotation_id: annotation.id,
            route,
            state: annotation.state,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<LiveOutbound>();
    let (annotation, _) = state.submit(draft, EventSink::Stream(tx)).await?;

    let stream = async_stream::stream! {
        while let Some(msg) = rx.recv().await {
            let done = matches!(&msg, LiveOutbound::Progress(event) if event.is_terminal());
            match msg.to_text() {
                Ok(data) => yield Ok::<_, Infallible>(Event::default().data(data)),
                Err(e) => warn!(error = %e, "failed to encode progress event"),
            }
            if done {
                break;
            }
        }
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&annotation.id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(ANNOTATION_ID_HEADER), value);
    }
    Ok(response)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub state: Option<AnnotationState>,
    pub pathname: Option<String>,
}

/// List annotations in submission order.
pub async fn list_annotations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let filter = ListFilter {
        state: query.state,
        pathname: query.pathname,
    };
    Json(state.store.list(&filter).await)
}

pub async fn get_annotation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.get(&id).await?))
}

/// Reply to a revert request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertResponse {
    pub annotation_id: String,
    pub outcome: RevertStatus,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Revert an annotation's changes, as `annotation_delete` does.
pub async fn delete_annotation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = state.dispatcher.revert(&id).await?;
    let status = match outcome.status() {
        RevertStatus::Conflict => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    let body = RevertResponse {
        annotation_id: id,
        outcome: outcome.status(),
        paths: outcome.paths().to_vec(),
    };
    Ok((status, Json(body)).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub pathname: Option<String>,
}

/// Versioned export document for one page, or all pages.
pub async fn export_annotations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> impl IntoResponse {
    let annotations = state.store.list(&ListFilter::all()).await;
    Json(ExportDocument::for_page(
        query.pathname.unwrap_or_default(),
        annotations.iter(),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub mode: String,
    pub uptime_secs: u64,
    pub sessions: usize,
    pub annotations: StateCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<String>,
    pub queued: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.mode().to_string(),
        uptime_secs: state.uptime().as_secs(),
        sessions: state.sessions.len(),
        annotations: state.store.counts().await,
        running: state.dispatcher.running(),
        queued: state.dispatcher.queued(),
    })
}
