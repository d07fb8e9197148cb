//! Queue operations exposed to external agents.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use drawbridge_protocols::LifecycleEvent;
use drawbridge_store::ListFilter;

use super::protocol::{McpError, McpToolDefinition};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResolveArgs {
    id: String,
    summary: String,
}

#[derive(Debug, Deserialize)]
struct DismissArgs {
    id: String,
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchArgs {
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// One queue protocol call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOperation {
    GetPending,
    GetAll,
    GetAnnotation { id: String },
    Acknowledge { id: String },
    Resolve { id: String, summary: String },
    Dismiss { id: String, reason: String },
    Watch { timeout_seconds: Option<u64> },
}

impl QueueOperation {
    pub const NAMES: [&'static str; 7] = [
        "get_pending",
        "get_all_annotations",
        "get_annotation",
        "acknowledge",
        "resolve",
        "dismiss",
        "watch",
    ];

    /// Decode an operation from its name and JSON arguments.
    ///
    /// Returns `Ok(None)` for an unknown name.
    pub fn parse(name: &str, arguments: Option<Value>) -> Result<Option<Self>, McpError> {
        let args = arguments.unwrap_or_else(|| json!({}));
        let op = match name {
            "get_pending" => QueueOperation::GetPending,
            "get_all_annotations" => QueueOperation::GetAll,
            "get_annotation" => {
                let IdArgs { id } = decode(args)?;
                QueueOperation::GetAnnotation { id }
            }
            "acknowledge" => {
                let IdArgs { id } = decode(args)?;
                QueueOperation::Acknowledge { id }
            }
            "resolve" => {
                let ResolveArgs { id, summary } = decode(args)?;
                QueueOperation::Resolve { id, summary }
            }
            "dismiss" => {
                let DismissArgs { id, reason } = decode(args)?;
                QueueOperation::Dismiss { id, reason }
            }
            "watch" => {
                let WatchArgs { timeout_seconds } = if args.is_null() {
                    WatchArgs::default()
                } else {
                    decode(args)?
                };
                QueueOperation::Watch { timeout_seconds }
            }
            _ => return Ok(None),
        };
        Ok(Some(op))
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueOperation::GetPending => "get_pending",
            QueueOperation::GetAll => "get_all_annotations",
            QueueOperation::GetAnnotation { .. } => "get_annotation",
            QueueOperation::Acknowledge { .. } => "acknowledge",
            QueueOperation::Resolve { .. } => "resolve",
            QueueOperation::Dismiss { .. } => "dismiss",
            QueueOperation::Watch { .. } => "watch",
        }
    }

    /// Run the operation against the shared store.
    pub async fn execute(self, state: &AppState) -> Result<Value, ApiError> {
        let store = &state.store;
        let value = match self {
            QueueOperation::GetPending => to_value(store.list(&ListFilter::pending()).await)?,
            QueueOperation::GetAll => to_value(store.list(&ListFilter::all()).await)?,
            QueueOperation::GetAnnotation { id } => to_value(store.get(&id).await?)?,
            QueueOperation::Acknowledge { id } => {
                let record = store.transition(&id, LifecycleEvent::Acknowledge).await?;
                info!(annotation_id = %id, "acknowledged by external agent");
                to_value(record)?
            }
            QueueOperation::Resolve { id, summary } => {
                let record = store.transition(&id, LifecycleEvent::Resolve { summary }).await?;
                info!(annotation_id = %id, "resolved by external agent");
                to_value(record)?
            }
            QueueOperation::Dismiss { id, reason } => {
                let record = store.transition(&id, LifecycleEvent::Dismiss { reason }).await?;
                info!(annotation_id = %id, "dismissed by external agent");
                to_value(record)?
            }
            QueueOperation::Watch { timeout_seconds } => {
                let timeout = state.watch.effective_timeout(timeout_seconds);
                debug!(timeout_secs = timeout.as_secs(), "watching for pending annotations");
                let annotations = store.watch_pending(timeout).await;
                if annotations.is_empty() {
                    json!({ "status": "no_new_work" })
                } else {
                    json!({ "status": "new_work", "annotations": annotations })
                }
            }
        };
        Ok(value)
    }
}

fn decode<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, McpError> {
    serde_json::from_value(args).map_err(|e| McpError::invalid_params(e.to_string()))
}

fn to_value(value: impl serde::Serialize) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.to_string()))
}

fn id_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "description": description }
        },
        "required": ["id"]
    })
}

/// Tool definitions for `tools/list`.
pub fn tool_definitions() -> Vec<McpToolDefinition> {
    let tool = |name: &str, description: &str, input_schema: Value| McpToolDefinition {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema,
    };
    let empty = json!({ "type": "object", "properties": {} });

    vec![
        tool(
            "get_pending",
            "List annotations waiting for an agent, oldest first.",
            empty.clone(),
        ),
        tool(
            "get_all_annotations",
            "List every annotation with its lifecycle state.",
            empty,
        ),
        tool(
            "get_annotation",
            "Fetch one annotation by id.",
            id_schema("Annotation id"),
        ),
        tool(
            "acknowledge",
            "Claim a pending annotation before working on it.",
            id_schema("Annotation id"),
        ),
        tool(
            "resolve",
            "Mark an acknowledged annotation as done.",
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Annotation id" },
                    "summary": { "type": "string", "description": "What was changed" }
                },
                "required": ["id", "summary"]
            }),
        ),
        tool(
            "dismiss",
            "Reject an annotation with a reason.",
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Annotation id" },
                    "reason": { "type": "string", "description": "Why it will not be done" }
                },
                "required": ["id", "reason"]
            }),
        ),
        tool(
            "watch",
            "Block until new pending annotations arrive or the timeout passes.",
            json!({
                "type": "object",
                "properties": {
                    "timeoutSeconds": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum wait in seconds"
                    }
                }
            }),
        ),
    ]
}
