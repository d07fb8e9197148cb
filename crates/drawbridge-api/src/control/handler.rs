//! Request routing for the queue protocol.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::protocol::{
    McpError, McpMethod, McpRequest, McpResponse, McpToolResult, ToolCallParams,
    JSONRPC_VERSION, PROTOCOL_VERSION,
};
use super::tools::{tool_definitions, QueueOperation};
use crate::state::AppState;

/// `POST /mcp`. Notifications are answered with `202` and no body.
pub async fn mcp_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: McpRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "unparseable control request");
            return Json(McpResponse::error(None, McpError::parse_error())).into_response();
        }
    };

    match handle_request(&state, request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Answer one JSON-RPC request. Returns `None` for notifications.
pub async fn handle_request(state: &AppState, request: McpRequest) -> Option<McpResponse> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Some(McpResponse::error(
            request.id,
            McpError::invalid_request(format!("unsupported jsonrpc version {}", request.jsonrpc)),
        ));
    }
    if request.is_notification() {
        debug!(method = %request.method, "control notification");
        return None;
    }

    let McpRequest {
        id, method, params, ..
    } = request;
    debug!(method = %method, "control request");

    let result = match McpMethod::parse(&method) {
        Some(McpMethod::Initialize) => Ok(initialize_result()),
        Some(McpMethod::Ping) | Some(McpMethod::Initialized) => Ok(json!({})),
        Some(McpMethod::ListTools) => Ok(json!({ "tools": tool_definitions() })),
        Some(McpMethod::CallTool) => call_tool(state, params).await,
        None => call_operation(state, &method, params).await,
    };

    Some(match result {
        Ok(value) => McpResponse::success(id, value),
        Err(error) => McpResponse::error(id, error),
    })
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "drawbridge",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// A bare operation name used as the JSON-RPC method.
async fn call_operation(
    state: &AppState,
    method: &str,
    params: Option<Value>,
) -> Result<Value, McpError> {
    let op = QueueOperation::parse(method, params)?
        .ok_or_else(|| McpError::method_not_found(method))?;
    op.execute(state).await.map_err(|e| {
        debug!(method, error = %e, "queue operation failed");
        McpError::from(&e)
    })
}

/// `tools/call`. Operation failures become `isError` results, not
/// JSON-RPC errors.
async fn call_tool(state: &AppState, params: Option<Value>) -> Result<Value, McpError> {
    let params: ToolCallParams = serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| McpError::invalid_params(format!("tools/call: {e}")))?;

    let result = match QueueOperation::parse(&params.name, params.arguments) {
        Ok(Some(op)) => match op.execute(state).await {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value)
                    .map_err(|e| McpError::internal_error(e.to_string()))?;
                McpToolResult::text(text)
            }
            Err(e) => {
                warn!(tool = %params.name, error = %e, "tool call failed");
                McpToolResult::error(format!("{}: {e}", e.code()))
            }
        },
        Ok(None) => McpToolResult::error(format!("unknown tool: {}", params.name)),
        Err(e) => McpToolResult::error(e.message),
    };

    serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string()))
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
