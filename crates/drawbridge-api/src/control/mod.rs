//! Queue protocol server.
//!
//! JSON-RPC 2.0 over `POST /mcp`. MCP clients use `initialize`,
//! `tools/list` and `tools/call`; plain JSON-RPC clients may call the
//! queue operations by name.

pub mod handler;
pub mod protocol;
pub mod tools;

pub use handler::{handle_request, mcp_handler};
pub use protocol::{McpError, McpRequest, McpResponse, McpToolResult, RequestId};
pub use tools::{tool_definitions, QueueOperation};
