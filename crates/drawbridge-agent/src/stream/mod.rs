//! Per-provider decoding of agent stdout into progress events.

mod claude;
mod codex;
mod plain;

pub use claude::ClaudeStreamParser;
pub use codex::CodexStreamParser;
pub use plain::PlainLineParser;

use drawbridge_protocols::ProgressEvent;
use serde_json::Value;

/// Stateful decoder for one run's stdout, fed a line at a time.
pub trait StreamParser: Send + Sync {
    /// Decode one line (without the trailing newline).
    fn parse_line(&mut self, line: &str) -> Vec<ProgressEvent>;

    /// Best summary seen so far: the final result text, or else the last
    /// assistant message.
    fn summary(&self) -> Option<String>;

    /// Set when the agent itself reported an unsuccessful result.
    fn failure(&self) -> Option<String> {
        None
    }

    /// File paths the agent said it edited.
    fn touched_paths(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Tool input keys that name a file being written.
const PATH_KEYS: &[&str] = &["file_path", "path", "notebook_path"];

/// Tools whose input names a file they modify.
pub(crate) fn is_editing_tool(name: &str) -> bool {
    matches!(
        name,
        "Edit" | "MultiEdit" | "Write" | "NotebookEdit" | "edit" | "write" | "apply_patch"
    )
}

pub(crate) fn edited_path(input: &Value) -> Option<String> {
    PATH_KEYS
        .iter()
        .find_map(|k| input.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

pub(crate) fn push_unique(paths: &mut Vec<String>, path: String) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

/// Flatten a tool result `content` value (string or block list) to text.
pub(crate) fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
