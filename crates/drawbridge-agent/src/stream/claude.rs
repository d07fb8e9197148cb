//! Claude Code `--output-format stream-json` decoding.
//!
//! Each stdout line is one JSON object:
//!
//! - `{"type":"system","subtype":"init","model":..}`
//! - `{"type":"assistant","message":{"content":[{"type":"text"|"tool_use",..}]}}`
//! - `{"type":"user","message":{"content":[{"type":"tool_result",..}]}}`
//! - `{"type":"result","subtype":"success","result":"..","is_error":false}`

use drawbridge_protocols::ProgressEvent;
use serde_json::Value;

use super::{content_text, edited_path, is_editing_tool, push_unique, StreamParser};

#[derive(Debug, Default)]
pub struct ClaudeStreamParser {
    result: Option<String>,
    last_message: Option<String>,
    failure: Option<String>,
    paths: Vec<String>,
}

impl ClaudeStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn assistant(&mut self, message: &Value, out: &mut Vec<ProgressEvent>) {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            return;
        };
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
                    if text.trim().is_empty() {
                        continue;
                    }
                    self.last_message = Some(text.to_string());
                    out.push(ProgressEvent::message("assistant", text));
                }
                Some("tool_use") => {
                    let name = block.get("name").and_then(Value::as_str).unwrap_or("unknown");
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    if is_editing_tool(name) {
                        if let Some(path) = edited_path(&input) {
                            push_unique(&mut self.paths, path);
                        }
                    }
                    out.push(ProgressEvent::tool_use(name, input));
                }
                Some("thinking") => {
                    if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                        out.push(ProgressEvent::debug(text).with_label("thinking"));
                    }
                }
                _ => {}
            }
        }
    }

    fn user(&mut self, message: &Value, out: &mut Vec<ProgressEvent>) {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            return;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }
            let content = block.get("content").map(content_text).unwrap_or_default();
            let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
            out.push(ProgressEvent::tool_result(content, is_error));
        }
    }

    fn result(&mut self, value: &Value, out: &mut Vec<ProgressEvent>) {
        let text = value
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let is_error = value.get("is_error").and_then(Value::as_bool).unwrap_or(false)
            || value
                .get("subtype")
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with("error"));

        if is_error {
            let reason = if text.is_empty() {
                value
                    .get("subtype")
                    .and_then(Value::as_str)
                    .unwrap_or("error")
                    .to_string()
            } else {
                text.clone()
            };
            self.failure = Some(reason.clone());
            out.push(ProgressEvent::error(reason));
        } else {
            if !text.is_empty() {
                self.result = Some(text.clone());
            }
            out.push(ProgressEvent::result(text));
        }
    }
}

impl StreamParser for ClaudeStreamParser {
    fn parse_line(&mut self, line: &str) -> Vec<ProgressEvent> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => return vec![ProgressEvent::debug(line)],
        };

        let mut out = Vec::new();
        match value.get("type").and_then(Value::as_str) {
            Some("system") if value.get("subtype").and_then(Value::as_str) == Some("init") => {
                let mut event = ProgressEvent::init("claude");
                if let Some(model) = value.get("model").and_then(Value::as_str) {
                    event = event.with_content(model);
                }
                out.push(event);
            }
            Some("assistant") => {
                if let Some(message) = value.get("message") {
                    self.assistant(message, &mut out);
                }
            }
            Some("user") => {
                if let Some(message) = value.get("message") {
                    self.user(message, &mut out);
                }
            }
            Some("result") => self.result(&value, &mut out),
            _ => out.push(ProgressEvent::debug(line)),
        }
        out
    }

    fn summary(&self) -> Option<String> {
        self.result.clone().or_else(|| self.last_message.clone())
    }

    fn failure(&self) -> Option<String> {
        self.failure.clone()
    }

    fn touched_paths(&self) -> Vec<String> {
        self.paths.clone()
    }
}
