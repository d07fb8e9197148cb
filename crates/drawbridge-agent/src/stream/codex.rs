//! Codex `exec --json` decoding.
//!
//! Two line shapes exist in the wild. Older releases wrap the event as
//! `{"id":..,"msg":{"type":"agent_message",..}}`; newer ones emit
//! `{"type":"item.completed","item":{"type":"agent_message",..}}` style
//! events. Both are handled; anything unrecognised becomes `debug`.

use drawbridge_protocols::ProgressEvent;
use serde_json::{json, Value};

use super::{push_unique, StreamParser};

#[derive(Debug, Default)]
pub struct CodexStreamParser {
    result: Option<String>,
    last_message: Option<String>,
    failure: Option<String>,
    paths: Vec<String>,
}

impl CodexStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn message(&mut self, text: &str, out: &mut Vec<ProgressEvent>) {
        if text.trim().is_empty() {
            return;
        }
        self.last_message = Some(text.to_string());
        out.push(ProgressEvent::message("assistant", text));
    }

    fn record_patch(&mut self, changes: Option<&Value>) -> Vec<String> {
        let mut files = Vec::new();
        match changes {
            Some(Value::Object(map)) => files.extend(map.keys().cloned()),
            Some(Value::Array(items)) => files.extend(
                items
                    .iter()
                    .filter_map(|c| c.get("path").and_then(Value::as_str))
                    .map(str::to_string),
            ),
            _ => {}
        }
        for f in &files {
            push_unique(&mut self.paths, f.clone());
        }
        files
    }

    /// Legacy `msg` envelope.
    fn legacy(&mut self, msg: &Value, raw: &str, out: &mut Vec<ProgressEvent>) {
        let kind = msg.get("type").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "session_configured" => {
                let mut event = ProgressEvent::init("codex");
                if let Some(model) = msg.get("model").and_then(Value::as_str) {
                    event = event.with_content(model);
                }
                out.push(event);
            }
            "agent_message" => {
                let text = msg.get("message").and_then(Value::as_str).unwrap_or_default();
                self.message(text, out);
            }
            "exec_command_begin" => {
                let command = msg.get("command").cloned().unwrap_or(Value::Null);
                out.push(ProgressEvent::tool_use("exec", json!({ "command": command })));
            }
            "exec_command_end" => {
                let code = msg.get("exit_code").and_then(Value::as_i64).unwrap_or(0);
                let output = ["aggregated_output", "stdout", "stderr"]
                    .iter()
                    .find_map(|k| msg.get(*k).and_then(Value::as_str).filter(|s| !s.is_empty()))
                    .unwrap_or_default();
                out.push(ProgressEvent::tool_result(output, code != 0));
            }
            "patch_apply_begin" => {
                let files = self.record_patch(msg.get("changes"));
                out.push(ProgressEvent::tool_use("apply_patch", json!({ "files": files })));
            }
            "patch_apply_end" => {
                let ok = msg.get("success").and_then(Value::as_bool).unwrap_or(true);
                let output = msg.get("stdout").and_then(Value::as_str).unwrap_or_default();
                out.push(ProgressEvent::tool_result(output, !ok));
            }
            "error" | "stream_error" => {
                let text = msg.get("message").and_then(Value::as_str).unwrap_or("error");
                out.push(ProgressEvent::error(text));
            }
            "task_complete" => {
                let text = msg
                    .get("last_agent_message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if !text.is_empty() {
                    self.result = Some(text.clone());
                }
                out.push(ProgressEvent::result(text));
            }
            _ => out.push(ProgressEvent::debug(raw)),
        }
    }

    fn item(&mut self, item: &Value, completed: bool, out: &mut Vec<ProgressEvent>) {
        let kind = item.get("type").and_then(Value::as_str).unwrap_or_default();
        match (kind, completed) {
            ("agent_message", true) => {
                let text = item.get("text").and_then(Value::as_str).unwrap_or_default();
                self.message(text, out);
            }
            ("reasoning", true) => {
                if let Some(text) = item.get("text").and_then(Value::as_str) {
                    out.push(ProgressEvent::debug(text).with_label("reasoning"));
                }
            }
            ("command_execution", false) => {
                let command = item.get("command").cloned().unwrap_or(Value::Null);
                out.push(ProgressEvent::tool_use("exec", json!({ "command": command })));
            }
            ("command_execution", true) => {
                let code = item.get("exit_code").and_then(Value::as_i64).unwrap_or(0);
                let output = item
                    .get("aggregated_output")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                out.push(ProgressEvent::tool_result(output, code != 0));
            }
            ("file_change", true) => {
                let files = self.record_patch(item.get("changes"));
                out.push(ProgressEvent::tool_use("apply_patch", json!({ "files": files })));
            }
            ("error", _) => {
                let text = item.get("message").and_then(Value::as_str).unwrap_or("error");
                out.push(ProgressEvent::error(text));
            }
            _ => {}
        }
    }
}

impl StreamParser for CodexStreamParser {
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
        if let Some(msg) = value.get("msg") {
            self.legacy(msg, line, &mut out);
            return out;
        }

        match value.get("type").and_then(Value::as_str).unwrap_or_default() {
            "thread.started" => out.push(ProgressEvent::init("codex")),
            "item.started" | "item.completed" => {
                let completed = value.get("type").and_then(Value::as_str) == Some("item.completed");
                if let Some(item) = value.get("item") {
                    self.item(item, completed, &mut out);
                }
            }
            "turn.completed" => {
                let text = self.last_message.clone().unwrap_or_default();
                if !text.is_empty() {
                    self.result = Some(text.clone());
                }
                out.push(ProgressEvent::result(text));
            }
            "turn.failed" | "error" => {
                let text = value
                    .pointer("/error/message")
                    .or_else(|| value.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("codex turn failed")
                    .to_string();
                self.failure = Some(text.clone());
                out.push(ProgressEvent::error(text));
            }
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
