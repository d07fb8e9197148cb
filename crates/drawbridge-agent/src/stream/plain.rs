//! Line protocol for arbitrary command agents.

use drawbridge_protocols::{ProgressEvent, ProgressKind};
use serde_json::Value;

use super::{edited_path, push_unique, StreamParser};

/// JSON objects whose `type` is a progress kind are forwarded as that
/// event. Every other line is an agent message.
#[derive(Debug, Default)]
pub struct PlainLineParser {
    result: Option<String>,
    last_message: Option<String>,
    paths: Vec<String>,
}

impl PlainLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn structured(&mut self, mut value: Value, line: &str) -> Option<ProgressEvent> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .and_then(ProgressKind::parse)?;

        // Only the invoker decides when a run is done.
        if kind == ProgressKind::Done {
            return Some(ProgressEvent::debug(line).with_label("done"));
        }

        // Timestamp and correlation are stamped here, not by the child.
        let map = value.as_object_mut()?;
        map.insert(
            "timestamp".to_string(),
            Value::from(drawbridge_protocols::now_millis()),
        );
        map.remove("annotationId");

        let event: ProgressEvent = serde_json::from_value(value).ok()?;

        match kind {
            ProgressKind::Result => {
                if let Some(text) = event.content.clone().filter(|t| !t.is_empty()) {
                    self.result = Some(text);
                }
            }
            ProgressKind::Message => {
                if let Some(text) = event.content.clone() {
                    self.last_message = Some(text);
                }
            }
            ProgressKind::ToolUse => {
                if let Some(path) = event.tool_input.as_ref().and_then(edited_path) {
                    push_unique(&mut self.paths, path);
                }
            }
            _ => {}
        }
        Some(event)
    }
}

impl StreamParser for PlainLineParser {
    fn parse_line(&mut self, line: &str) -> Vec<ProgressEvent> {
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() {
            return Vec::new();
        }
        if trimmed.trim_start().starts_with('{') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                if let Some(event) = self.structured(value, trimmed) {
                    return vec![event];
                }
            }
        }
        self.last_message = Some(trimmed.to_string());
        vec![ProgressEvent::message("agent", trimmed)]
    }

    fn summary(&self) -> Option<String> {
        self.result.clone().or_else(|| self.last_message.clone())
    }

    fn touched_paths(&self) -> Vec<String> {
        self.paths.clone()
    }
}
