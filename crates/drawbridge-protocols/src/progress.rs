//! Agent progress events and run outcomes.

use serde::{Deserialize, Serialize};

use crate::annotation::AnnotationId;

/// Kind of a progress event, the `type` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Init,
    Message,
    ToolUse,
    ToolResult,
    Error,
    Result,
    Done,
    Debug,
}

impl ProgressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressKind::Init => "init",
            ProgressKind::Message => "message",
            ProgressKind::ToolUse => "tool_use",
            ProgressKind::ToolResult => "tool_result",
            ProgressKind::Error => "error",
            ProgressKind::Result => "result",
            ProgressKind::Done => "done",
            ProgressKind::Debug => "debug",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "init" => ProgressKind::Init,
            "message" => ProgressKind::Message,
            "tool_use" => ProgressKind::ToolUse,
            "tool_result" => ProgressKind::ToolResult,
            "error" => ProgressKind::Error,
            "result" => ProgressKind::Result,
            "done" => ProgressKind::Done,
            "debug" => ProgressKind::Debug,
            _ => return None,
        })
    }
}

/// One event streamed from an agent run to the submitting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(rename = "annotationId", default, skip_serializing_if = "Option::is_none")]
    pub annotation_id: Option<AnnotationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind) -> Self {
        Self {
            kind,
            timestamp: crate::now_millis(),
            annotation_id: None,
            content: None,
            label: None,
            role: None,
            tool_name: None,
            tool_input: None,
            is_error: None,
        }
    }

    pub fn init(label: impl Into<String>) -> Self {
        Self::new(ProgressKind::Init).with_label(label)
    }

    pub fn message(role: impl Into<String>, content: impl Into<String>) -> Self {
        let mut event = Self::new(ProgressKind::Message).with_content(content);
        event.role = Some(role.into());
        event
    }

    pub fn tool_use(name: impl Into<String>, input: serde_json::Value) -> Self {
        let mut event = Self::new(ProgressKind::ToolUse);
        event.tool_name = Some(name.into());
        event.tool_input = Some(input);
        event
    }

    pub fn tool_result(content: impl Into<String>, is_error: bool) -> Self {
        let mut event = Self::new(ProgressKind::ToolResult).with_content(content);
        event.is_error = Some(is_error);
        event
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ProgressKind::Error).with_content(content)
    }

    pub fn result(content: impl Into<String>) -> Self {
        Self::new(ProgressKind::Result).with_content(content)
    }

    pub fn debug(content: impl Into<String>) -> Self {
        Self::new(ProgressKind::Debug).with_content(content)
    }

    /// Terminal event carrying the run outcome.
    pub fn done(outcome: &Outcome) -> Self {
        let mut event = Self::new(ProgressKind::Done);
        match outcome {
            Outcome::Success { summary } => {
                event.label = Some("success".to_string());
                event.content = Some(summary.clone());
                event.is_error = Some(false);
            }
            Outcome::Failure(reason) => {
                event.label = Some("failure".to_string());
                event.content = Some(reason.to_string());
                event.is_error = Some(true);
            }
        }
        event
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_annotation(mut self, id: impl Into<AnnotationId>) -> Self {
        self.annotation_id = Some(id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == ProgressKind::Done
    }
}

/// Why an agent run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Exceeded the allotted run time and was terminated.
    Timeout { secs: u64 },
    /// Exited non-zero. `-1` when killed by a signal.
    ExitCode(i32),
    /// Could not be started.
    Spawn(String),
    /// Cancelled by a revert or shutdown.
    Cancelled,
    Other(String),
}

impl FailureReason {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureReason::Timeout { .. })
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout { secs } => write!(f, "agent timed out after {secs}s"),
            FailureReason::ExitCode(code) => write!(f, "agent exited with code {code}"),
            FailureReason::Spawn(msg) => write!(f, "failed to start agent: {msg}"),
            FailureReason::Cancelled => f.write_str("agent run cancelled"),
            FailureReason::Other(msg) => f.write_str(msg),
        }
    }
}

/// Final result of one agent run. Exactly one per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Success { summary: String },
    Failure(FailureReason),
}

impl Outcome {
    pub fn success(summary: impl Into<String>) -> Self {
        Outcome::Success {
            summary: summary.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}
