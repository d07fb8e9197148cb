//! Live channel messages exchanged with the browser overlay.

use serde::{Deserialize, Serialize};

use crate::annotation::{AnnotationDraft, AnnotationId};
use crate::error::ProtocolError;
use crate::progress::ProgressEvent;

/// Messages received from the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveInbound {
    /// Submit a new annotation. A top-level `comment` overrides the draft's.
    AnnotationSubmit {
        annotation: AnnotationDraft,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    /// Delete an annotation and revert whatever it changed.
    AnnotationDelete {
        #[serde(rename = "annotationId")]
        annotation_id: AnnotationId,
    },
    Ping,
}

impl LiveInbound {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a binary frame that carries UTF-8 JSON.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::parse(text)
    }

    /// The draft of a submit message with the override comment applied.
    pub fn into_draft(self) -> Option<AnnotationDraft> {
        match self {
            LiveInbound::AnnotationSubmit {
                mut annotation,
                comment,
            } => {
                if let Some(comment) = comment.filter(|c| !c.trim().is_empty()) {
                    annotation.comment = comment;
                }
                Some(annotation)
            }
            _ => None,
        }
    }
}

/// Where the mode router sent an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    /// Handed to the agent invoker.
    Dispatched,
    /// Left pending for an external agent.
    Queued,
}

/// Result of reverting an annotation's changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertStatus {
    Reverted,
    NoChanges,
    Conflict,
}

/// Daemon to overlay messages that are not agent progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    Connected {
        session_id: String,
    },
    Accepted {
        annotation_id: AnnotationId,
        route: RouteKind,
    },
    Reverted {
        annotation_id: AnnotationId,
        outcome: RevertStatus,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        paths: Vec<String>,
    },
    Rejected {
        code: String,
        message: String,
    },
    Pong,
}

/// Anything sent to the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiveOutbound {
    Progress(ProgressEvent),
    Control(ControlMessage),
}

impl LiveOutbound {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn annotation_id(&self) -> Option<&str> {
        match self {
            LiveOutbound::Progress(event) => event.annotation_id.as_deref(),
            LiveOutbound::Control(ControlMessage::Accepted { annotation_id, .. })
            | LiveOutbound::Control(ControlMessage::Reverted { annotation_id, .. }) => {
                Some(annotation_id)
            }
            LiveOutbound::Control(_) => None,
        }
    }
}

impl From<ProgressEvent> for LiveOutbound {
    fn from(event: ProgressEvent) -> Self {
        LiveOutbound::Progress(event)
    }
}

impl From<ControlMessage> for LiveOutbound {
    fn from(msg: ControlMessage) -> Self {
        LiveOutbound::Control(msg)
    }
}
