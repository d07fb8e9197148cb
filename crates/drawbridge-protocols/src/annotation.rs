//! Annotation records.
//!
//! [`AnnotationDraft`] is what the overlay submits. Once accepted, the store
//! owns an [`Annotation`], which adds lifecycle state and audit fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lifecycle::{AnnotationState, LifecycleEvent, TransitionRejected};

/// Opaque unique annotation identifier.
pub type AnnotationId = String;

/// What the user pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    /// A DOM element picked with the selector tool.
    #[default]
    Element,
    /// A freehand drawing over the page.
    Drawing,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

/// Describes the DOM target of an annotation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TargetDescriptor {
    /// CSS selector resolving to the element.
    pub selector: String,
    pub tag_name: String,
    /// Human readable ancestor path, e.g. `main > section > button`.
    pub element_path: String,
    /// Visible text content, possibly truncated by the overlay.
    pub text: String,
    pub bounding_box: BoundingBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css_classes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,
}

impl TargetDescriptor {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_tag_name(mut self, tag_name: impl Into<String>) -> Self {
        self.tag_name = tag_name.into();
        self
    }
}

/// Freehand strokes captured for a drawing annotation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingMetadata {
    pub strokes: Vec<Vec<Point>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
}

impl DrawingMetadata {
    pub fn point_count(&self) -> usize {
        self.strokes.iter().map(Vec::len).sum()
    }
}

/// An annotation as submitted by the overlay, before the store owns it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnnotationDraft {
    /// Client supplied id; kept when not already taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<AnnotationId>,
    #[serde(alias = "type")]
    pub kind: AnnotationKind,
    pub target: TargetDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drawing: Option<DrawingMetadata>,
    pub comment: String,
    /// Client creation time, epoch milliseconds.
    pub timestamp: i64,
    pub pathname: String,
    pub viewport: Viewport,
}

impl AnnotationDraft {
    pub fn element(target: TargetDescriptor, comment: impl Into<String>) -> Self {
        Self {
            kind: AnnotationKind::Element,
            target,
            comment: comment.into(),
            timestamp: crate::now_millis(),
            ..Default::default()
        }
    }

    pub fn drawing(drawing: DrawingMetadata, comment: impl Into<String>) -> Self {
        Self {
            kind: AnnotationKind::Drawing,
            drawing: Some(drawing),
            comment: comment.into(),
            timestamp: crate::now_millis(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<AnnotationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_pathname(mut self, pathname: impl Into<String>) -> Self {
        self.pathname = pathname.into();
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }
}

/// A stored annotation with its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    #[serde(default)]
    pub target: TargetDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawing: Option<DrawingMetadata>,
    #[serde(default)]
    pub comment: String,
    pub timestamp: i64,
    #[serde(default)]
    pub pathname: String,
    #[serde(default)]
    pub viewport: Viewport,

    pub state: AnnotationState,
    pub received_at: i64,
    pub updated_at: i64,
    /// Number of failed agent runs.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    /// Summary reported on resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismiss_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted_at: Option<i64>,
}

impl Annotation {
    /// Accept a draft under `id` in the `pending` state.
    pub fn from_draft(id: impl Into<AnnotationId>, draft: AnnotationDraft) -> Self {
        let now = crate::now_millis();
        Self {
            id: id.into(),
            kind: draft.kind,
            target: draft.target,
            drawing: draft.drawing,
            comment: draft.comment,
            timestamp: if draft.timestamp > 0 { draft.timestamp } else { now },
            pathname: draft.pathname,
            viewport: draft.viewport,
            state: AnnotationState::Pending,
            received_at: now,
            updated_at: now,
            attempts: 0,
            last_failure: None,
            resolution: None,
            dismiss_reason: None,
            reverted_at: None,
        }
    }

    /// Apply a lifecycle event. The record is untouched when rejected.
    pub fn apply(&mut self, event: &LifecycleEvent) -> Result<AnnotationState, TransitionRejected> {
        let next = event.next_state(self.state)?;

        match event {
            LifecycleEvent::Acknowledge => {}
            LifecycleEvent::Resolve { summary } => {
                self.resolution = Some(summary.clone());
            }
            LifecycleEvent::Dismiss { reason } => {
                self.dismiss_reason = Some(reason.clone());
            }
            LifecycleEvent::Fail { reason } => {
                self.attempts = self.attempts.saturating_add(1);
                self.last_failure = Some(reason.clone());
            }
            LifecycleEvent::Reset => {
                self.resolution = None;
                self.dismiss_reason = None;
                self.reverted_at = None;
            }
        }

        self.state = next;
        self.updated_at = crate::now_millis();
        Ok(next)
    }

    pub fn is_pending(&self) -> bool {
        self.state == AnnotationState::Pending
    }
}

#[cfg(test)]
#[path = "annotation_tests.rs"]
mod tests;
