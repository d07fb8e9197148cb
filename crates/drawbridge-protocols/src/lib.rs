//! # Drawbridge Protocols
//!
//! Data model and wire types shared by every drawbridge crate.
//! Contains no I/O: records, lifecycle rules, progress events and the
//! message shapes spoken on the live channel and the export format.
//!
//! ## Modules
//!
//! - [`annotation`] - annotation records as submitted by the overlay and as owned by the store
//! - [`lifecycle`] - the `pending → acknowledged → {resolved | dismissed}` state machine
//! - [`progress`] - agent progress events and run outcomes
//! - [`live`] - live channel inbound/outbound messages
//! - [`export`] - versioned annotation export document

pub mod annotation;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod live;
pub mod progress;

pub use annotation::{
    Annotation, AnnotationDraft, AnnotationId, AnnotationKind, BoundingBox, DrawingMetadata,
    Point, TargetDescriptor, Viewport,
};
pub use error::ProtocolError;
pub use export::{ExportDocument, ExportedAnnotation, EXPORT_VERSION};
pub use lifecycle::{AnnotationState, LifecycleEvent, TransitionRejected};
pub use live::{ControlMessage, LiveInbound, LiveOutbound, RevertStatus, RouteKind};
pub use progress::{FailureReason, Outcome, ProgressEvent, ProgressKind};

/// Current time as epoch milliseconds, the timestamp unit used on the wire.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
