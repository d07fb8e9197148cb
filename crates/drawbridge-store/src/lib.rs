//! # Drawbridge Store
//!
//! The annotation store is the single source of truth for annotation
//! records and their lifecycle state. It is shared by the live channel,
//! the dispatch worker and the queue protocol server.
//!
//! ## Features
//!
//! - Insertion-ordered records with linearizable append
//! - Validated lifecycle transitions (see [`drawbridge_protocols::lifecycle`])
//! - Long-poll subscription for records entering `pending`
//! - Pluggable persistence: in-memory or one JSON file per annotation

pub mod error;
pub mod persistence;
pub mod store;
pub mod watch;

pub use error::StoreError;
pub use persistence::{AnnotationPersistence, FilePersistence, MemoryPersistence, StoredRecord};
pub use store::{AnnotationStore, ListFilter, StateCounts};
pub use watch::{PendingSubscription, StoreEvent};
