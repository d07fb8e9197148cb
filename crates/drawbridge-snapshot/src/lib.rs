//! # Drawbridge Snapshot
//!
//! Point-in-time captures of the working tree and the ledger of changes
//! agents made on behalf of annotations.
//!
//! ```text
//! {storage}/
//! ├── objects/ab/ab12…   file contents, named by SHA-256
//! ├── trees/9f3c….json   manifests: path → {hash, size, mode}
//! └── changes.json       unreverted change records
//! ```
//!
//! A snapshot id is the SHA-256 of its manifest, so identical trees share
//! an id and unchanged files share blobs. Snapshots are never modified;
//! revert only rewrites working tree files from them.

pub mod error;
pub mod ledger;
pub mod manager;
pub mod objects;
pub mod options;
pub mod tree;

pub use error::SnapshotError;
pub use ledger::{ChangeRecord, Ledger};
pub use manager::{GcStats, RevertOutcome, SnapshotManager};
pub use objects::ObjectStore;
pub use options::SnapshotOptions;
pub use tree::{IgnoreRules, Manifest, SnapshotRef, TreeEntry};
