//! Snapshot manager options.

use std::path::PathBuf;

use drawbridge_config::Config;

/// Where to read the tree from, where to keep snapshots, what to skip.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Working tree root.
    pub root: PathBuf,
    /// Snapshot storage directory.
    pub storage: PathBuf,
    /// Extra glob patterns, relative to `root`.
    pub ignore: Vec<String>,
    pub max_file_bytes: u64,
}

impl SnapshotOptions {
    pub fn new(root: impl Into<PathBuf>, storage: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            storage: storage.into(),
            ignore: Vec::new(),
            max_file_bytes: 8 * 1024 * 1024,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.work_dir(),
            storage: config.snapshot_path(),
            ignore: config.snapshot.ignore.clone(),
            max_file_bytes: config.snapshot.max_file_bytes,
        }
    }

    pub fn with_ignore(mut self, patterns: Vec<String>) -> Self {
        self.ignore = patterns;
        self
    }

    pub fn with_max_file_bytes(mut self, max: u64) -> Self {
        self.max_file_bytes = max;
        self
    }
}
