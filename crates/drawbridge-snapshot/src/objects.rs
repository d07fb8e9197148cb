//! Content-addressed blob storage.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::SnapshotError;

/// Hex SHA-256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Blobs stored under `objects/<first two hex chars>/<hash>`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        let prefix = hash.get(..2).unwrap_or("00");
        self.root.join(prefix).join(hash)
    }

    /// Store `bytes`, returning their hash. Existing blobs are not rewritten.
    pub fn put(&self, bytes: &[u8]) -> Result<String, SnapshotError> {
        let hash = hash_bytes(bytes);
        let path = self.object_path(&hash);
        if path.exists() {
            return Ok(hash);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(hash)
    }

    pub fn get(&self, hash: &str) -> Result<Vec<u8>, SnapshotError> {
        match fs::read(self.object_path(hash)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SnapshotError::MissingObject(hash.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.object_path(hash).is_file()
    }

    /// Delete every blob whose hash is not in `keep`. Returns the count removed.
    pub fn retain(&self, keep: &HashSet<String>) -> Result<usize, SnapshotError> {
        let mut removed = 0;
        for prefix in read_dir_paths(&self.root)? {
            if !prefix.is_dir() {
                continue;
            }
            for object in read_dir_paths(&prefix)? {
                let name = object
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !keep.contains(&name) {
                    fs::remove_file(&object)?;
                    removed += 1;
                }
            }
            // Leaves non-empty prefix directories in place.
            let _ = fs::remove_dir(&prefix);
        }
        debug!(removed, "Pruned unreferenced objects");
        Ok(removed)
    }
}

pub(crate) fn read_dir_paths(dir: &Path) -> Result<Vec<PathBuf>, SnapshotError> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
