//! Annotation persistence backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use drawbridge_protocols::Annotation;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;

/// A persisted annotation with its insertion sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub seq: u64,
    pub annotation: Annotation,
}

/// Backend for annotation records.
#[async_trait]
pub trait AnnotationPersistence: Send + Sync {
    /// Insert or replace a record.
    async fn save(&self, record: &StoredRecord) -> Result<(), StoreError>;

    /// Load every record, ordered by `seq`.
    async fn load_all(&self) -> Result<Vec<StoredRecord>, StoreError>;
}

/// In-memory backend; nothing survives a restart.
#[derive(Default)]
pub struct MemoryPersistence {
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnnotationPersistence for MemoryPersistence {
    async fn save(&self, record: &StoredRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(record.annotation.id.clone(), record.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let records = self.records.read().await;
        let mut all: Vec<StoredRecord> = records.values().cloned().collect();
        all.sort_by_key(|r| r.seq);
        Ok(all)
    }
}

/// One JSON file per annotation:
/// ```text
/// {storage_path}/
/// └── {annotation_id}.json
/// ```
///
/// Writes go to a temporary file that is renamed into place, so a crash
/// leaves either the old or the new record.
pub struct FilePersistence {
    storage_path: PathBuf,
}

impl FilePersistence {
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        fs::create_dir_all(&storage_path).await.map_err(|e| {
            StoreError::Persistence(format!(
                "Failed to create {}: {}",
                storage_path.display(),
                e
            ))
        })?;

        debug!("FilePersistence initialized at {:?}", storage_path);
        Ok(Self { storage_path })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.storage_path.join(format!("{id}.json"))
    }
}

#[async_trait]
impl AnnotationPersistence for FilePersistence {
    async fn save(&self, record: &StoredRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.annotation.id);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Persistence(format!("Failed to serialize annotation: {e}")))?;
        fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::Persistence(format!("Failed to write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Persistence(format!("Failed to write {}: {e}", path.display())))?;

        debug!(annotation_id = %record.annotation.id, "Saved annotation to {:?}", path);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let mut entries = fs::read_dir(&self.storage_path).await.map_err(|e| {
            StoreError::Persistence(format!("Failed to read annotation directory: {e}"))
        })?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Persistence(format!("Failed to read directory entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let content = fs::read(&path).await.map_err(|e| StoreError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let record: StoredRecord =
                serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;

            let expected = format!("{}.json", record.annotation.id);
            if path.file_name().is_none_or(|name| name.to_string_lossy() != expected) {
                return Err(StoreError::Corrupt {
                    path: path.display().to_string(),
                    reason: format!("file holds annotation '{}'", record.annotation.id),
                });
            }
            records.push(record);
        }

        records.sort_by_key(|r| r.seq);
        debug!("Loaded {} annotations from {:?}", records.len(), self.storage_path);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawbridge_protocols::{AnnotationDraft, TargetDescriptor};
    use tempfile::TempDir;

    fn record(seq: u64, id: &str) -> StoredRecord {
        let draft = AnnotationDraft::element(TargetDescriptor::new(".btn"), "bigger");
        StoredRecord {
            seq,
            annotation: Annotation::from_draft(id, draft),
        }
    }

    #[tokio::test]
    async fn test_memory_persistence_orders_by_seq() {
        let backend = MemoryPersistence::new();
        backend.save(&record(2, "b")).await.unwrap();
        backend.save(&record(1, "a")).await.unwrap();

        let all = backend.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].annotation.id, "a");
    }

    #[tokio::test]
    async fn test_file_persistence_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilePersistence::new(temp_dir.path().join("annotations"))
            .await
            .unwrap();

        backend.save(&record(1, "first")).await.unwrap();
        backend.save(&record(0, "zeroth")).await.unwrap();

        let mut updated = record(1, "first");
        updated.annotation.comment = "changed".to_string();
        backend.save(&updated).await.unwrap();

        let all = backend.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].annotation.id, "zeroth");
        assert_eq!(all[1].annotation.comment, "changed");
        assert!(!backend.storage_path().join("first.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_persistence_corrupt_file_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilePersistence::new(temp_dir.path()).await.unwrap();
        backend.save(&record(1, "ok")).await.unwrap();
        std::fs::write(temp_dir.path().join("broken.json"), b"{not json").unwrap();

        let err = backend.load_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_file_persistence_ignores_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilePersistence::new(temp_dir.path()).await.unwrap();
        std::fs::write(temp_dir.path().join("README.txt"), b"notes").unwrap();

        assert!(backend.load_all().await.unwrap().is_empty());
    }
}
