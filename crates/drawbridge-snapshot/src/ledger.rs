//! Change record ledger (`changes.json`).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::tree::SnapshotRef;

const LEDGER_VERSION: u32 = 1;

/// One reversible edit made while processing an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub id: String,
    pub annotation_id: String,
    /// Tree captured before the agent ran.
    pub before: SnapshotRef,
    /// Tree captured after the agent finished.
    pub after: SnapshotRef,
    /// Sorted manifest keys that differ between `before` and `after`.
    pub touched_paths: Vec<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl ChangeRecord {
    pub fn touches(&self, path: &str) -> bool {
        self.touched_paths.binary_search_by(|p| p.as_str().cmp(path)).is_ok()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    records: Vec<ChangeRecord>,
}

/// Unreverted change records in creation order, backed by a JSON file.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    records: Vec<ChangeRecord>,
}

impl Ledger {
    /// Load the ledger. A missing file is an empty ledger; an undecodable
    /// one is [`SnapshotError::Corrupt`].
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) => {
                let file: LedgerFile =
                    serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Corrupt {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                if file.version != LEDGER_VERSION {
                    return Err(SnapshotError::Corrupt {
                        path: path.display().to_string(),
                        reason: format!("unsupported ledger version {}", file.version),
                    });
                }
                file.records
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn for_annotation(&self, annotation_id: &str) -> Vec<ChangeRecord> {
        self.records
            .iter()
            .filter(|r| r.annotation_id == annotation_id)
            .cloned()
            .collect()
    }

    pub fn push(&mut self, record: ChangeRecord) -> Result<(), SnapshotError> {
        self.records.push(record);
        if let Err(e) = self.save() {
            self.records.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Drop every record of `annotation_id`, returning how many were removed.
    pub fn remove_annotation(&mut self, annotation_id: &str) -> Result<usize, SnapshotError> {
        let before = self.records.clone();
        self.records.retain(|r| r.annotation_id != annotation_id);
        let removed = before.len() - self.records.len();
        if removed > 0 {
            if let Err(e) = self.save() {
                self.records = before;
                return Err(e);
            }
        }
        Ok(removed)
    }

    fn save(&self) -> Result<(), SnapshotError> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            records: self.records.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
