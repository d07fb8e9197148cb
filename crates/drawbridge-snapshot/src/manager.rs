//! Snapshot manager: capture, commit, revert.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drawbridge_protocols::RevertStatus;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SnapshotError;
use crate::ledger::{ChangeRecord, Ledger};
use crate::objects::ObjectStore;
use crate::options::SnapshotOptions;
use crate::tree::{normalize_reported, scan, set_file_mode, IgnoreRules, Manifest, SnapshotRef, TreeStore};

/// Result of [`SnapshotManager::revert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RevertOutcome {
    /// Paths were restored and the annotation's records removed.
    Reverted { paths: Vec<String>, records: usize },
    /// The annotation has no unreverted change records.
    NoChanges,
    /// A later annotation changed overlapping paths. Nothing was touched.
    Conflict {
        paths: Vec<String>,
        annotations: Vec<String>,
    },
}

impl RevertOutcome {
    pub fn status(&self) -> RevertStatus {
        match self {
            RevertOutcome::Reverted { .. } => RevertStatus::Reverted,
            RevertOutcome::NoChanges => RevertStatus::NoChanges,
            RevertOutcome::Conflict { .. } => RevertStatus::Conflict,
        }
    }

    pub fn paths(&self) -> &[String] {
        match self {
            RevertOutcome::Reverted { paths, .. } | RevertOutcome::Conflict { paths, .. } => paths,
            RevertOutcome::NoChanges => &[],
        }
    }
}

/// Counts from [`SnapshotManager::gc`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub trees_removed: usize,
    pub objects_removed: usize,
}

struct Engine {
    root: PathBuf,
    rules: IgnoreRules,
    max_file_bytes: u64,
    objects: ObjectStore,
    trees: TreeStore,
    ledger: Mutex<Ledger>,
    last_capture: Mutex<Option<SnapshotRef>>,
}

/// Captures and restores the working tree.
///
/// Callers must hold the working tree exclusively between `capture` and
/// `commit`, and during `revert`; the manager only serializes its own
/// ledger updates.
#[derive(Clone)]
pub struct SnapshotManager {
    engine: Arc<Engine>,
}

impl SnapshotManager {
    /// Open (or create) snapshot storage. A corrupt ledger is fatal.
    pub fn open(options: SnapshotOptions) -> Result<Self, SnapshotError> {
        fs::create_dir_all(&options.storage)?;
        let rules = IgnoreRules::new(&options.ignore, &options.root, &options.storage)?;
        let objects = ObjectStore::open(options.storage.join("objects"))?;
        let trees = TreeStore::open(options.storage.join("trees"))?;
        let ledger = Ledger::load(options.storage.join("changes.json"))?;

        info!(
            root = %options.root.display(),
            storage = %options.storage.display(),
            records = ledger.records().len(),
            "Snapshot manager ready"
        );

        Ok(Self {
            engine: Arc::new(Engine {
                root: options.root,
                rules,
                max_file_bytes: options.max_file_bytes,
                objects,
                trees,
                ledger: Mutex::new(ledger),
                last_capture: Mutex::new(None),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.engine.root
    }

    /// Capture the current working tree.
    pub async fn capture(&self) -> Result<SnapshotRef, SnapshotError> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.capture().map(|(id, _)| id)).await?
    }

    /// Record what changed since `before` on behalf of `annotation_id`.
    ///
    /// Returns `None` when the tree is unchanged. `reported` are paths the
    /// agent claimed to edit; ones that did not actually change are logged
    /// and dropped.
    pub async fn commit(
        &self,
        annotation_id: &str,
        before: &SnapshotRef,
        reported: Vec<String>,
    ) -> Result<Option<ChangeRecord>, SnapshotError> {
        let engine = Arc::clone(&self.engine);
        let annotation_id = annotation_id.to_string();
        let before = before.clone();
        tokio::task::spawn_blocking(move || engine.commit(&annotation_id, &before, &reported)).await?
    }

    /// Restore every path that changed since `before`. Used to discard the
    /// partial work of a failed run. Returns the restored paths.
    pub async fn rollback(&self, before: &SnapshotRef) -> Result<Vec<String>, SnapshotError> {
        let engine = Arc::clone(&self.engine);
        let before = before.clone();
        tokio::task::spawn_blocking(move || engine.rollback(&before)).await?
    }

    /// Undo every unreverted change of `annotation_id`.
    pub async fn revert(&self, annotation_id: &str) -> Result<RevertOutcome, SnapshotError> {
        let engine = Arc::clone(&self.engine);
        let annotation_id = annotation_id.to_string();
        tokio::task::spawn_blocking(move || engine.revert(&annotation_id)).await?
    }

    /// Remove manifests and blobs not referenced by the ledger or the most
    /// recent capture.
    pub async fn gc(&self) -> Result<GcStats, SnapshotError> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.gc()).await?
    }

    pub fn records(&self) -> Vec<ChangeRecord> {
        self.engine.ledger.lock().records().to_vec()
    }

    pub fn records_for(&self, annotation_id: &str) -> Vec<ChangeRecord> {
        self.engine.ledger.lock().for_annotation(annotation_id)
    }

    pub fn manifest(&self, id: &SnapshotRef) -> Result<Manifest, SnapshotError> {
        self.engine.trees.get(id)
    }
}

impl Engine {
    fn capture(&self) -> Result<(SnapshotRef, Manifest), SnapshotError> {
        let manifest = scan(&self.root, &self.rules, self.max_file_bytes, &self.objects)?;
        let id = self.trees.put(&manifest)?;
        debug!(snapshot = %id, files = manifest.len(), "Captured working tree");
        *self.last_capture.lock() = Some(id.clone());
        Ok((id, manifest))
    }

    fn commit(
        &self,
        annotation_id: &str,
        before: &SnapshotRef,
        reported: &[String],
    ) -> Result<Option<ChangeRecord>, SnapshotError> {
        let before_manifest = self.trees.get(before)?;
        let (after, after_manifest) = self.capture()?;
        let touched = before_manifest.diff(&after_manifest);

        for path in reported.iter().filter_map(|p| normalize_reported(&self.root, p)) {
            if !touched.contains(&path) {
                debug!(annotation_id, path = %path, "Reported path has no captured change");
            }
        }

        if touched.is_empty() {
            info!(annotation_id, "Agent run left the working tree unchanged");
            return Ok(None);
        }

        let record = ChangeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            annotation_id: annotation_id.to_string(),
            before: before.clone(),
            after,
            touched_paths: touched,
            created_at: drawbridge_protocols::now_millis(),
        };
        self.ledger.lock().push(record.clone())?;

        info!(
            annotation_id,
            change_id = %record.id,
            paths = record.touched_paths.len(),
            "Committed change record"
        );
        Ok(Some(record))
    }

    fn rollback(&self, before: &SnapshotRef) -> Result<Vec<String>, SnapshotError> {
        let before_manifest = self.trees.get(before)?;
        let current = scan(&self.root, &self.rules, self.max_file_bytes, &self.objects)?;
        let changed = before_manifest.diff(&current);
        for path in &changed {
            self.restore_path(&before_manifest, path)?;
        }
        if !changed.is_empty() {
            info!(paths = changed.len(), "Rolled back partial changes");
        }
        Ok(changed)
    }

    fn revert(&self, annotation_id: &str) -> Result<RevertOutcome, SnapshotError> {
        let mut ledger = self.ledger.lock();
        let records = ledger.records();

        let Some(first_idx) = records.iter().position(|r| r.annotation_id == annotation_id) else {
            return Ok(RevertOutcome::NoChanges);
        };

        let own: Vec<&ChangeRecord> = records
            .iter()
            .filter(|r| r.annotation_id == annotation_id)
            .collect();
        let paths: BTreeSet<String> = own
            .iter()
            .flat_map(|r| r.touched_paths.iter().cloned())
            .collect();

        // Any later record from another annotation touching our paths blocks the revert.
        let mut conflict_paths = BTreeSet::new();
        let mut conflict_annotations = BTreeSet::new();
        for later in &records[first_idx + 1..] {
            if later.annotation_id == annotation_id {
                continue;
            }
            for path in &paths {
                if later.touches(path) {
                    conflict_paths.insert(path.clone());
                    conflict_annotations.insert(later.annotation_id.clone());
                }
            }
        }
        if !conflict_paths.is_empty() {
            warn!(
                annotation_id,
                blocking = ?conflict_annotations,
                "Revert blocked by later overlapping changes"
            );
            return Ok(RevertOutcome::Conflict {
                paths: conflict_paths.into_iter().collect(),
                annotations: conflict_annotations.into_iter().collect(),
            });
        }

        let baseline = self.trees.get(&records[first_idx].before)?;
        // Check every blob up front so a missing object cannot leave a half-reverted tree.
        for path in &paths {
            if let Some(entry) = baseline.get(path) {
                if !self.objects.contains(&entry.hash) {
                    return Err(SnapshotError::MissingObject(entry.hash.clone()));
                }
            }
        }
        for path in &paths {
            self.restore_path(&baseline, path)?;
        }

        let removed = ledger.remove_annotation(annotation_id)?;
        info!(annotation_id, paths = paths.len(), records = removed, "Reverted annotation changes");
        Ok(RevertOutcome::Reverted {
            paths: paths.into_iter().collect(),
            records: removed,
        })
    }

    /// Make `path` in the working tree match `manifest`: rewrite it, or
    /// delete it when the manifest has no entry. Untracked paths are left
    /// alone.
    fn restore_path(&self, manifest: &Manifest, path: &str) -> Result<(), SnapshotError> {
        if manifest.is_untracked(path) {
            warn!(path, "Not restoring a file that was too large to capture");
            return Ok(());
        }
        let target = self.root.join(path);
        match manifest.get(path) {
            Some(entry) => {
                let bytes = self.objects.get(&entry.hash)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, &bytes)?;
                set_file_mode(&target, entry.mode)?;
            }
            None => {
                match fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                self.prune_empty_dirs(&target);
            }
        }
        debug!(path, "Restored path");
        Ok(())
    }

    fn prune_empty_dirs(&self, removed: &Path) {
        let mut dir = removed.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // Fails (and stops) on the first non-empty directory.
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    fn gc(&self) -> Result<GcStats, SnapshotError> {
        let mut keep_trees: HashSet<SnapshotRef> = HashSet::new();
        {
            let ledger = self.ledger.lock();
            for record in ledger.records() {
                keep_trees.insert(record.before.clone());
                keep_trees.insert(record.after.clone());
            }
        }
        if let Some(last) = self.last_capture.lock().clone() {
            keep_trees.insert(last);
        }

        let mut stats = GcStats::default();
        let mut keep_objects: HashSet<String> = HashSet::new();
        for id in self.trees.ids()? {
            if keep_trees.contains(&id) {
                let manifest = self.trees.get(&id)?;
                keep_objects.extend(manifest.hashes().map(str::to_string));
            } else {
                self.trees.remove(&id)?;
                stats.trees_removed += 1;
            }
        }
        stats.objects_removed = self.objects.retain(&keep_objects)?;

        info!(
            trees_removed = stats.trees_removed,
            objects_removed = stats.objects_removed,
            "Snapshot garbage collection finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
