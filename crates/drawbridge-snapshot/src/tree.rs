//! Tree manifests and working tree scanning.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::SnapshotError;
use crate::objects::{hash_bytes, ObjectStore};

/// Directory names that are never captured.
pub const ALWAYS_IGNORED: &[&str] = &[".git", "node_modules", "target", ".drawbridge"];

/// Identifies an immutable captured tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotRef(pub String);

impl SnapshotRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One captured file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub hash: String,
    pub size: u64,
    pub mode: u32,
}

/// Relative path (with `/` separators) to file entry, sorted.
///
/// Files over the size limit are listed in `untracked` without content.
/// Their bytes are unknown, so they are never rewritten or deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: BTreeMap<String, TreeEntry>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub untracked: BTreeSet<String>,
}

impl Manifest {
    pub fn get(&self, path: &str) -> Option<&TreeEntry> {
        self.entries.get(path)
    }

    pub fn is_untracked(&self, path: &str) -> bool {
        self.untracked.contains(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical encoding; the snapshot id is its hash.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Paths added, removed, or modified between `self` and `other`.
    ///
    /// Paths untracked in `self` are left out since they cannot be put
    /// back. A tracked file that grew past the limit counts as modified.
    pub fn diff(&self, other: &Manifest) -> Vec<String> {
        let keys: BTreeSet<&String> = self
            .entries
            .keys()
            .chain(other.entries.keys())
            .chain(other.untracked.iter())
            .collect();
        keys.into_iter()
            .filter(|k| !self.untracked.contains(*k))
            .filter(|k| self.entries.get(*k) != other.entries.get(*k) || other.untracked.contains(*k))
            .cloned()
            .collect()
    }

    /// Referenced blob hashes.
    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|e| e.hash.as_str())
    }
}

/// Decides which paths are left out of a capture.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    patterns: Vec<glob::Pattern>,
    /// Storage directory relative to the root, when it lives inside it.
    storage: Option<PathBuf>,
}

impl IgnoreRules {
    pub fn new(patterns: &[String], root: &Path, storage: &Path) -> Result<Self, SnapshotError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| SnapshotError::Pattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let storage = storage.strip_prefix(root).ok().map(Path::to_path_buf);
        Ok(Self { patterns, storage })
    }

    /// Whether `rel` (relative to the root) should be skipped.
    pub fn is_ignored(&self, rel: &Path) -> bool {
        if rel.components().any(|c| match c {
            Component::Normal(name) => ALWAYS_IGNORED.iter().any(|i| name == *i),
            _ => false,
        }) {
            return true;
        }
        if let Some(storage) = &self.storage {
            if !storage.as_os_str().is_empty() && rel.starts_with(storage) {
                return true;
            }
        }
        let rel_str = to_slash(rel);
        self.patterns.iter().any(|p| p.matches(&rel_str))
    }
}

/// Portable relative path key.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a path reported by an agent into a manifest key.
///
/// Absolute paths must lie under `root`. Returns `None` for paths that
/// escape the root.
pub fn normalize_reported(root: &Path, reported: &str) -> Option<String> {
    let path = Path::new(reported);
    let rel = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    if rel
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return None;
    }
    let key = to_slash(rel);
    (!key.is_empty()).then_some(key)
}

/// Walk `root`, storing every eligible file in `objects`.
pub fn scan(
    root: &Path,
    rules: &IgnoreRules,
    max_file_bytes: u64,
    objects: &ObjectStore,
) -> Result<Manifest, SnapshotError> {
    let mut manifest = Manifest::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(root) {
            Ok(rel) => rel.as_os_str().is_empty() || !rules.is_ignored(rel),
            Err(_) => false,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable path during capture: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };

        let metadata = entry
            .metadata()
            .map_err(|e| SnapshotError::Io(std::io::Error::other(e.to_string())))?;
        if metadata.len() > max_file_bytes {
            debug!(path = %rel.display(), size = metadata.len(), "Large file left untracked");
            manifest.untracked.insert(to_slash(rel));
            continue;
        }

        let bytes = match fs::read(entry.path()) {
            Ok(bytes) => bytes,
            // Deleted between listing and reading.
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let hash = objects.put(&bytes)?;
        manifest.entries.insert(
            to_slash(rel),
            TreeEntry {
                hash,
                size: bytes.len() as u64,
                mode: file_mode(&metadata),
            },
        );
    }

    Ok(manifest)
}

/// Manifests stored as `trees/<id>.json`.
#[derive(Debug, Clone)]
pub struct TreeStore {
    root: PathBuf,
}

impl TreeStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn tree_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Persist `manifest`, returning its content-derived id.
    pub fn put(&self, manifest: &Manifest) -> Result<SnapshotRef, SnapshotError> {
        let bytes = manifest.canonical_bytes()?;
        let id = hash_bytes(&bytes);
        let path = self.tree_path(&id);
        if !path.exists() {
            let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
            fs::write(&tmp, &bytes)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(SnapshotRef(id))
    }

    pub fn get(&self, id: &SnapshotRef) -> Result<Manifest, SnapshotError> {
        let path = self.tree_path(id.as_str());
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn ids(&self) -> Result<Vec<SnapshotRef>, SnapshotError> {
        Ok(crate::objects::read_dir_paths(&self.root)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| SnapshotRef(s.to_string_lossy().into_owned())))
            .collect())
    }

    pub fn remove(&self, id: &SnapshotRef) -> Result<(), SnapshotError> {
        match fs::remove_file(self.tree_path(id.as_str())) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() { 0o444 } else { 0o644 }
}

#[cfg(unix)]
pub(crate) fn set_file_mode(path: &Path, mode: u32) -> Result<(), SnapshotError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn set_file_mode(path: &Path, mode: u32) -> Result<(), SnapshotError> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)?;
    Ok(())
}
