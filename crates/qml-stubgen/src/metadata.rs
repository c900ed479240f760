//! Module snapshot storage
//!
//! Stores what was scanned on the previous run (per-module modification time,
//! backing file and traced dependencies) in `<out_dir>/metadata.json`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

/// Snapshot file name inside the output directory
pub const METADATA_FILE: &str = "metadata.json";

/// Version tag written into every snapshot.
///
/// Snapshots written by any other version are discarded on load.
pub const GENERATING_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors that can occur during snapshot operations
#[derive(Debug, Error)]
pub enum MetadataError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Snapshot written by another version of the tool
    #[error("Snapshot version mismatch: expected {expected}, found {found:?}")]
    VersionMismatch { expected: String, found: String },
}

/// What was recorded about one module on its last successful scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleRecord {
    /// Modification time of the backing file (seconds since the Unix epoch)
    pub modification_time: f64,

    /// Absolute path of the backing file
    pub path: PathBuf,

    /// Names of the modules this module was observed to load
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

impl ModuleRecord {
    /// Stat `path` and build a record for it
    ///
    /// Returns `None` if the file does not exist or has no usable mtime.
    pub fn from_file(path: &Path, dependencies: BTreeSet<String>) -> Option<Self> {
        let modification_time = file_mtime(path)?;
        Some(Self {
            modification_time,
            path: path.to_path_buf(),
            dependencies,
        })
    }

    /// Whether the backing file is missing or has been touched since this record was taken
    pub fn is_stale(&self, current_mtime: Option<f64>) -> bool {
        match current_mtime {
            Some(mtime) => mtime != self.modification_time,
            None => true,
        }
    }
}

/// Snapshot of every module seen by the previous run
///
/// A `None` entry is a tombstone: the name was seen as a dependency but never
/// resolved to a loaded module backed by a real file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Module name -> record (or tombstone)
    pub modules: BTreeMap<String, Option<ModuleRecord>>,

    /// Version of the tool that wrote this snapshot
    #[serde(default)]
    pub generating_version: String,
}

impl Snapshot {
    /// Create an empty snapshot tagged with the current version
    pub fn new() -> Self {
        Self {
            modules: BTreeMap::new(),
            generating_version: GENERATING_VERSION.to_string(),
        }
    }

    /// Build a snapshot from already collected entries
    pub fn from_modules(modules: BTreeMap<String, Option<ModuleRecord>>) -> Self {
        Self {
            modules,
            generating_version: GENERATING_VERSION.to_string(),
        }
    }

    /// Path of the snapshot file for an output directory
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILE)
    }

    /// Load the snapshot for an output directory
    ///
    /// A missing, unreadable, corrupt or foreign-version snapshot is not an
    /// error: it yields an empty snapshot, which makes every file look new.
    pub fn load(dir: &Path) -> Self {
        let path = Self::path_in(dir);
        if !path.exists() {
            tracing::debug!("no snapshot at {}, starting cold", path.display());
            return Self::new();
        }

        match Self::read(&path) {
            Ok(snapshot) => {
                tracing::debug!(
                    "loaded snapshot with {} modules from {}",
                    snapshot.len(),
                    path.display()
                );
                snapshot
            }
            Err(e) => {
                tracing::warn!("discarding snapshot {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    /// Read and validate a snapshot file
    pub fn read(path: &Path) -> Result<Self, MetadataError> {
        let contents = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&contents)?;
        if snapshot.generating_version != GENERATING_VERSION {
            return Err(MetadataError::VersionMismatch {
                expected: GENERATING_VERSION.to_string(),
                found: snapshot.generating_version,
            });
        }
        Ok(snapshot)
    }

    /// Save the snapshot into an output directory
    ///
    /// The file is rewritten as a whole: the JSON goes to a temporary file
    /// which is synced and then renamed over `metadata.json`.
    pub fn save(&self, dir: &Path) -> Result<(), MetadataError> {
        let tagged = Snapshot {
            modules: self.modules.clone(),
            generating_version: GENERATING_VERSION.to_string(),
        };
        let mut json = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        tagged.serialize(&mut serde_json::Serializer::with_formatter(&mut json, formatter))?;

        fs::create_dir_all(dir)?;
        let final_path = Self::path_in(dir);
        let tmp_path = dir.join(format!("{}.tmp", METADATA_FILE));
        let mut tmp_file = fs::File::create(&tmp_path)?;
        tmp_file.write_all(&json)?;
        tmp_file.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;

        Ok(())
    }

    /// Record a scanned module
    pub fn insert_record(&mut self, name: String, record: ModuleRecord) {
        self.modules.insert(name, Some(record));
    }

    /// Record a module name that has no backing file
    pub fn insert_tombstone(&mut self, name: String) {
        self.modules.insert(name, None);
    }

    /// Whether the name is known at all (record or tombstone)
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Record for a module, `None` for unknown names and tombstones
    pub fn record(&self, name: &str) -> Option<&ModuleRecord> {
        self.modules.get(name).and_then(Option::as_ref)
    }

    /// Whether the name is known but has no backing file
    pub fn is_tombstone(&self, name: &str) -> bool {
        matches!(self.modules.get(name), Some(None))
    }

    /// Number of known module names
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the snapshot knows no modules
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Modification time of a file in seconds since the Unix epoch
pub fn file_mtime(path: &Path) -> Option<f64> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}
