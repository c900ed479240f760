//! Dirty module detection
//!
//! Compares the previous [`Snapshot`] against the files currently on disk and
//! works out which files must be re-imported, which snapshot entries can be
//! carried forward, and which previously generated artifacts are stale.
//!
//! ```text
//! snapshot ──→ seed (mtime / missing file / tombstone)
//!                 ↓
//!              propagate over dependency edges until a pass changes nothing
//!                 ↓
//! current files ──→ reachability from the modules backing them
//!                 ↓
//!   DirtySet { dirty_files, surviving, dirty_backing_paths }
//! ```
//!
//! The dependency graph may contain cycles. Both propagation and reachability
//! are monotone fixpoints over a finite node set, so they always terminate.

use crate::metadata::{file_mtime, ModuleRecord, Snapshot};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

/// Per-module state computed for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dirtiness {
    /// Nothing this module depends on has changed
    Clean,
    /// The module's own file changed or vanished (or it never had one)
    Changed,
    /// A dependency is dirty; holds the module whose change caused it
    Via(String),
}

impl Dirtiness {
    /// Check if the module needs re-examination
    pub fn is_dirty(&self) -> bool {
        !matches!(self, Dirtiness::Clean)
    }

    /// Module whose change made `name` dirty
    fn cause<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        match self {
            Dirtiness::Clean => None,
            Dirtiness::Changed => Some(name),
            Dirtiness::Via(cause) => Some(cause),
        }
    }
}

/// Why a file has to be re-imported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyReason {
    /// No snapshot module is backed by this file
    New,
    /// The file itself changed
    Changed,
    /// A module it depends on changed
    Dependency(String),
}

impl fmt::Display for DirtyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirtyReason::New => write!(f, "new"),
            DirtyReason::Changed => write!(f, "changed"),
            DirtyReason::Dependency(dep) => write!(f, "dependency {} changed", dep),
        }
    }
}

/// A current source file that must be re-imported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyFile {
    pub path: PathBuf,
    pub reason: DirtyReason,
}

/// Result of dirty detection
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    /// Files to re-import, in the order they were passed in
    pub dirty_files: Vec<DirtyFile>,

    /// Snapshot entries that are both reachable and clean
    pub surviving: BTreeMap<String, Option<ModuleRecord>>,

    /// Backing files of every dirty module that has a record
    pub dirty_backing_paths: BTreeSet<PathBuf>,

    /// Final state of every snapshot module
    pub dirtiness: BTreeMap<String, Dirtiness>,

    /// Number of propagation passes until nothing changed
    pub passes: usize,
}

impl DirtySet {
    /// Check if nothing has to be re-imported
    pub fn is_clean(&self) -> bool {
        self.dirty_files.is_empty()
    }

    /// Paths of the dirty files
    pub fn dirty_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.dirty_files.iter().map(|f| &f.path)
    }

    /// Reason a file is dirty, `None` if it is clean
    pub fn reason_for(&self, path: &Path) -> Option<&DirtyReason> {
        self.dirty_files
            .iter()
            .find(|f| f.path == path)
            .map(|f| &f.reason)
    }
}

/// Detect new and dirty files, statting the real filesystem
pub fn detect_dirty_files(current_files: &[PathBuf], snapshot: &Snapshot) -> DirtySet {
    detect_dirty_files_with(current_files, snapshot, file_mtime)
}

/// Detect new and dirty files using `stat` to read modification times
///
/// `stat` returns `None` for files that no longer exist.
pub fn detect_dirty_files_with<F>(current_files: &[PathBuf], snapshot: &Snapshot, stat: F) -> DirtySet
where
    F: Fn(&Path) -> Option<f64>,
{
    let mut dirtiness = seed_dirtiness(snapshot, &stat);
    let passes = propagate(snapshot, &mut dirtiness);

    let path_index: BTreeMap<&Path, &str> = snapshot
        .modules
        .iter()
        .filter_map(|(name, entry)| entry.as_ref().map(|r| (r.path.as_path(), name.as_str())))
        .collect();

    let roots = current_files
        .iter()
        .filter_map(|file| path_index.get(file.as_path()).copied());
    let reachable = reachable_modules(snapshot, roots);

    let mut dirty_files = Vec::new();
    for file in current_files {
        let reason = match path_index.get(file.as_path()) {
            None => DirtyReason::New,
            Some(name) => match &dirtiness[*name] {
                Dirtiness::Clean => continue,
                Dirtiness::Changed => DirtyReason::Changed,
                Dirtiness::Via(cause) => DirtyReason::Dependency(cause.clone()),
            },
        };
        dirty_files.push(DirtyFile {
            path: file.clone(),
            reason,
        });
    }

    let surviving: BTreeMap<String, Option<ModuleRecord>> = snapshot
        .modules
        .iter()
        .filter(|(name, _)| reachable.contains(name.as_str()) && !dirtiness[*name].is_dirty())
        .map(|(name, entry)| (name.clone(), entry.clone()))
        .collect();

    let dirty_backing_paths = snapshot
        .modules
        .iter()
        .filter(|(name, _)| dirtiness[*name].is_dirty())
        .filter_map(|(_, entry)| entry.as_ref().map(|r| r.path.clone()))
        .collect();

    tracing::debug!(
        "dirty detection: {} dirty of {} files, {} of {} modules survive, {} passes",
        dirty_files.len(),
        current_files.len(),
        surviving.len(),
        snapshot.len(),
        passes
    );

    DirtySet {
        dirty_files,
        surviving,
        dirty_backing_paths,
        dirtiness,
        passes,
    }
}

/// Initial state: a module is changed if it is a tombstone, its file is gone,
/// or its mtime differs from the recorded one
fn seed_dirtiness<F>(snapshot: &Snapshot, stat: &F) -> BTreeMap<String, Dirtiness>
where
    F: Fn(&Path) -> Option<f64>,
{
    snapshot
        .modules
        .iter()
        .map(|(name, entry)| {
            let state = match entry {
                Some(record) if !record.is_stale(stat(&record.path)) => Dirtiness::Clean,
                _ => Dirtiness::Changed,
            };
            (name.clone(), state)
        })
        .collect()
}

/// Spread dirtiness to dependents until a full pass marks nothing new
///
/// Returns the number of passes. Marks only ever go from clean to dirty, so
/// the loop is bounded by the number of modules; in practice by the length of
/// the longest dependency chain. A dependency absent from the snapshot is
/// treated as dirty.
fn propagate(snapshot: &Snapshot, dirtiness: &mut BTreeMap<String, Dirtiness>) -> usize {
    let mut passes = 0;
    loop {
        passes += 1;
        let mut found_change = false;

        for (name, entry) in &snapshot.modules {
            let Some(record) = entry else {
                continue;
            };
            if dirtiness[name].is_dirty() {
                continue;
            }

            let cause = record.dependencies.iter().find_map(|dep| match dirtiness.get(dep) {
                Some(state) => state.cause(dep).map(str::to_string),
                None => Some(dep.clone()),
            });

            if let Some(cause) = cause {
                dirtiness.insert(name.clone(), Dirtiness::Via(cause));
                found_change = true;
            }
        }

        if !found_change {
            return passes;
        }
    }
}

/// Modules transitively reachable over dependency edges from `roots`
fn reachable_modules<'a>(
    snapshot: &'a Snapshot,
    roots: impl Iterator<Item = &'a str>,
) -> BTreeSet<&'a str> {
    let mut reachable = BTreeSet::new();
    let mut queue: VecDeque<&str> = roots.collect();

    while let Some(name) = queue.pop_front() {
        if !reachable.insert(name) {
            continue;
        }
        if let Some(record) = snapshot.record(name) {
            queue.extend(
                record
                    .dependencies
                    .iter()
                    .map(String::as_str)
                    .filter(|dep| !reachable.contains(dep)),
            );
        }
    }

    reachable
}
