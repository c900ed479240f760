//! Reconciliation driver
//!
//! One incremental run: load the previous snapshot, work out which files
//! must be re-imported, import exactly those with the tracer recording,
//! fold the imported modules and their traced dependencies back into the
//! snapshot, and persist it. Nothing is written if any import fails.

use crate::config::StubgenConfig;
use crate::descriptor::Registration;
use crate::dirty::{detect_dirty_files, DirtyFile, DirtySet};
use crate::discover::{discover_sources, DiscoverError};
use crate::loader::{LoadError, ModuleLoader};
use crate::metadata::{MetadataError, ModuleRecord, Snapshot};
use crate::naming::{ModuleNamer, NamingError};
use crate::tracer::DependencyTracer;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The import system resolved the module name to a different file
    #[error(
        "Imported module {module} was expected to come from {}, but instead came from {actual}",
        expected.display()
    )]
    PathMismatch {
        module: String,
        expected: PathBuf,
        actual: String,
    },

    /// The module raised while being imported
    #[error("Failed to import {module} ({}): {source}", file.display())]
    ImportFailed {
        module: String,
        file: PathBuf,
        #[source]
        source: LoadError,
    },

    /// Loader error outside of a single import
    #[error("Loader error: {0}")]
    LoadError(#[from] LoadError),

    /// Naming error
    #[error("Naming error: {0}")]
    NamingError(#[from] NamingError),

    /// Discovery error
    #[error("Discovery error: {0}")]
    DiscoverError(#[from] DiscoverError),

    /// Metadata error
    #[error("Metadata error: {0}")]
    MetadataError(#[from] MetadataError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Outcome of a successful run, handed to the artifact layer
#[derive(Debug)]
pub struct RunReport {
    /// Every source file found by discovery
    pub all_files: Vec<PathBuf>,

    /// Dirty-set resolution against the previous snapshot
    pub dirty: DirtySet,

    /// Files recorded by this run's fold
    pub folded_files: BTreeSet<PathBuf>,

    /// Files of every module executed during this run, dirty or not
    pub imported_files: BTreeSet<PathBuf>,

    /// Class registrations observed while importing
    pub registrations: Vec<Registration>,

    /// The snapshot that was persisted
    pub snapshot: Snapshot,
}

impl RunReport {
    /// Files that were re-imported, in order, with their reasons
    pub fn dirty_files(&self) -> &[DirtyFile] {
        &self.dirty.dirty_files
    }

    /// Every path whose artifacts can no longer be trusted
    ///
    /// The dirty files, the backing files of dirty snapshot entries, the
    /// files folded by this run and every file the loader executed. A clean
    /// module imported by a dirty one registers its classes again, so its
    /// previous artifacts must be replaced rather than merged.
    pub fn stale_files(&self) -> BTreeSet<PathBuf> {
        self.dirty
            .dirty_paths()
            .chain(self.dirty.dirty_backing_paths.iter())
            .chain(self.folded_files.iter())
            .chain(self.imported_files.iter())
            .cloned()
            .collect()
    }
}

/// Drives one incremental run over a namer and a loader
pub struct Reconciler<N, L> {
    in_dirs: Vec<PathBuf>,
    ignore: Vec<PathBuf>,
    extension: String,
    out_dir: PathBuf,
    force_rebuild: bool,
    namer: N,
    loader: L,
}

impl<N: ModuleNamer, L: ModuleLoader> Reconciler<N, L> {
    pub fn new(config: &StubgenConfig, namer: N, loader: L) -> Self {
        Self {
            in_dirs: config.in_dirs.clone(),
            ignore: config.ignore.clone(),
            extension: config.extension.clone(),
            out_dir: config.out_dir.clone(),
            force_rebuild: config.force_rebuild,
            namer,
            loader,
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Discover the source files and reconcile against them
    pub fn run(&mut self) -> Result<RunReport, ReconcileError> {
        let files = discover_sources(&self.in_dirs, &self.ignore, &self.extension)?;
        self.run_with_files(files)
    }

    /// Reconcile against an already enumerated, canonical file list
    pub fn run_with_files(&mut self, files: Vec<PathBuf>) -> Result<RunReport, ReconcileError> {
        let previous = if self.force_rebuild {
            tracing::debug!("force rebuild: ignoring previous snapshot");
            Snapshot::new()
        } else {
            Snapshot::load(&self.out_dir)
        };

        let dirty = detect_dirty_files(&files, &previous);
        tracing::info!(
            "Importing modules ({} of {} files dirty)",
            dirty.dirty_files.len(),
            files.len()
        );

        let mut tracer = DependencyTracer::new();
        tracer.start();
        let imported = self.import_dirty(&dirty.dirty_files, &mut tracer);
        tracer.stop();
        let imported = imported?;

        let mut modules = dirty.surviving.clone();
        let mut folded_files = BTreeSet::new();
        for module in &imported {
            fold_module(module, &tracer, &self.loader, &mut modules, &mut folded_files);
        }

        let imported_files: BTreeSet<PathBuf> = self
            .loader
            .loaded_files()
            .into_iter()
            .map(|file| file.canonicalize().unwrap_or(file))
            .collect();
        let registrations = self.loader.take_registrations();
        self.loader.finish()?;

        let snapshot = Snapshot::from_modules(modules);
        std::fs::create_dir_all(&self.out_dir)?;
        snapshot.save(&self.out_dir)?;
        tracing::debug!(
            "saved snapshot with {} modules ({} folded files)",
            snapshot.len(),
            folded_files.len()
        );

        Ok(RunReport {
            all_files: files,
            dirty,
            folded_files,
            imported_files,
            registrations,
            snapshot,
        })
    }

    /// Import each dirty file in order, returning the module names
    fn import_dirty(
        &mut self,
        dirty_files: &[DirtyFile],
        tracer: &mut DependencyTracer,
    ) -> Result<Vec<String>, ReconcileError> {
        let mut imported = Vec::with_capacity(dirty_files.len());

        for dirty in dirty_files {
            let module = self.namer.module_name(&dirty.path)?;
            tracing::info!(" -> {} ({})", module, dirty.reason);

            let loaded = self.loader.import(&module, tracer).map_err(|source| {
                ReconcileError::ImportFailed {
                    module: module.clone(),
                    file: dirty.path.clone(),
                    source,
                }
            })?;

            check_origin(&module, &dirty.path, loaded.file.as_deref())?;
            imported.push(module);
        }

        Ok(imported)
    }
}

/// Fail unless `actual` is the same file as `expected`
fn check_origin(module: &str, expected: &Path, actual: Option<&Path>) -> Result<(), ReconcileError> {
    let mismatch = |actual: String| ReconcileError::PathMismatch {
        module: module.to_string(),
        expected: expected.to_path_buf(),
        actual,
    };

    let actual = actual.ok_or_else(|| mismatch("<no file>".to_string()))?;
    let expected_canonical = expected.canonicalize().unwrap_or_else(|_| expected.to_path_buf());
    let actual_canonical = actual.canonicalize().unwrap_or_else(|_| actual.to_path_buf());

    if expected_canonical != actual_canonical {
        return Err(mismatch(actual.display().to_string()));
    }
    Ok(())
}

/// Record `root` and its traced dependencies, stopping at names already present
///
/// A module that is not loaded or has no existing file becomes a tombstone,
/// and its dependencies are not followed.
fn fold_module<L: ModuleLoader>(
    root: &str,
    tracer: &DependencyTracer,
    loader: &L,
    modules: &mut BTreeMap<String, Option<ModuleRecord>>,
    folded_files: &mut BTreeSet<PathBuf>,
) {
    let mut worklist = VecDeque::from([root.to_string()]);

    while let Some(name) = worklist.pop_front() {
        if modules.contains_key(&name) {
            continue;
        }

        let dependencies = tracer.dependencies_of(&name);
        let record = loader
            .loaded(&name)
            .and_then(|module| module.file)
            .map(|file| file.canonicalize().unwrap_or(file))
            .and_then(|file| ModuleRecord::from_file(&file, dependencies.clone()));

        match record {
            Some(record) => {
                folded_files.insert(record.path.clone());
                worklist.extend(
                    dependencies
                        .into_iter()
                        .filter(|dep| !modules.contains_key(dep)),
                );
                modules.insert(name, Some(record));
            }
            None => {
                tracing::debug!("{} has no backing file, recording tombstone", name);
                modules.insert(name, None);
            }
        }
    }
}
