//! Artifact reconciliation
//!
//! Brings the per-QML-module outputs under `out_dir` in line with a run:
//! entries whose input file is stale are dropped, fresh registrations are
//! merged in, changed modules are rewritten and passed to the registrar, and
//! every `qmldir` is regenerated from what survives.

use crate::descriptor::{
    read_types_file, write_types_file, DescriptorError, ModuleDescriptor, QmlModuleKey,
    Registration,
};
use crate::registrar::{Registrar, RegistrarError};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while updating artifacts
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A class is registered from a file outside the scanned sources
    #[error(
        "Found {class_name} registered for {key} but the file {input_file} is not among the scanned files"
    )]
    UnknownInputFile {
        class_name: String,
        key: QmlModuleKey,
        input_file: String,
    },

    /// A registered file lies outside the directory input files are made relative to
    #[error("{} is not below {}", input_file.display(), base.display())]
    OutsideRelativeBase { input_file: PathBuf, base: PathBuf },

    /// Output path cannot be used in a glob pattern
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    /// Glob pattern error
    #[error("Invalid glob pattern: {0}")]
    PatternError(#[from] glob::PatternError),

    /// Descriptor error
    #[error("Descriptor error: {0}")]
    DescriptorError(#[from] DescriptorError),

    /// Registrar error
    #[error("Registrar error: {0}")]
    RegistrarError(#[from] RegistrarError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// What an update did to each QML module
#[derive(Debug, Default)]
pub struct ArtifactReport {
    /// Modules whose types changed and were passed to the registrar
    pub regenerated: Vec<QmlModuleKey>,

    /// Modules left without types, whose files were deleted
    pub removed: Vec<QmlModuleKey>,

    /// Modules whose types did not change
    pub unchanged: Vec<QmlModuleKey>,

    /// `qmldir` files written
    pub qmldirs: Vec<PathBuf>,
}

/// Updates the generated files under an output directory
pub struct ArtifactUpdater {
    out_dir: PathBuf,
    metatypes_dir: PathBuf,
    registrar: Registrar,
    file_relative_path: Option<PathBuf>,
}

impl ArtifactUpdater {
    pub fn new(
        out_dir: PathBuf,
        metatypes_dir: PathBuf,
        registrar: Registrar,
        file_relative_path: Option<PathBuf>,
    ) -> Self {
        Self {
            out_dir,
            metatypes_dir,
            registrar,
            file_relative_path,
        }
    }

    /// Reconcile the artifacts with `registrations`
    ///
    /// `all_files` is every scanned source file and `stale_files` the files
    /// whose previous registrations can no longer be trusted; both canonical.
    pub fn update(
        &self,
        registrations: Vec<Registration>,
        all_files: &BTreeSet<PathBuf>,
        stale_files: &BTreeSet<PathBuf>,
    ) -> Result<ArtifactReport, ArtifactError> {
        let base = self.relative_base()?;
        let mut fresh = self.group_registrations(registrations, &base)?;

        let mut keys: BTreeSet<QmlModuleKey> = fresh.keys().cloned().collect();
        for path in glob_paths(&self.out_dir, "**/types*.json")? {
            if let Some(key) = QmlModuleKey::from_types_path(&self.out_dir, &path) {
                keys.insert(key);
            }
        }

        let clean_files: BTreeSet<PathBuf> = all_files.difference(stale_files).cloned().collect();
        let mut foreign_types = glob_paths(&self.metatypes_dir, "*_metatypes.json")?;
        let mut qmldirs: BTreeMap<PathBuf, (String, BTreeSet<String>)> = BTreeMap::new();
        let mut queued = Vec::new();
        let mut report = ArtifactReport::default();

        for key in keys {
            let module_dir = key.dir_in(&self.out_dir);
            fs::create_dir_all(&module_dir)?;
            let types_file = module_dir.join(key.types_file_name());

            let original = if types_file.exists() {
                read_types_file(&types_file)?
            } else {
                Vec::new()
            };

            let mut data: Vec<ModuleDescriptor> = original
                .iter()
                .filter(|m| clean_files.contains(&m.resolved_input(&base)))
                .cloned()
                .collect();
            data.extend(fresh.remove(&key).unwrap_or_default());
            data.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));

            for module in &data {
                if !all_files.contains(&module.resolved_input(&base)) {
                    return Err(ArtifactError::UnknownInputFile {
                        class_name: module.sort_key().to_string(),
                        key,
                        input_file: module.input_file.clone(),
                    });
                }
            }

            if data.is_empty() {
                tracing::debug!("{} has no types left, removing its stubs", key);
                for name in [
                    key.types_file_name(),
                    key.registrations_file_name(),
                    key.qmltypes_file_name(),
                ] {
                    remove_if_exists(&module_dir.join(name))?;
                }
                report.removed.push(key);
                continue;
            }

            if original != data {
                write_types_file(&types_file, &data)?;
                queued.push((key.clone(), module_dir.clone(), data.len()));
            } else {
                report.unchanged.push(key.clone());
            }

            foreign_types.push(types_file);
            let (_, lines) = qmldirs
                .entry(module_dir)
                .or_insert_with(|| (key.uri.clone(), BTreeSet::new()));
            lines.insert(format!("typeinfo {}", key.qmltypes_file_name()));
            for module in &data {
                for dep in module.qt_modules.iter().chain(&module.py_modules) {
                    lines.insert(format!("depends {}", dep));
                }
            }
        }

        for (key, module_dir, classes) in queued {
            tracing::info!(" -> {} (contains {} classes)", key, classes);
            self.registrar.run(&key, &module_dir, &foreign_types)?;
            report.regenerated.push(key);
        }

        for stale in glob_paths(&self.out_dir, "**/qmldir")? {
            fs::remove_file(stale)?;
        }
        for (module_dir, (uri, lines)) in qmldirs {
            let path = module_dir.join("qmldir");
            fs::write(&path, render_qmldir(&uri, &lines))?;
            report.qmldirs.push(path);
        }

        Ok(report)
    }

    fn relative_base(&self) -> Result<PathBuf, ArtifactError> {
        let base = match &self.file_relative_path {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        Ok(base.canonicalize().unwrap_or(base))
    }

    /// Group fresh registrations by QML module, rewriting input files relative to `base`
    fn group_registrations(
        &self,
        registrations: Vec<Registration>,
        base: &Path,
    ) -> Result<BTreeMap<QmlModuleKey, Vec<ModuleDescriptor>>, ArtifactError> {
        let mut grouped: BTreeMap<QmlModuleKey, Vec<ModuleDescriptor>> = BTreeMap::new();

        for Registration { key, mut module } in registrations {
            if self.file_relative_path.is_some() {
                let input = PathBuf::from(&module.input_file);
                let relative =
                    input
                        .strip_prefix(base)
                        .map_err(|_| ArtifactError::OutsideRelativeBase {
                            input_file: input.clone(),
                            base: base.to_path_buf(),
                        })?;
                module.input_file = relative_posix(relative);
            }
            grouped.entry(key).or_default().push(module);
        }

        Ok(grouped)
    }
}

fn relative_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn render_qmldir(uri: &str, lines: &BTreeSet<String>) -> String {
    let mut out = format!("module {}\n", uri);
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn remove_if_exists(path: &Path) -> Result<(), std::io::Error> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Paths below `dir` matching `pattern`, sorted
fn glob_paths(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ArtifactError> {
    let base = dir
        .to_str()
        .ok_or_else(|| ArtifactError::NonUtf8Path(dir.to_path_buf()))?;
    let full = format!("{}/{}", glob::Pattern::escape(base), pattern);

    let mut paths: Vec<PathBuf> = glob::glob(&full)?.flatten().collect();
    paths.sort();
    Ok(paths)
}
