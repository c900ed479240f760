//! qmltyperegistrar invocation and Qt install detection

use crate::descriptor::QmlModuleKey;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Errors that can occur while running the registrar
#[derive(Debug, Error)]
pub enum RegistrarError {
    /// The registrar could not be started
    #[error("Failed to run {}: {source}", path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The registrar exited with a failure status
    #[error("qmltyperegistrar failed for {key} with {status}")]
    Failed {
        key: QmlModuleKey,
        status: std::process::ExitStatus,
    },

    /// No Qt metatypes directory found
    #[error("Could not find the Qt metatypes directory. Provide it manually using the --metatypes-dir option")]
    MetatypesDirNotFound,

    /// No registrar executable found
    #[error("Could not find qmltyperegistrar. Provide it manually using the --qmltyperegistrar-path option")]
    RegistrarNotFound,
}

/// Runs qmltyperegistrar for one QML module at a time
#[derive(Debug, Clone)]
pub struct Registrar {
    path: PathBuf,
}

impl Registrar {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Arguments for generating `key`'s registrations and qmltypes inside `module_dir`
    pub fn arguments(
        &self,
        key: &QmlModuleKey,
        module_dir: &Path,
        foreign_types: &[PathBuf],
    ) -> Vec<String> {
        let foreign = foreign_types
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(",");

        vec![
            module_dir.join(key.types_file_name()).display().to_string(),
            "-o".to_string(),
            module_dir
                .join(key.registrations_file_name())
                .display()
                .to_string(),
            "--generate-qmltypes".to_string(),
            module_dir.join(key.qmltypes_file_name()).display().to_string(),
            "--import-name".to_string(),
            key.uri.clone(),
            "--major-version".to_string(),
            key.major.to_string(),
            "--minor-version".to_string(),
            key.minor.to_string(),
            "--foreign-types".to_string(),
            foreign,
        ]
    }

    /// Generate the registrations and qmltypes for `key`
    pub fn run(
        &self,
        key: &QmlModuleKey,
        module_dir: &Path,
        foreign_types: &[PathBuf],
    ) -> Result<(), RegistrarError> {
        let status = Command::new(&self.path)
            .args(self.arguments(key, module_dir, foreign_types))
            .status()
            .map_err(|source| RegistrarError::SpawnFailed {
                path: self.path.clone(),
                source,
            })?;

        if !status.success() {
            return Err(RegistrarError::Failed {
                key: key.clone(),
                status,
            });
        }
        Ok(())
    }
}

fn qt_prefixes() -> Vec<PathBuf> {
    let mut prefixes = Vec::new();
    if let Some(dir) = std::env::var_os("QTDIR") {
        prefixes.push(PathBuf::from(dir));
    }
    prefixes.extend(
        [
            "/usr/lib/qt6",
            "/usr/lib64/qt6",
            "/usr/lib/x86_64-linux-gnu/qt6",
            "/usr/lib/aarch64-linux-gnu/qt6",
            "/usr/local/lib/qt6",
        ]
        .iter()
        .map(PathBuf::from),
    );
    prefixes
}

/// Find the Qt 6 metatypes directory among the standard install locations
pub fn detect_metatypes_dir() -> Result<PathBuf, RegistrarError> {
    let candidates: Vec<PathBuf> = qt_prefixes()
        .into_iter()
        .flat_map(|prefix| [prefix.join("metatypes"), prefix.join("lib").join("metatypes")])
        .collect();
    first_existing(&candidates, Path::is_dir).ok_or(RegistrarError::MetatypesDirNotFound)
}

/// Find the qmltyperegistrar executable among the standard install locations
pub fn detect_registrar_path() -> Result<PathBuf, RegistrarError> {
    let candidates: Vec<PathBuf> = qt_prefixes()
        .into_iter()
        .flat_map(|prefix| {
            [
                prefix.join("qmltyperegistrar"),
                prefix.join("libexec").join("qmltyperegistrar"),
                prefix.join("qmltyperegistrar.exe"),
            ]
        })
        .collect();
    first_existing(&candidates, Path::is_file).ok_or(RegistrarError::RegistrarNotFound)
}

fn first_existing(candidates: &[PathBuf], exists: fn(&Path) -> bool) -> Option<PathBuf> {
    candidates.iter().find(|c| exists(c)).cloned()
}
