//! Module name derivation
//!
//! Maps a source file to the dotted module name it is imported under. The
//! mapping depends on the interpreter's search path, so it is pluggable; the
//! default picks the longest search root containing the file.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while naming a module
#[derive(Debug, Error)]
pub enum NamingError {
    /// File is not below any search root
    #[error("{0} is not below any module search root")]
    NotUnderRoot(PathBuf),

    /// File path does not form a valid module name
    #[error("Cannot derive a module name from {0}")]
    InvalidName(PathBuf),
}

/// Resolves the logical module name backing a source file
pub trait ModuleNamer {
    /// Dotted module name for `file`
    fn module_name(&self, file: &Path) -> Result<String, NamingError>;
}

/// Names modules relative to the longest matching search root
///
/// `<root>/pkg/sub/mod.py` becomes `pkg.sub.mod` and `<root>/pkg/__init__.py`
/// becomes `pkg`.
#[derive(Debug, Clone)]
pub struct SearchRootNamer {
    roots: Vec<PathBuf>,
}

impl SearchRootNamer {
    /// Create a namer over the given search roots
    pub fn new(roots: Vec<PathBuf>) -> Self {
        // Canonicalize the roots so they compare equal to discovered files
        let roots = roots
            .into_iter()
            .map(|root| root.canonicalize().unwrap_or(root))
            .collect();
        Self { roots }
    }

    fn longest_root(&self, file: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| file.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }
}

impl ModuleNamer for SearchRootNamer {
    fn module_name(&self, file: &Path) -> Result<String, NamingError> {
        let root = self
            .longest_root(file)
            .ok_or_else(|| NamingError::NotUnderRoot(file.to_path_buf()))?;
        let relative = file
            .strip_prefix(root)
            .map_err(|_| NamingError::NotUnderRoot(file.to_path_buf()))?;

        let invalid = || NamingError::InvalidName(file.to_path_buf());
        let mut parts = Vec::new();
        if let Some(parent) = relative.parent() {
            for component in parent.components() {
                match component {
                    Component::Normal(part) => parts.push(part.to_str().ok_or_else(invalid)?),
                    _ => return Err(invalid()),
                }
            }
        }

        let stem = relative
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(invalid)?;
        if stem != "__init__" {
            parts.push(stem);
        }

        if parts.is_empty() || parts.iter().any(|p| p.is_empty() || p.contains('.')) {
            return Err(invalid());
        }

        Ok(parts.join("."))
    }
}
