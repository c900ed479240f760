//! Source file discovery
//!
//! Enumerates the source files under the input directories, minus anything
//! below an ignored directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during discovery
#[derive(Debug, Error)]
pub enum DiscoverError {
    /// Input directory does not exist
    #[error("Input directory does not exist: {0}")]
    MissingInputDir(PathBuf),

    /// Input path cannot be used in a glob pattern
    #[error("Input path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    /// Glob pattern error
    #[error("Invalid glob pattern: {0}")]
    PatternError(#[from] glob::PatternError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Find every `*.<extension>` file below `in_dirs`
///
/// Files that have one of `ignore` among their ancestors are skipped. The
/// returned paths are canonical, deduplicated, and ordered by input
/// directory, then by glob order.
pub fn discover_sources(
    in_dirs: &[PathBuf],
    ignore: &[PathBuf],
    extension: &str,
) -> Result<Vec<PathBuf>, DiscoverError> {
    let ignore: Vec<PathBuf> = ignore
        .iter()
        .map(|dir| dir.canonicalize().unwrap_or_else(|_| dir.clone()))
        .collect();

    let mut files = Vec::new();
    let mut seen = BTreeSet::new();
    for dir in in_dirs {
        if !dir.is_dir() {
            return Err(DiscoverError::MissingInputDir(dir.clone()));
        }
        let dir = dir.canonicalize()?;
        let base = dir
            .to_str()
            .ok_or_else(|| DiscoverError::NonUtf8Path(dir.clone()))?;
        let pattern = format!("{}/**/*.{}", glob::Pattern::escape(base), extension);

        for path in glob::glob(&pattern)?.flatten() {
            if !path.is_file() || is_ignored(&path, &ignore) {
                continue;
            }
            let path = path.canonicalize()?;
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    tracing::debug!("discovered {} source files", files.len());
    Ok(files)
}

fn is_ignored(path: &Path, ignore: &[PathBuf]) -> bool {
    path.ancestors().skip(1).any(|a| ignore.iter().any(|ig| a == ig))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_discovers_nested_sources() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("in");
        touch(&root.join("app.py"));
        touch(&root.join("pkg/__init__.py"));
        touch(&root.join("pkg/models.py"));
        touch(&root.join("pkg/data.json"));

        let files = discover_sources(&[root.clone()], &[], "py").unwrap();
        let root = root.canonicalize().unwrap();

        assert_eq!(files.len(), 3);
        assert!(files.contains(&root.join("app.py")));
        assert!(files.contains(&root.join("pkg/__init__.py")));
        assert!(files.contains(&root.join("pkg/models.py")));
    }

    #[test]
    fn test_ignored_directories_are_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("in");
        touch(&root.join("app.py"));
        touch(&root.join("vendor/lib.py"));
        touch(&root.join("vendor/deep/more.py"));

        let files = discover_sources(&[root.clone()], &[root.join("vendor")], "py").unwrap();

        assert_eq!(files, vec![root.canonicalize().unwrap().join("app.py")]);
    }

    #[test]
    fn test_overlapping_inputs_deduplicate() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("in");
        touch(&root.join("sub/a.py"));

        touch(&root.join("b.py"));

        let files = discover_sources(&[root.join("sub"), root.clone()], &[], "py").unwrap();
        let root = root.canonicalize().unwrap();
        assert_eq!(files, vec![root.join("sub/a.py"), root.join("b.py")]);
    }

    #[test]
    fn test_missing_input_dir() {
        let temp = tempfile::tempdir().unwrap();
        let result = discover_sources(&[temp.path().join("nope")], &[], "py");
        assert!(matches!(result, Err(DiscoverError::MissingInputDir(_))));
    }
}
