//! Generator configuration (qml-stubgen.toml)
//!
//! Every field can be given in the config file; command-line flags override
//! individual fields afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE: &str = "qml-stubgen.toml";

/// Errors that can occur while loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Settings for one generator run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StubgenConfig {
    /// Directories scanned for source files
    pub in_dirs: Vec<PathBuf>,

    /// Files below any of these directories are skipped
    pub ignore: Vec<PathBuf>,

    /// Where stubs and the metadata snapshot are written
    pub out_dir: PathBuf,

    /// Qt metatypes directory (detected when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metatypes_dir: Option<PathBuf>,

    /// qmltyperegistrar executable (detected when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrar_path: Option<PathBuf>,

    /// Input files in the types files are written relative to this directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_relative_path: Option<PathBuf>,

    /// Python interpreter running the bundled import helper: program
    /// followed by any leading arguments
    pub interpreter: Vec<String>,

    /// Source file extension
    pub extension: String,

    /// Module search roots used to name source files
    pub search_roots: Vec<PathBuf>,

    /// Discard the previous output and snapshot before running
    pub force_rebuild: bool,
}

impl Default for StubgenConfig {
    fn default() -> Self {
        Self {
            in_dirs: Vec::new(),
            ignore: Vec::new(),
            out_dir: PathBuf::from("qml-stubs"),
            metatypes_dir: None,
            registrar_path: None,
            file_relative_path: None,
            interpreter: default_interpreter(),
            extension: "py".to_string(),
            search_roots: vec![PathBuf::from(".")],
            force_rebuild: false,
        }
    }
}

fn default_interpreter() -> Vec<String> {
    vec!["python3".to_string()]
}

impl StubgenConfig {
    /// Parse a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a string
    ///
    /// Not validated: CLI overrides are applied before [`Self::validate`].
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path`, or the default file if it exists, or the defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.is_file() {
                    tracing::debug!("using config file {}", default.display());
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.in_dirs.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one input directory is required".to_string(),
            ));
        }
        if self.interpreter.is_empty() || self.interpreter[0].is_empty() {
            return Err(ConfigError::ValidationError(
                "Interpreter command cannot be empty".to_string(),
            ));
        }
        if self.extension.is_empty() || self.extension.contains(['/', '*']) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid source extension: {:?}",
                self.extension
            )));
        }
        if self.search_roots.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one module search root is required".to_string(),
            ));
        }
        Ok(())
    }
}
