//! Module loading
//!
//! The reconciliation driver never executes source code itself. It asks a
//! [`ModuleLoader`] to import a module, and the loader reports every import
//! it observes to the [`DependencyTracer`] and remembers which modules are
//! loaded and where their files live.
//!
//! [`InterpreterLoader`] drives a helper interpreter process over a line
//! protocol. [`HELPER_SOURCE`] is the bundled Python helper; it hooks the
//! import statement and the PySide6 QML registration entry points. The
//! helper is a fresh import namespace for the whole run:
//!
//! ```text
//! → {"import": "pkg.models"}
//! ← {"ok": true,
//!    "events": [{"caller": "pkg.models", "module": "pkg", "reexports": ["pkg.base"]}],
//!    "modules": {"pkg": "/src/pkg/__init__.py", "sys": null},
//!    "registrations": [{"uri": "app", "major": 1, "minor": 0, "module": {...}}]}
//! ← {"ok": false, "error": "Traceback ..."}
//! ```

use crate::descriptor::Registration;
use crate::tracer::DependencyTracer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use thiserror::Error;

/// Python import helper run by [`InterpreterLoader::python`]
pub const HELPER_SOURCE: &str = include_str!("../helper/qml_stubgen_helper.py");

/// Errors that can occur while importing modules
#[derive(Debug, Error)]
pub enum LoadError {
    /// The module raised while executing
    #[error("Importing {module} failed: {message}")]
    ImportFailed { module: String, message: String },

    /// The helper command could not be started
    #[error("Failed to start import helper `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// No helper command configured
    #[error("No import helper command configured")]
    NoCommand,

    /// The helper exited before answering
    #[error("Import helper exited unexpectedly")]
    HelperExited,

    /// The helper exited with a failure status after the run
    #[error("Import helper finished with {0}")]
    HelperFailed(ExitStatus),

    /// The helper sent something that is not a valid response
    #[error("Invalid response from import helper: {0}")]
    ProtocolError(String),

    /// IO error talking to the helper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A module as seen by the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub name: String,
    /// Backing file; `None` for built-in or namespace modules
    pub file: Option<PathBuf>,
}

/// Imports modules into a live namespace
pub trait ModuleLoader {
    /// Import `module`, reporting every import it triggers to `tracer`
    fn import(
        &mut self,
        module: &str,
        tracer: &mut DependencyTracer,
    ) -> Result<LoadedModule, LoadError>;

    /// Look up a module that is currently loaded
    fn loaded(&self, module: &str) -> Option<LoadedModule>;

    /// Backing files of every module executed in this namespace so far
    ///
    /// Includes modules that were only pulled in by another import.
    fn loaded_files(&self) -> BTreeSet<PathBuf>;

    /// Drain the class registrations collected by imports so far
    fn take_registrations(&mut self) -> Vec<Registration>;

    /// Release the import namespace once the run has imported everything
    fn finish(&mut self) -> Result<(), LoadError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ImportRequest<'a> {
    import: &'a str,
}

/// One observed import: `caller` loaded `module`
#[derive(Debug, Clone, Deserialize)]
pub struct ImportEvent {
    #[serde(default)]
    pub caller: Option<String>,
    pub module: String,
    #[serde(default)]
    pub reexports: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ImportResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    events: Vec<ImportEvent>,
    #[serde(default)]
    modules: BTreeMap<String, Option<PathBuf>>,
    #[serde(default)]
    registrations: Vec<Registration>,
}

struct HelperProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Loader backed by a helper interpreter process
pub struct InterpreterLoader {
    command: Vec<String>,
    description: String,
    current_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    helper: Option<HelperProcess>,
    modules: BTreeMap<String, Option<PathBuf>>,
    registrations: Vec<Registration>,
}

impl InterpreterLoader {
    /// Create a loader for the helper `command` (program followed by arguments)
    ///
    /// The helper is started lazily on the first import.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            description: command.join(" "),
            command,
            current_dir: None,
            env: Vec::new(),
            helper: None,
            modules: BTreeMap::new(),
            registrations: Vec::new(),
        }
    }

    /// Create a loader running the bundled helper under a Python interpreter
    pub fn python(interpreter: Vec<String>) -> Self {
        let description = format!("{} -c <qml_stubgen_helper>", interpreter.join(" "));
        let mut command = interpreter;
        command.push("-c".to_string());
        command.push(HELPER_SOURCE.to_string());
        let mut loader = Self::new(command);
        loader.description = description;
        loader
    }

    /// Set the helper's working directory
    pub fn with_current_dir(mut self, dir: PathBuf) -> Self {
        self.current_dir = Some(dir);
        self
    }

    /// Add an environment variable for the helper
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn helper(&mut self) -> Result<&mut HelperProcess, LoadError> {
        if self.helper.is_none() {
            self.helper = Some(self.spawn()?);
        }
        self.helper.as_mut().ok_or(LoadError::HelperExited)
    }

    fn spawn(&self) -> Result<HelperProcess, LoadError> {
        let (program, args) = self.command.split_first().ok_or(LoadError::NoCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| LoadError::SpawnFailed {
            command: self.description.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(LoadError::HelperExited)?;
        let stdout = child.stdout.take().ok_or(LoadError::HelperExited)?;

        tracing::debug!("started import helper `{}`", self.description);
        Ok(HelperProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn request(&mut self, module: &str) -> Result<ImportResponse, LoadError> {
        let mut line = serde_json::to_string(&ImportRequest { import: module })
            .map_err(|e| LoadError::ProtocolError(e.to_string()))?;
        line.push('\n');

        let helper = self.helper()?;
        helper.stdin.write_all(line.as_bytes())?;
        helper.stdin.flush()?;

        let mut response = String::new();
        if helper.stdout.read_line(&mut response)? == 0 {
            self.helper = None;
            return Err(LoadError::HelperExited);
        }
        serde_json::from_str(&response).map_err(|e| LoadError::ProtocolError(e.to_string()))
    }
}

impl ModuleLoader for InterpreterLoader {
    fn import(
        &mut self,
        module: &str,
        tracer: &mut DependencyTracer,
    ) -> Result<LoadedModule, LoadError> {
        let response = self.request(module)?;

        for event in &response.events {
            tracer.record_import(event.caller.as_deref(), &event.module, &event.reexports);
        }
        self.modules.extend(response.modules);

        if !response.ok {
            return Err(LoadError::ImportFailed {
                module: module.to_string(),
                message: response
                    .error
                    .unwrap_or_else(|| "no error message".to_string()),
            });
        }
        self.registrations.extend(response.registrations);

        Ok(LoadedModule {
            name: module.to_string(),
            file: self.modules.get(module).cloned().flatten(),
        })
    }

    fn loaded(&self, module: &str) -> Option<LoadedModule> {
        self.modules.get(module).map(|file| LoadedModule {
            name: module.to_string(),
            file: file.clone(),
        })
    }

    fn loaded_files(&self) -> BTreeSet<PathBuf> {
        self.modules.values().flatten().cloned().collect()
    }

    fn take_registrations(&mut self) -> Vec<Registration> {
        std::mem::take(&mut self.registrations)
    }

    /// Close the helper's input and wait for it to exit
    fn finish(&mut self) -> Result<(), LoadError> {
        let Some(helper) = self.helper.take() else {
            return Ok(());
        };
        let HelperProcess {
            mut child, stdin, ..
        } = helper;
        drop(stdin);

        let status = child.wait()?;
        if !status.success() {
            return Err(LoadError::HelperFailed(status));
        }
        Ok(())
    }
}

impl Drop for InterpreterLoader {
    fn drop(&mut self) {
        if let Some(helper) = &mut self.helper {
            let _ = helper.child.kill();
            let _ = helper.child.wait();
        }
    }
}
