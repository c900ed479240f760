//! Import dependency tracing
//!
//! Records, for every module executing an import, which modules that import
//! pulled in. The tracer is an explicit context object: the reconciliation
//! driver starts a session, hands the tracer to the loader by `&mut`, and
//! stops it once all dirty modules are imported.

use std::collections::{BTreeMap, BTreeSet};

/// Dependency edges observed during import sessions
#[derive(Debug, Default)]
pub struct DependencyTracer {
    /// Importing module -> modules it loaded
    edges: BTreeMap<String, BTreeSet<String>>,
    /// Whether a session is currently open
    active: bool,
}

impl DependencyTracer {
    /// Create a new tracer with no open session
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a tracing session
    pub fn start(&mut self) {
        self.active = true;
    }

    /// Close the current session; later events are ignored
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Check if a session is open
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record one import event
    ///
    /// `caller` is the module executing the import (`None` when the import
    /// happened outside any module, in which case nothing is recorded).
    /// `module` is the module that was loaded and `reexports` are the names
    /// pulled from it that are themselves modules (`from pkg import sub`).
    pub fn record_import<S: AsRef<str>>(
        &mut self,
        caller: Option<&str>,
        module: &str,
        reexports: &[S],
    ) {
        if !self.active {
            return;
        }
        let Some(caller) = caller else {
            return;
        };

        let deps = self.edges.entry(caller.to_string()).or_default();
        deps.insert(module.to_string());
        for name in reexports {
            deps.insert(name.as_ref().to_string());
        }
    }

    /// Modules a given module was observed to load
    pub fn dependencies_of(&self, module: &str) -> BTreeSet<String> {
        self.edges.get(module).cloned().unwrap_or_default()
    }

    /// All recorded edges
    pub fn edges(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.edges
    }
}
