//! Shared fixtures: a scratch project on disk and an in-memory loader over it

#![allow(dead_code)]

use qml_stubgen::{
    ArtifactUpdater, ClassDescriptor, DependencyTracer, LoadError, LoadedModule, ModuleDescriptor, ModuleLoader,
    QmlModuleKey, ReconcileError, Reconciler, Registrar, Registration, RunReport, SearchRootNamer,
    StubgenConfig,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// How a module behaves when imported
#[derive(Debug, Clone, Default)]
pub struct FakeModule {
    pub file: Option<PathBuf>,
    pub imports: Vec<String>,
    pub fails: bool,
    pub registrations: Vec<Registration>,
}

/// Loader that "executes" modules from a table, like a fresh interpreter
///
/// Executing a module imports each of its dependencies in turn; every import
/// statement is reported to the tracer, even for modules already loaded.
pub struct FakeLoader {
    table: BTreeMap<String, FakeModule>,
    loaded: BTreeMap<String, Option<PathBuf>>,
    registrations: Vec<Registration>,
    /// Modules in the order they were executed
    pub executed: Vec<String>,
}

impl FakeLoader {
    pub fn new(table: BTreeMap<String, FakeModule>) -> Self {
        Self {
            table,
            loaded: BTreeMap::new(),
            registrations: Vec::new(),
            executed: Vec::new(),
        }
    }

    fn execute(&mut self, name: &str, tracer: &mut DependencyTracer) -> Result<(), LoadError> {
        if self.loaded.contains_key(name) {
            return Ok(());
        }
        let module = self
            .table
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::ImportFailed {
                module: name.to_string(),
                message: format!("No module named '{}'", name),
            })?;

        self.loaded.insert(name.to_string(), module.file.clone());
        self.executed.push(name.to_string());

        for dep in &module.imports {
            tracer.record_import::<&str>(Some(name), dep, &[]);
            self.execute(dep, tracer)?;
        }
        if module.fails {
            self.loaded.remove(name);
            return Err(LoadError::ImportFailed {
                module: name.to_string(),
                message: "RuntimeError: boom".to_string(),
            });
        }
        self.registrations.extend(module.registrations);
        Ok(())
    }
}

impl ModuleLoader for FakeLoader {
    fn import(
        &mut self,
        module: &str,
        tracer: &mut DependencyTracer,
    ) -> Result<LoadedModule, LoadError> {
        self.execute(module, tracer)?;
        self.loaded(module).ok_or_else(|| LoadError::ImportFailed {
            module: module.to_string(),
            message: "module vanished".to_string(),
        })
    }

    fn loaded(&self, module: &str) -> Option<LoadedModule> {
        self.loaded.get(module).map(|file| LoadedModule {
            name: module.to_string(),
            file: file.clone(),
        })
    }

    fn loaded_files(&self) -> BTreeSet<PathBuf> {
        self.loaded.values().flatten().cloned().collect()
    }

    fn take_registrations(&mut self) -> Vec<Registration> {
        std::mem::take(&mut self.registrations)
    }
}

/// A scratch project: sources under `src/`, outside libraries under `lib/`,
/// output under `out/`
pub struct Project {
    _temp: TempDir,
    pub root: PathBuf,
    pub src: PathBuf,
    pub lib: PathBuf,
    pub out: PathBuf,
    pub modules: BTreeMap<String, FakeModule>,
}

impl Project {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let src = root.join("src");
        let lib = root.join("lib");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&lib).unwrap();

        Self {
            _temp: temp,
            out: root.join("out"),
            root,
            src,
            lib,
            modules: BTreeMap::new(),
        }
    }

    /// Add a scanned source module importing `imports`
    pub fn add(&mut self, name: &str, imports: &[&str]) -> PathBuf {
        let path = self.src.join(format!("{}.py", name));
        self.add_at(name, path, imports)
    }

    /// Add a module that lives outside the scanned directories
    pub fn add_library(&mut self, name: &str, imports: &[&str]) -> PathBuf {
        let path = self.lib.join(format!("{}.py", name));
        self.add_at(name, path, imports)
    }

    /// Add a module without a backing file
    pub fn add_builtin(&mut self, name: &str) {
        self.modules.insert(name.to_string(), FakeModule::default());
    }

    fn add_at(&mut self, name: &str, path: PathBuf, imports: &[&str]) -> PathBuf {
        fs::write(&path, format!("# {}\n", name)).unwrap();
        self.modules.insert(
            name.to_string(),
            FakeModule {
                file: Some(path.clone()),
                imports: imports.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        );
        path
    }

    pub fn module_mut(&mut self, name: &str) -> &mut FakeModule {
        self.modules.get_mut(name).unwrap()
    }

    /// Delete a module's file and forget it
    pub fn remove(&mut self, name: &str) {
        if let Some(FakeModule {
            file: Some(path), ..
        }) = self.modules.remove(name)
        {
            fs::remove_file(path).unwrap();
        }
    }

    /// Move a module's mtime forward
    pub fn touch(&self, name: &str) {
        let path = self.modules[name].file.as_ref().unwrap();
        let mtime = fs::metadata(path).unwrap().modified().unwrap();
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(mtime + Duration::from_secs(5)).unwrap();
    }

    /// Register a QML class from `module` under `uri 1.0`
    pub fn register(&mut self, module: &str, uri: &str, class_name: &str) {
        let file = self.modules[module].file.clone().unwrap();
        let registration = Registration {
            key: QmlModuleKey::new(uri, 1, 0),
            module: descriptor(class_name, &file),
        };
        self.module_mut(module).registrations.push(registration);
    }

    pub fn config(&self) -> StubgenConfig {
        StubgenConfig {
            in_dirs: vec![self.src.clone()],
            out_dir: self.out.clone(),
            search_roots: vec![self.src.clone(), self.lib.clone()],
            ..Default::default()
        }
    }

    /// Run with the default config, returning the report and executed modules
    pub fn run(&self) -> Result<(RunReport, Vec<String>), ReconcileError> {
        self.run_with(&self.config())
    }

    pub fn run_with(
        &self,
        config: &StubgenConfig,
    ) -> Result<(RunReport, Vec<String>), ReconcileError> {
        let namer = SearchRootNamer::new(config.search_roots.clone());
        let mut reconciler = Reconciler::new(config, namer, FakeLoader::new(self.modules.clone()));
        let result = reconciler.run();
        let executed = reconciler.loader().executed.clone();
        result.map(|report| (report, executed))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.out.join("metadata.json")
    }
}

/// Stand-ins for the Qt installation: a metatypes directory and a
/// qmltyperegistrar script that logs its arguments
#[cfg(unix)]
pub struct QtTools {
    pub metatypes: PathBuf,
    pub registrar: PathBuf,
    pub log: PathBuf,
}

#[cfg(unix)]
impl QtTools {
    pub fn install(root: &Path) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let metatypes = root.join("metatypes");
        fs::create_dir_all(&metatypes).unwrap();
        fs::write(metatypes.join("qt6core_metatypes.json"), "[]").unwrap();

        let log = root.join("registrar.log");
        let registrar = root.join("qmltyperegistrar");
        fs::write(
            &registrar,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\n", log.display()),
        )
        .unwrap();
        let mut perms = fs::metadata(&registrar).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&registrar, perms).unwrap();

        Self {
            metatypes,
            registrar,
            log,
        }
    }

    pub fn updater(&self, out: &Path, file_relative_path: Option<PathBuf>) -> ArtifactUpdater {
        ArtifactUpdater::new(
            out.to_path_buf(),
            self.metatypes.clone(),
            Registrar::new(self.registrar.clone()),
            file_relative_path,
        )
    }

    /// Argument lines of every registrar invocation so far
    pub fn registrar_runs(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// A single-class descriptor registered from `input_file`
pub fn descriptor(class_name: &str, input_file: &Path) -> ModuleDescriptor {
    ModuleDescriptor {
        classes: vec![ClassDescriptor {
            class_name: class_name.to_string(),
            qualified_class_name: class_name.to_string(),
            object: true,
            super_classes: Vec::new(),
            class_infos: Vec::new(),
            enums: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
            slots: Vec::new(),
        }],
        output_revision: 68,
        major_version: 1,
        minor_version: 0,
        qt_modules: vec!["QtCore".to_string()],
        py_modules: Vec::new(),
        input_file: input_file.display().to_string(),
    }
}
