//! QML type stub generator library
//!
//! Incrementally generates `qmltyperegistrar` inputs for PySide6 projects:
//! - Module snapshot storage (metadata.json)
//! - Import dependency tracing
//! - Dirty module detection over the traced dependency graph
//! - Reconciliation of a run (reimport, fold, persist)
//! - Descriptor files, qmldir files and registrar invocation

pub mod artifacts;
pub mod config;
pub mod descriptor;
pub mod dirty;
pub mod discover;
pub mod loader;
pub mod metadata;
pub mod naming;
pub mod reconcile;
pub mod registrar;
pub mod tracer;

pub use artifacts::{ArtifactError, ArtifactReport, ArtifactUpdater};
pub use config::{ConfigError, StubgenConfig, CONFIG_FILE};
pub use descriptor::{
    ClassDescriptor, DescriptorError, ModuleDescriptor, QmlModuleKey, Registration,
};
pub use dirty::{detect_dirty_files, DirtyFile, DirtyReason, DirtySet, Dirtiness};
pub use discover::{discover_sources, DiscoverError};
pub use loader::{InterpreterLoader, LoadError, LoadedModule, ModuleLoader};
pub use metadata::{MetadataError, ModuleRecord, Snapshot, GENERATING_VERSION};
pub use naming::{ModuleNamer, NamingError, SearchRootNamer};
pub use reconcile::{ReconcileError, Reconciler, RunReport};
pub use registrar::{detect_metatypes_dir, detect_registrar_path, Registrar, RegistrarError};
pub use tracer::DependencyTracer;
