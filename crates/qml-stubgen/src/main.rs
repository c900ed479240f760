//! QML type stub generator (qml-stubgen)

use anyhow::Context;
use clap::Parser;
use qml_stubgen::{
    detect_metatypes_dir, detect_registrar_path, ArtifactUpdater, InterpreterLoader, Reconciler,
    Registrar, SearchRootNamer, StubgenConfig,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "qml-stubgen")]
#[command(about = "Generate QML stub files (.qmltypes) from PySide6 modules", long_about = None)]
#[command(version)]
struct Cli {
    /// Directories scanned for source files
    in_dirs: Vec<PathBuf>,

    /// Output directory for stubs and metadata
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Ignore all source files below this path
    #[arg(long)]
    ignore: Vec<PathBuf>,

    /// Directory of the Qt 6 metatype files (detected if not provided)
    #[arg(long)]
    metatypes_dir: Option<PathBuf>,

    /// Path of the qmltyperegistrar tool (detected if not provided)
    #[arg(long = "qmltyperegistrar-path")]
    registrar_path: Option<PathBuf>,

    /// Write input files relative to this directory
    #[arg(long)]
    file_relative_path: Option<PathBuf>,

    /// Python interpreter command line used to import modules
    #[arg(long)]
    interpreter: Option<String>,

    /// Config file (defaults to qml-stubgen.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Discard previous output and regenerate everything
    #[arg(long)]
    force_rebuild: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the config file
    fn apply(self, config: &mut StubgenConfig) {
        if !self.in_dirs.is_empty() {
            config.in_dirs = self.in_dirs;
        }
        if let Some(out_dir) = self.out_dir {
            config.out_dir = out_dir;
        }
        if !self.ignore.is_empty() {
            config.ignore = self.ignore;
        }
        if self.metatypes_dir.is_some() {
            config.metatypes_dir = self.metatypes_dir;
        }
        if self.registrar_path.is_some() {
            config.registrar_path = self.registrar_path;
        }
        if self.file_relative_path.is_some() {
            config.file_relative_path = self.file_relative_path;
        }
        if let Some(interpreter) = self.interpreter {
            config.interpreter = interpreter.split_whitespace().map(str::to_string).collect();
        }
        config.force_rebuild |= self.force_rebuild;
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_level(verbose))
        .with(filter)
        .init();
}

fn write_readme(
    config: &StubgenConfig,
    metatypes_dir: &Path,
    registrar_path: &Path,
) -> std::io::Result<()> {
    let in_dirs = join_display(&config.in_dirs, "");
    let ignore = join_display(&config.ignore, "--ignore ");
    let contents = format!(
        "QML type stubs generated automatically using\n\
         qml-stubgen {} --out-dir {} {} --metatypes-dir {} --qmltyperegistrar-path {}",
        in_dirs,
        config.out_dir.display(),
        ignore,
        metatypes_dir.display(),
        registrar_path.display()
    );
    std::fs::write(config.out_dir.join("README"), contents)
}

fn join_display(paths: &[PathBuf], prefix: &str) -> String {
    paths
        .iter()
        .map(|p| format!("{}{}", prefix, p.display()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = StubgenConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    cli.apply(&mut config);
    config.validate()?;

    let metatypes_dir = match &config.metatypes_dir {
        Some(dir) => dir.clone(),
        None => detect_metatypes_dir()?,
    };
    let registrar_path = match &config.registrar_path {
        Some(path) => path.clone(),
        None => detect_registrar_path()?,
    };

    if config.force_rebuild && config.out_dir.exists() {
        std::fs::remove_dir_all(&config.out_dir).with_context(|| {
            format!("Failed to remove {}", config.out_dir.display())
        })?;
    }
    std::fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("Failed to create {}", config.out_dir.display()))?;
    write_readme(&config, &metatypes_dir, &registrar_path).context("Failed to write README")?;

    let search_path = std::env::join_paths(&config.search_roots)
        .context("Module search roots cannot be joined into a search path")?;
    let loader = InterpreterLoader::python(config.interpreter.clone())
        .with_env("PYTHONPATH", search_path.to_string_lossy());
    let namer = SearchRootNamer::new(config.search_roots.clone());

    tracing::info!("Importing Python modules");
    let mut reconciler = Reconciler::new(&config, namer, loader);
    let report = reconciler.run()?;

    tracing::info!("Generating QML type info for QML modules");
    let all_files: BTreeSet<PathBuf> = report.all_files.iter().cloned().collect();
    let stale_files = report.stale_files();
    let updater = ArtifactUpdater::new(
        config.out_dir.clone(),
        metatypes_dir,
        Registrar::new(registrar_path),
        config.file_relative_path.clone(),
    );
    let artifacts = updater.update(report.registrations, &all_files, &stale_files)?;

    tracing::info!(
        "Done: {} files reimported, {} QML modules regenerated, {} removed",
        report.dirty.dirty_files.len(),
        artifacts.regenerated.len(),
        artifacts.removed.len()
    );

    Ok(())
}
