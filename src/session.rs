//! A packaging session: every requested unit, then the aggregate index.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{error, info};

use crate::config::PackagerConfig;
use crate::error::Result;
use crate::lifecycle::{BuildEvent, BuildHooks};
use crate::pipeline::{Toolchain, UnitPipeline, UnitReport};
use crate::project::{discover_units, PackagingUnit, ProjectLoader};
use crate::registry::{index_path, ArchiveRegistry};

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    /// Per-unit reports, sorted by unit directory.
    pub units: Vec<UnitReport>,
    /// Aggregate index location.
    pub index: PathBuf,
    /// Records written to the index.
    pub records: usize,
}

impl SessionReport {
    /// Whether every unit succeeded.
    pub fn success(&self) -> bool {
        self.units.iter().all(UnitReport::success)
    }

    /// Units with at least one failure.
    pub fn failed_units(&self) -> Vec<&UnitReport> {
        self.units.iter().filter(|u| !u.success()).collect()
    }

    /// Report for a module.
    pub fn unit(&self, module: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.module == module)
    }
}

/// Packages units concurrently and owns the session's archive registry.
pub struct PackagingSession {
    root: PathBuf,
    config: PackagerConfig,
    loader: ProjectLoader,
    toolchain: Option<Toolchain>,
    registry: ArchiveRegistry,
    hooks: Arc<RwLock<BuildHooks>>,
}

impl PackagingSession {
    /// Create a session rooted at `root`; the index is written below it.
    pub fn new(root: impl Into<PathBuf>, config: PackagerConfig) -> Self {
        Self {
            root: root.into(),
            loader: ProjectLoader::new(config.clone()),
            config,
            toolchain: None,
            registry: ArchiveRegistry::new(),
            hooks: Arc::new(RwLock::new(BuildHooks::new())),
        }
    }

    /// Use fixed tool implementations instead of resolving them per unit.
    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    /// Session root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Packager configuration.
    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    /// Archive registry.
    pub fn registry(&self) -> &ArchiveRegistry {
        &self.registry
    }

    /// Add a build event handler.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&BuildEvent) + Send + Sync + 'static,
    {
        self.hooks.write().on_event(handler);
    }

    /// Load a unit with this session's configuration.
    pub fn load_unit(&self, dir: &Path) -> Result<PackagingUnit> {
        self.loader.load(dir)
    }

    /// Package every unit found under the root.
    pub fn run_all(&self) -> Result<SessionReport> {
        let units = discover_units(&self.root)?;
        self.run(&units)
    }

    /// Package the given unit directories, then write the aggregate index.
    ///
    /// Unit failures are reported, not returned; only failing to write the
    /// index is an error.
    pub fn run(&self, unit_dirs: &[PathBuf]) -> Result<SessionReport> {
        let reports: DashMap<PathBuf, UnitReport> = DashMap::new();
        let hooks = self.hooks.read();

        std::thread::scope(|scope| {
            for dir in unit_dirs {
                let reports = &reports;
                let hooks = &*hooks;
                scope.spawn(move || {
                    let report = self.run_unit(dir, hooks);
                    reports.insert(dir.clone(), report);
                });
            }
        });

        let index = index_path(&self.root, &self.config.build_dir, &self.config.index_file);
        let records = self.registry.write_index(&index)?;
        hooks.emit_index_written(index.clone(), records);

        let mut units: Vec<UnitReport> = reports.into_iter().map(|(_, report)| report).collect();
        units.sort_by(|a, b| a.dir.cmp(&b.dir));

        let failed = units.iter().filter(|u| !u.success()).count();
        let stages_run: usize = units.iter().map(UnitReport::stages_run).sum();
        info!(
            "Packaged {} of {} units, {} stages run",
            units.len() - failed,
            units.len(),
            stages_run
        );
        Ok(SessionReport {
            units,
            index,
            records,
        })
    }

    fn run_unit(&self, dir: &Path, hooks: &BuildHooks) -> UnitReport {
        let fallback_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        let unit = match self.loader.load(dir).and_then(|unit| {
            unit.preflight()?;
            Ok(unit)
        }) {
            Ok(unit) => unit,
            Err(e) => {
                error!("{}: {}", fallback_name, e);
                hooks.emit_unit_finished(&fallback_name, false);
                return UnitReport::preflight_failed(fallback_name, dir, e);
            }
        };

        let toolchain = match &self.toolchain {
            Some(toolchain) => toolchain.clone(),
            None => Toolchain::resolve(&self.config, unit.sdk()),
        };

        UnitPipeline::new(&unit, &self.config, &toolchain, hooks).run(&self.registry, &self.root)
    }
}

impl std::fmt::Debug for PackagingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagingSession")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("records", &self.registry.len())
            .finish()
    }
}
