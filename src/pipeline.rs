//! Per-unit stage graph execution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::archive::MakeArchiveTask;
use crate::audit::{EnsureJarCompatibilityTask, Jdeps, ModuleAnalyzer};
use crate::cache::StageCache;
use crate::compiler::{CompileDexTask, D8Converter, DexConverter};
use crate::config::PackagerConfig;
use crate::descriptor::PluginDescriptor;
use crate::error::{Error, Result};
use crate::lifecycle::{BuildHooks, Stage, StageState};
use crate::manifest::MakeManifestTask;
use crate::portable::CompilePluginJarTask;
use crate::project::PackagingUnit;
use crate::registry::{ArchiveRecord, ArchiveRegistry};
use crate::resources::{Aapt2, CompileResourcesTask, ResourceCompiler};
use crate::scanner::AnnotationScanner;
use crate::sdk::AndroidSdk;
use crate::tools;

/// External collaborators used by the stages.
#[derive(Debug, Clone)]
pub struct Toolchain {
    converter: Arc<dyn DexConverter>,
    analyzer: Arc<dyn ModuleAnalyzer>,
    resources: Arc<dyn ResourceCompiler>,
}

impl Toolchain {
    /// Assemble a toolchain from explicit implementations.
    pub fn new(
        converter: Arc<dyn DexConverter>,
        analyzer: Arc<dyn ModuleAnalyzer>,
        resources: Arc<dyn ResourceCompiler>,
    ) -> Self {
        Self {
            converter,
            analyzer,
            resources,
        }
    }

    /// The command-line tools, located through the packager configuration,
    /// the unit's SDK and `JAVA_HOME`, falling back to `PATH`.
    pub fn resolve(config: &PackagerConfig, sdk: &dyn AndroidSdk) -> Self {
        let build_tools = sdk.build_tools_dir();
        let java_bin = std::env::var_os("JAVA_HOME").map(|home| PathBuf::from(home).join("bin"));

        let d8 = tools::resolve(config.tools.d8.as_deref(), build_tools.as_deref(), "d8");
        let aapt2 = tools::resolve(config.tools.aapt2.as_deref(), build_tools.as_deref(), "aapt2");
        let jdeps = tools::resolve(config.tools.jdeps.as_deref(), java_bin.as_deref(), "jdeps");
        debug!(
            "Using d8 {}, aapt2 {}, jdeps {}",
            d8.display(),
            aapt2.display(),
            jdeps.display()
        );

        Self::new(
            Arc::new(D8Converter::new(d8)),
            Arc::new(Jdeps::new(jdeps)),
            Arc::new(Aapt2::new(aapt2)),
        )
    }

    /// Dex converter.
    pub fn converter(&self) -> &dyn DexConverter {
        self.converter.as_ref()
    }

    /// Module analyzer.
    pub fn analyzer(&self) -> &dyn ModuleAnalyzer {
        self.analyzer.as_ref()
    }

    /// Resource compiler.
    pub fn resources(&self) -> &dyn ResourceCompiler {
        self.resources.as_ref()
    }
}

/// A failure attributed to a stage, or to preflight when `stage` is `None`.
#[derive(Debug)]
pub struct UnitFailure {
    /// Failing stage.
    pub stage: Option<Stage>,
    /// The error.
    pub error: Error,
}

/// Outcome of packaging one unit.
#[derive(Debug)]
pub struct UnitReport {
    /// Unit module name (or directory for units that failed to load).
    pub module: String,
    /// Unit directory.
    pub dir: PathBuf,
    /// Final state per stage.
    pub states: BTreeMap<Stage, StageState>,
    /// Every failure, in the order observed.
    pub failures: Vec<UnitFailure>,
    /// Entry class, if one was known by the end of the run.
    pub entry_class: Option<String>,
    /// Produced archive.
    pub archive: Option<PathBuf>,
}

impl UnitReport {
    /// A unit that never reached its first stage.
    pub fn preflight_failed(module: impl Into<String>, dir: impl Into<PathBuf>, error: Error) -> Self {
        Self {
            module: module.into(),
            dir: dir.into(),
            states: Stage::ALL.iter().map(|s| (*s, StageState::Blocked)).collect(),
            failures: vec![UnitFailure { stage: None, error }],
            entry_class: None,
            archive: None,
        }
    }

    /// Whether every stage succeeded.
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    /// State of a stage.
    pub fn state(&self, stage: Stage) -> Option<StageState> {
        self.states.get(&stage).copied()
    }

    /// Number of stages that did work this run.
    pub fn stages_run(&self) -> usize {
        self.states.values().filter(|s| s.did_work()).count()
    }

    /// First recorded error.
    pub fn first_error(&self) -> Option<&Error> {
        self.failures.first().map(|f| &f.error)
    }
}

/// Runs the fixed stage graph for one unit.
pub struct UnitPipeline<'a> {
    unit: &'a PackagingUnit,
    config: &'a PackagerConfig,
    toolchain: &'a Toolchain,
    hooks: &'a BuildHooks,
}

struct RunState {
    states: Mutex<BTreeMap<Stage, StageState>>,
    failures: Mutex<Vec<UnitFailure>>,
}

impl<'a> UnitPipeline<'a> {
    /// Create a pipeline.
    pub fn new(
        unit: &'a PackagingUnit,
        config: &'a PackagerConfig,
        toolchain: &'a Toolchain,
        hooks: &'a BuildHooks,
    ) -> Self {
        Self {
            unit,
            config,
            toolchain,
            hooks,
        }
    }

    /// Execute every stage, appending the archive to `registry` on success.
    /// Record paths are made relative to `root`.
    pub fn run(&self, registry: &ArchiveRegistry, root: &Path) -> UnitReport {
        let unit = self.unit;
        let descriptor = PluginDescriptor::new();
        let cache = StageCache::load(unit.paths().stage_cache(), !self.config.rerun_tasks);
        let run = RunState {
            states: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(Vec::new()),
        };

        let scanner = AnnotationScanner::new(self.config.marker.clone());
        self.step(&run, Stage::CompileDex, || {
            CompileDexTask::new(self.toolchain.converter(), scanner).run(unit, &descriptor, &cache)
        });

        std::thread::scope(|scope| {
            scope.spawn(|| {
                self.step(&run, Stage::CompilePluginJar, || {
                    CompilePluginJarTask::new().run(unit, &descriptor, &cache)
                });
                self.step(&run, Stage::EnsureJarCompatibility, || {
                    EnsureJarCompatibilityTask::new(
                        self.toolchain.analyzer(),
                        self.config.restricted_prefix.clone(),
                    )
                    .run(unit, &cache)
                });
            });

            self.step(&run, Stage::CompileResources, || {
                CompileResourcesTask::new(self.toolchain.resources()).run(unit, &descriptor, &cache)
            });
            self.step(&run, Stage::Manifest, || {
                MakeManifestTask::new(self.config.require_entry_class).run(unit, &descriptor)
            });
        });

        self.step(&run, Stage::Make, || MakeArchiveTask::new().run(unit, &descriptor, &cache));
        self.step(&run, Stage::Register, || {
            registry.append(ArchiveRecord::from_unit(unit, &descriptor, root));
            Ok(StageState::Executed)
        });

        let states = run.states.into_inner();
        let failures = run.failures.into_inner();
        let archive = states
            .get(&Stage::Make)
            .filter(|s| matches!(s, StageState::Executed | StageState::UpToDate))
            .map(|_| unit.paths().archive(unit.module()));

        self.hooks.emit_unit_finished(unit.module(), failures.is_empty());
        UnitReport {
            module: unit.module().to_string(),
            dir: unit.dir().to_path_buf(),
            states,
            failures,
            entry_class: descriptor.entry_class(),
            archive,
        }
    }

    fn step<F>(&self, run: &RunState, stage: Stage, action: F)
    where
        F: FnOnce() -> Result<StageState>,
    {
        let module = self.unit.module();
        let blocked = {
            let states = run.states.lock();
            stage.dependencies().iter().any(|dep| {
                !states
                    .get(dep)
                    .map(StageState::allows_dependents)
                    .unwrap_or(false)
            })
        };

        let state = if blocked {
            debug!("{}: {} blocked by a failed dependency", module, stage);
            StageState::Blocked
        } else {
            self.hooks.emit_stage_started(module, stage);
            match action() {
                Ok(state) => state,
                Err(e) => {
                    error!("{}: {} failed: {}", module, stage, e);
                    run.failures.lock().push(UnitFailure {
                        stage: Some(stage),
                        error: e,
                    });
                    StageState::Failed
                }
            }
        };

        debug!("{}: {} {}", module, stage, state);
        run.states.lock().insert(stage, state);
        self.hooks.emit_stage_finished(module, stage, state);
    }
}
