//! Stage identities, outcomes and build event hooks.

use std::path::PathBuf;
use std::time::Instant;

/// Stages of the per-unit pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Bytecode to dex conversion plus entry-class discovery.
    CompileDex,
    /// Cross-platform jar copy.
    CompilePluginJar,
    /// Module dependency audit of the cross-platform jar.
    EnsureJarCompatibility,
    /// Resource compilation and linking.
    CompileResources,
    /// Manifest assembly.
    Manifest,
    /// Archive assembly.
    Make,
    /// Registry append.
    Register,
}

impl Stage {
    /// Every stage in dependency order.
    pub const ALL: [Stage; 7] = [
        Stage::CompileDex,
        Stage::CompilePluginJar,
        Stage::EnsureJarCompatibility,
        Stage::CompileResources,
        Stage::Manifest,
        Stage::Make,
        Stage::Register,
    ];

    /// Stable name used in logs and the stage cache.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CompileDex => "compileDex",
            Self::CompilePluginJar => "compilePluginJar",
            Self::EnsureJarCompatibility => "ensureJarCompatibility",
            Self::CompileResources => "compileResources",
            Self::Manifest => "manifest",
            Self::Make => "make",
            Self::Register => "register",
        }
    }

    /// Stages that must succeed before this one starts.
    pub fn dependencies(&self) -> &'static [Stage] {
        match self {
            Self::CompileDex => &[],
            Self::CompilePluginJar => &[Stage::CompileDex],
            Self::EnsureJarCompatibility => &[Stage::CompilePluginJar],
            Self::CompileResources => &[Stage::CompileDex],
            Self::Manifest => &[Stage::CompileDex, Stage::CompileResources],
            Self::Make => &[
                Stage::CompileDex,
                Stage::EnsureJarCompatibility,
                Stage::CompileResources,
                Stage::Manifest,
            ],
            Self::Register => &[Stage::Make],
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageState {
    /// The stage ran and succeeded.
    Executed,
    /// Inputs unchanged and outputs present; the stage did not run.
    UpToDate,
    /// The stage had no inputs.
    NoSource,
    /// Not applicable for this unit (feature off or optional input missing).
    Skipped,
    /// A dependency failed; the stage never started.
    Blocked,
    /// The stage ran and failed.
    Failed,
}

impl StageState {
    /// Whether dependents may run.
    pub fn allows_dependents(&self) -> bool {
        !matches!(self, Self::Blocked | Self::Failed)
    }

    /// Whether the stage did work this run.
    pub fn did_work(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed)
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Executed => "executed",
            Self::UpToDate => "up-to-date",
            Self::NoSource => "no-source",
            Self::Skipped => "skipped",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Event delivered to build hooks.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// A stage is about to run.
    StageStarted {
        /// Unit module name.
        unit: String,
        /// Stage.
        stage: Stage,
        /// Start time.
        at: Instant,
    },
    /// A stage reached a final state.
    StageFinished {
        /// Unit module name.
        unit: String,
        /// Stage.
        stage: Stage,
        /// Outcome.
        state: StageState,
        /// Finish time.
        at: Instant,
    },
    /// All stages of a unit are done.
    UnitFinished {
        /// Unit module name.
        unit: String,
        /// Whether no stage failed.
        success: bool,
        /// Finish time.
        at: Instant,
    },
    /// The aggregate index was written.
    IndexWritten {
        /// Index location.
        path: PathBuf,
        /// Number of records.
        records: usize,
        /// Write time.
        at: Instant,
    },
}

impl BuildEvent {
    /// Unit the event belongs to, if any.
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::StageStarted { unit, .. }
            | Self::StageFinished { unit, .. }
            | Self::UnitFinished { unit, .. } => Some(unit),
            Self::IndexWritten { .. } => None,
        }
    }

    /// Event timestamp.
    pub fn timestamp(&self) -> Instant {
        match self {
            Self::StageStarted { at, .. }
            | Self::StageFinished { at, .. }
            | Self::UnitFinished { at, .. }
            | Self::IndexWritten { at, .. } => *at,
        }
    }

    /// Event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StageStarted { .. } => "stage-started",
            Self::StageFinished { .. } => "stage-finished",
            Self::UnitFinished { .. } => "unit-finished",
            Self::IndexWritten { .. } => "index-written",
        }
    }
}

/// Callbacks notified as the build progresses. Handlers run on the thread
/// that produced the event.
pub struct BuildHooks {
    handlers: Vec<Box<dyn Fn(&BuildEvent) + Send + Sync>>,
}

impl BuildHooks {
    /// Create empty hooks.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(&BuildEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Deliver an event to every handler.
    pub fn emit(&self, event: BuildEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }

    /// Emit a stage-started event.
    pub fn emit_stage_started(&self, unit: &str, stage: Stage) {
        self.emit(BuildEvent::StageStarted {
            unit: unit.to_string(),
            stage,
            at: Instant::now(),
        });
    }

    /// Emit a stage-finished event.
    pub fn emit_stage_finished(&self, unit: &str, stage: Stage, state: StageState) {
        self.emit(BuildEvent::StageFinished {
            unit: unit.to_string(),
            stage,
            state,
            at: Instant::now(),
        });
    }

    /// Emit a unit-finished event.
    pub fn emit_unit_finished(&self, unit: &str, success: bool) {
        self.emit(BuildEvent::UnitFinished {
            unit: unit.to_string(),
            success,
            at: Instant::now(),
        });
    }

    /// Emit an index-written event.
    pub fn emit_index_written(&self, path: PathBuf, records: usize) {
        self.emit(BuildEvent::IndexWritten {
            path,
            records,
            at: Instant::now(),
        });
    }
}

impl Default for BuildHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BuildHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildHooks")
            .field("handler_count", &self.handlers.len())
            .finish()
    }
}
