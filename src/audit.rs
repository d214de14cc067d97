//! Module dependency audit of the cross-platform jar
//! (`ensureJarCompatibility`).

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::cache::{Fingerprint, StageCache};
use crate::error::{Error, Result};
use crate::lifecycle::{Stage, StageState};
use crate::project::PackagingUnit;

/// Result of running a module analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerOutput {
    /// Captured standard output: the dependency report.
    pub report: String,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
}

/// Reports the platform modules a jar depends on.
pub trait ModuleAnalyzer: Debug + Send + Sync {
    /// Analyze `jar`. Only a failure to run the analyzer is an error.
    fn analyze(&self, jar: &Path) -> Result<AnalyzerOutput>;
}

/// Analyzer backed by `jdeps --print-module-deps`.
#[derive(Debug, Clone)]
pub struct Jdeps {
    program: PathBuf,
}

impl Jdeps {
    /// Use the given `jdeps` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ModuleAnalyzer for Jdeps {
    fn analyze(&self, jar: &Path) -> Result<AnalyzerOutput> {
        debug!("Running {} --print-module-deps {}", self.program.display(), jar.display());
        let output = Command::new(&self.program)
            .arg("--print-module-deps")
            .arg(jar)
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| Error::tool(self.program.display().to_string(), e.to_string()))?;

        Ok(AnalyzerOutput {
            report: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Verdict on an analyzer report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// No restricted modules.
    Clean,
    /// Empty report; nothing can be concluded.
    Inconclusive,
    /// The restricted prefix appears in the report.
    Forbidden,
}

/// Classify a report. It is trimmed first; any occurrence of the prefix
/// counts.
pub fn check_report(report: &str, restricted_prefix: &str) -> AuditOutcome {
    let report = report.trim();
    if report.is_empty() {
        AuditOutcome::Inconclusive
    } else if report.contains(restricted_prefix) {
        AuditOutcome::Forbidden
    } else {
        AuditOutcome::Clean
    }
}

/// The `ensureJarCompatibility` stage.
#[derive(Debug)]
pub struct EnsureJarCompatibilityTask<'a> {
    analyzer: &'a dyn ModuleAnalyzer,
    restricted_prefix: String,
}

impl<'a> EnsureJarCompatibilityTask<'a> {
    /// Create the stage.
    pub fn new(analyzer: &'a dyn ModuleAnalyzer, restricted_prefix: impl Into<String>) -> Self {
        Self {
            analyzer,
            restricted_prefix: restricted_prefix.into(),
        }
    }

    /// Audit the unit's cross-platform jar.
    pub fn run(&self, unit: &PackagingUnit, cache: &StageCache) -> Result<StageState> {
        if !unit.is_cross_platform() {
            return Ok(StageState::Skipped);
        }

        let jar = unit.paths().portable_jar(unit.module());
        if !jar.is_file() {
            warn!(
                "{}: cross-platform jar {} is missing, skipping compatibility check",
                unit.module(),
                jar.display()
            );
            return Ok(StageState::Skipped);
        }

        let report_path = unit.paths().jdeps_output();
        let fingerprint = Fingerprint::new(Stage::EnsureJarCompatibility.name())
            .value("prefix", &self.restricted_prefix)
            .file(&jar)?
            .finish();
        if cache.is_up_to_date(
            Stage::EnsureJarCompatibility.name(),
            &fingerprint,
            &[report_path.clone()],
        ) {
            return Ok(StageState::UpToDate);
        }

        let output = self.analyzer.analyze(&jar)?;
        fs::write(&report_path, &output.report).map_err(|e| Error::io(&report_path, e))?;

        match check_report(&output.report, &self.restricted_prefix) {
            AuditOutcome::Inconclusive => {
                let status = output
                    .exit_code
                    .filter(|code| *code != 0)
                    .map(|code| format!(" (analyzer exited with {})", code))
                    .unwrap_or_default();
                warn!(
                    "No output from the module analyzer{}: cannot analyze jar file {} for forbidden imports",
                    status,
                    jar.display()
                );
            }
            AuditOutcome::Forbidden => {
                cache.invalidate(Stage::EnsureJarCompatibility.name())?;
                return Err(Error::forbidden_imports(&jar, self.restricted_prefix.clone()));
            }
            AuditOutcome::Clean => {
                info!(
                    "SUCCESS: the cross-platform jar {} does not contain '{}' imports",
                    jar.display(),
                    self.restricted_prefix
                );
            }
        }

        cache.record(Stage::EnsureJarCompatibility.name(), fingerprint)?;
        Ok(StageState::Executed)
    }
}
