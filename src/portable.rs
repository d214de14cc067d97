//! Cross-platform jar copy (`compilePluginJar`).

use std::fs;

use tracing::{info, warn};

use crate::cache::{Fingerprint, StageCache};
use crate::descriptor::{PluginClassFile, PluginDescriptor};
use crate::error::{Error, Result};
use crate::lifecycle::{Stage, StageState};
use crate::project::PackagingUnit;

/// The `compilePluginJar` stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompilePluginJarTask;

impl CompilePluginJarTask {
    /// Create the stage.
    pub fn new() -> Self {
        Self
    }

    /// Copy the linked jar next to the archive when the unit is
    /// cross-platform, recording its size. Units that are not cross-platform
    /// return before touching the filesystem.
    pub fn run(
        &self,
        unit: &PackagingUnit,
        descriptor: &PluginDescriptor,
        cache: &StageCache,
    ) -> Result<StageState> {
        if !unit.is_cross_platform() {
            return Ok(StageState::Skipped);
        }

        descriptor.resolve_entry_class(&PluginClassFile::new(unit.paths().plugin_class()))?;

        let target = unit.paths().portable_jar(unit.module());
        let source = match unit.linked_jar().filter(|p| p.is_file()) {
            Some(source) => source,
            None => {
                warn!(
                    "{}: could not find JAR file{}",
                    unit.module(),
                    unit.linked_jar()
                        .map(|p| format!(" at {}", p.display()))
                        .unwrap_or_default()
                );
                if target.is_file() {
                    fs::remove_file(&target).map_err(|e| Error::io(&target, e))?;
                }
                cache.invalidate(Stage::CompilePluginJar.name())?;
                return Ok(StageState::Skipped);
            }
        };

        let fingerprint = Fingerprint::new(Stage::CompilePluginJar.name())
            .file(&source)?
            .finish();
        if cache.is_up_to_date(Stage::CompilePluginJar.name(), &fingerprint, &[target.clone()]) {
            let size = fs::metadata(&target).map_err(|e| Error::io(&target, e))?.len();
            descriptor.set_jar_file_size(size);
            return Ok(StageState::UpToDate);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::copy(&source, &target).map_err(|e| Error::io(&target, e))?;
        let size = fs::metadata(&source).map_err(|e| Error::io(&source, e))?.len();
        descriptor.set_jar_file_size(size);

        info!("Made cross-platform package at {}", target.display());
        cache.record(Stage::CompilePluginJar.name(), fingerprint)?;
        Ok(StageState::Executed)
    }
}
