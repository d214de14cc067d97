//! Device deployment (`deployWithAdb`).

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::PackagerConfig;
use crate::error::{Error, Result};
use crate::project::PackagingUnit;
use crate::tools;

/// Transfers files to a connected device.
pub trait DeviceBridge: Debug + Send + Sync {
    /// Copy `local` into the device directory `remote_dir`.
    fn push(&self, local: &Path, remote_dir: &str) -> Result<()>;
}

/// Bridge backed by `adb push`.
#[derive(Debug, Clone)]
pub struct Adb {
    program: PathBuf,
}

impl Adb {
    /// Use the given `adb` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Configured adb, else the unit SDK's.
    pub fn for_unit(config: &PackagerConfig, unit: &PackagingUnit) -> Result<Self> {
        match &config.tools.adb {
            Some(adb) => Ok(Self::new(adb)),
            None => Ok(Self::new(unit.sdk().adb()?)),
        }
    }
}

impl DeviceBridge for Adb {
    fn push(&self, local: &Path, remote_dir: &str) -> Result<()> {
        let args = vec!["push".to_string(), tools::arg(local), remote_dir.to_string()];
        let output = tools::run(&self.program, &args)?;
        if !output.status.success() {
            return Err(Error::Deploy(format!(
                "{} push {} exited with {}: {}",
                self.program.display(),
                local.display(),
                output.status,
                tools::stderr_text(&output)
            )));
        }
        Ok(())
    }
}

/// Push a unit's archive to the device plugin directory.
pub fn deploy(bridge: &dyn DeviceBridge, archive: &Path, device_dir: &str) -> Result<()> {
    if !archive.is_file() {
        return Err(Error::Deploy(format!(
            "archive {} does not exist; run make first",
            archive.display()
        )));
    }
    bridge.push(archive, device_dir)?;
    info!("Deployed {} to {}", archive.display(), device_dir);
    Ok(())
}
