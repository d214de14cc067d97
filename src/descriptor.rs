//! Per-unit plugin descriptor populated incrementally by the pipeline stages.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
struct DescriptorInner {
    entry_class: Option<String>,
    jar_file_size: Option<u64>,
    file_size: Option<u64>,
}

/// Values discovered about a packaging unit while it builds.
///
/// Each field has a single writing stage. The entry class can be set at most
/// once; a second attempt is a multiplicity violation.
#[derive(Debug, Default)]
pub struct PluginDescriptor {
    inner: RwLock<DescriptorInner>,
}

impl PluginDescriptor {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Detected entry class, if known in memory.
    pub fn entry_class(&self) -> Option<String> {
        self.inner.read().entry_class.clone()
    }

    /// Record the entry class.
    pub fn set_entry_class(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let mut inner = self.inner.write();
        if let Some(existing) = &inner.entry_class {
            return Err(Error::multiple_plugin_classes(existing.clone(), name));
        }
        inner.entry_class = Some(name);
        Ok(())
    }

    /// Size of the cross-platform jar, when one was produced.
    pub fn jar_file_size(&self) -> Option<u64> {
        self.inner.read().jar_file_size
    }

    /// Record the cross-platform jar size.
    pub fn set_jar_file_size(&self, size: u64) {
        self.inner.write().jar_file_size = Some(size);
    }

    /// Size of the final archive.
    pub fn file_size(&self) -> Option<u64> {
        self.inner.read().file_size
    }

    /// Record the final archive size.
    pub fn set_file_size(&self, size: u64) {
        self.inner.write().file_size = Some(size);
    }

    /// Resolve the entry class: the in-memory value if this run computed it,
    /// else the name persisted in the side-channel file, else `None`.
    ///
    /// A value read from the file is cached in memory.
    pub fn resolve_entry_class(&self, side_channel: &PluginClassFile) -> Result<Option<String>> {
        if let Some(name) = self.entry_class() {
            return Ok(Some(name));
        }

        match side_channel.read()? {
            Some(name) => {
                debug!(
                    "Recovered plugin class {} from {}",
                    name,
                    side_channel.path().display()
                );
                let mut inner = self.inner.write();
                // Another stage may have resolved it while we were reading.
                if inner.entry_class.is_none() {
                    inner.entry_class = Some(name.clone());
                }
                Ok(inner.entry_class.clone())
            }
            None => Ok(None),
        }
    }
}

/// The `pluginClass` side-channel file holding the detected entry class name.
#[derive(Debug, Clone)]
pub struct PluginClassFile {
    path: PathBuf,
}

impl PluginClassFile {
    /// Wrap the side-channel file location.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the entry class name exactly as given.
    pub fn write(&self, name: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(&self.path, name).map_err(|e| Error::io(&self.path, e))
    }

    /// Read the persisted name; `None` if the file is absent or empty.
    pub fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }

    /// Remove a stale file; absent files are fine.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }
}
