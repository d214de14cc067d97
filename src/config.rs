//! Workspace-level packager configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scanner::DEFAULT_PLUGIN_MARKER;

/// Module prefix that must not appear in a cross-platform jar's dependencies.
pub const DEFAULT_RESTRICTED_PREFIX: &str = "android.";

/// Default device directory archives are pushed to.
pub const DEFAULT_DEVICE_PLUGIN_DIR: &str = "/sdcard/Cloudstream3/plugins/";

/// Default name of the optional workspace configuration file.
pub const CONFIG_FILE_NAME: &str = "packager.toml";

/// Explicit external tool locations (`[tools]` table).
///
/// Unset tools are looked up in the SDK, then on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Dex converter.
    pub d8: Option<PathBuf>,
    /// Module dependency analyzer.
    pub jdeps: Option<PathBuf>,
    /// Resource compiler.
    pub aapt2: Option<PathBuf>,
    /// Device bridge.
    pub adb: Option<PathBuf>,
}

/// Configuration shared by every unit in a packaging session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    /// Annotation descriptor marking the entry class.
    pub marker: String,
    /// Module prefix the cross-platform audit rejects.
    pub restricted_prefix: String,
    /// Build directory name, relative to each unit.
    pub build_dir: String,
    /// File name of the aggregate index.
    pub index_file: String,
    /// Fail the manifest stage when no entry class was detected.
    pub require_entry_class: bool,
    /// Ignore up-to-date checks and run every stage.
    pub rerun_tasks: bool,
    /// Device directory for `deploy`.
    pub device_plugin_dir: String,
    /// External tool overrides.
    pub tools: ToolPaths,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_PLUGIN_MARKER.to_string(),
            restricted_prefix: DEFAULT_RESTRICTED_PREFIX.to_string(),
            build_dir: "build".to_string(),
            index_file: "plugins.json".to_string(),
            require_entry_class: false,
            rerun_tasks: false,
            device_plugin_dir: DEFAULT_DEVICE_PLUGIN_DIR.to_string(),
            tools: ToolPaths::default(),
        }
    }
}

impl PackagerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&content, path)
    }

    /// Load `packager.toml` from a directory, or defaults if it has none.
    pub fn load_or_default(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn parse(content: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::parse(origin, e.to_string()))?;
        config.validate(origin)?;
        Ok(config)
    }

    fn validate(&self, origin: &Path) -> Result<()> {
        if !(self.marker.starts_with('L') && self.marker.ends_with(';')) {
            return Err(Error::config(format!(
                "marker '{}' in {} must be a type descriptor like Lcom/example/Marker;",
                self.marker,
                origin.display()
            )));
        }
        if self.restricted_prefix.is_empty() {
            return Err(Error::config(format!(
                "restricted_prefix in {} cannot be empty",
                origin.display()
            )));
        }
        if self.build_dir.is_empty() || self.index_file.is_empty() {
            return Err(Error::config(format!(
                "build_dir and index_file in {} cannot be empty",
                origin.display()
            )));
        }
        Ok(())
    }

    /// Set the marker annotation descriptor.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Set the restricted module prefix.
    pub fn with_restricted_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.restricted_prefix = prefix.into();
        self
    }

    /// Set the build directory name.
    pub fn with_build_dir(mut self, dir: impl Into<String>) -> Self {
        self.build_dir = dir.into();
        self
    }

    /// Set the index file name.
    pub fn with_index_file(mut self, name: impl Into<String>) -> Self {
        self.index_file = name.into();
        self
    }

    /// Require an entry class for every manifest.
    pub fn with_require_entry_class(mut self, require: bool) -> Self {
        self.require_entry_class = require;
        self
    }

    /// Disable up-to-date checks.
    pub fn with_rerun_tasks(mut self, rerun: bool) -> Self {
        self.rerun_tasks = rerun;
        self
    }

    /// Set the device plugin directory.
    pub fn with_device_plugin_dir(mut self, dir: impl Into<String>) -> Self {
        self.device_plugin_dir = dir.into();
        self
    }

    /// Set external tool overrides.
    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }
}
