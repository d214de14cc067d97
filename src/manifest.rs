//! Plugin manifest schema and the manifest stage.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::descriptor::{PluginClassFile, PluginDescriptor};
use crate::error::{Error, Result};
use crate::lifecycle::StageState;
use crate::project::PackagingUnit;

/// Manifest embedded at the root of every archive as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Display name.
    pub name: String,

    /// Plugin version.
    pub version: i32,

    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Authors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,

    /// Fully qualified entry class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_class_name: Option<String>,

    /// Minimum supported API level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sdk: Option<u32>,

    /// Compile SDK identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_sdk: Option<String>,

    /// Whether the archive carries resources.
    pub requires_resources: bool,

    /// Whether a cross-platform jar accompanies the archive.
    pub is_cross_platform: bool,

    /// Plugin API version.
    pub api_version: i32,
}

impl PluginManifest {
    /// Create a manifest with required fields.
    pub fn new(name: impl Into<String>, version: i32) -> Self {
        Self {
            name: name.into(),
            version,
            description: None,
            authors: Vec::new(),
            plugin_class_name: None,
            min_sdk: None,
            compile_sdk: None,
            requires_resources: false,
            is_cross_platform: false,
            api_version: 1,
        }
    }

    /// Compact JSON with absent fields omitted.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Write compact JSON to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(path, self.to_json()?).map_err(|e| Error::io(path, e))
    }
}

/// Builder for creating manifests.
pub struct ManifestBuilder {
    manifest: PluginManifest,
}

impl ManifestBuilder {
    /// Create a new manifest builder.
    pub fn new(name: impl Into<String>, version: i32) -> Self {
        Self {
            manifest: PluginManifest::new(name, version),
        }
    }

    /// Set the description.
    pub fn description(mut self, desc: Option<String>) -> Self {
        self.manifest.description = desc;
        self
    }

    /// Add authors.
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    /// Set the entry class.
    pub fn plugin_class_name(mut self, name: Option<String>) -> Self {
        self.manifest.plugin_class_name = name;
        self
    }

    /// Set the supported platform range.
    pub fn platform(mut self, min_sdk: u32, compile_sdk: impl Into<String>) -> Self {
        self.manifest.min_sdk = Some(min_sdk);
        self.manifest.compile_sdk = Some(compile_sdk.into());
        self
    }

    /// Set the resource flag.
    pub fn requires_resources(mut self, requires: bool) -> Self {
        self.manifest.requires_resources = requires;
        self
    }

    /// Set the cross-platform flag.
    pub fn cross_platform(mut self, cross_platform: bool) -> Self {
        self.manifest.is_cross_platform = cross_platform;
        self
    }

    /// Set the API version.
    pub fn api_version(mut self, version: i32) -> Self {
        self.manifest.api_version = version;
        self
    }

    /// Build the manifest.
    pub fn build(self) -> PluginManifest {
        self.manifest
    }
}

/// Assemble the manifest for a unit from its configuration and descriptor.
pub fn assemble(unit: &PackagingUnit, entry_class: Option<String>) -> PluginManifest {
    let plugin = &unit.config().plugin;
    ManifestBuilder::new(unit.display_name(), plugin.version)
        .description(plugin.description.clone())
        .authors(plugin.authors.iter().cloned())
        .plugin_class_name(entry_class)
        .platform(unit.sdk().min_sdk(), unit.sdk().compile_sdk())
        .requires_resources(plugin.requires_resources)
        .cross_platform(plugin.cross_platform)
        .api_version(plugin.api_version)
        .build()
}

/// The manifest stage. It always runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeManifestTask {
    require_entry_class: bool,
}

impl MakeManifestTask {
    /// Create the stage. With `require_entry_class`, a unit without a
    /// detected entry class fails instead of producing a manifest without
    /// one.
    pub fn new(require_entry_class: bool) -> Self {
        Self {
            require_entry_class,
        }
    }

    /// Write `intermediates/manifest.json`.
    pub fn run(&self, unit: &PackagingUnit, descriptor: &PluginDescriptor) -> Result<StageState> {
        let side_channel = PluginClassFile::new(unit.paths().plugin_class());
        let entry_class = descriptor.resolve_entry_class(&side_channel)?;

        if entry_class.is_none() {
            if self.require_entry_class {
                return Err(Error::MissingEntryClass(unit.module().to_string()));
            }
            warn!(
                "{}: no plugin class found, manifest will not name an entry point",
                unit.module()
            );
        }

        let manifest = assemble(unit, entry_class);
        let path = unit.paths().manifest();
        manifest.write_to(&path)?;
        debug!("Wrote manifest {}", path.display());
        Ok(StageState::Executed)
    }
}
