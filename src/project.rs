//! Packaging units: `cs3.toml` parsing, discovery, preflight and output
//! layout.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::config::PackagerConfig;
use crate::error::{Error, Result};
use crate::sdk::{self, AndroidSdk};

/// Name of the per-unit configuration file.
pub const PROJECT_FILE_NAME: &str = "cs3.toml";

/// `[plugin]` table: identity and capability flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PluginSection {
    /// Display name; defaults to the unit directory name.
    pub name: Option<String>,
    /// Plugin version, bumped for every release.
    pub version: i32,
    /// Short description.
    pub description: Option<String>,
    /// Authors.
    pub authors: Vec<String>,
    /// 0 down, 1 ok, 2 slow, 3 beta-only.
    pub status: i32,
    /// Content language code.
    pub language: Option<String>,
    /// Supported content types.
    pub tv_types: Vec<String>,
    /// Icon location.
    pub icon_url: Option<String>,
    /// Plugin API version.
    pub api_version: i32,
    /// Whether the archive carries compiled resources.
    pub requires_resources: bool,
    /// Whether a cross-platform jar is produced and audited.
    pub cross_platform: bool,
}

impl Default for PluginSection {
    fn default() -> Self {
        Self {
            name: None,
            version: -1,
            description: None,
            authors: Vec::new(),
            status: 3,
            language: None,
            tv_types: Vec::new(),
            icon_url: None,
            api_version: 1,
            requires_resources: false,
            cross_platform: false,
        }
    }
}

/// `[build]` table: compiler outputs consumed by the pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Compiled class directories (or jars), relative to the unit.
    pub class_dirs: Vec<PathBuf>,
    /// The fully linked jar used for the cross-platform copy.
    pub linked_jar: Option<PathBuf>,
    /// Library manifest for resource linking.
    pub android_manifest: Option<PathBuf>,
    /// Overrides the packager's build directory name for this unit.
    pub build_dir: Option<String>,
}

/// Parsed `cs3.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Plugin identity.
    #[serde(default)]
    pub plugin: PluginSection,
    /// Build inputs.
    #[serde(default)]
    pub build: BuildSection,
    /// Raw `[android]` table; its shape selects the SDK implementation.
    #[serde(default)]
    pub android: Option<toml::Value>,
}

impl ProjectConfig {
    /// Parse from TOML text.
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::parse(origin, e.to_string()))
    }

    /// Load from a `cs3.toml` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml(&content, path)
    }
}

/// Output locations of one unit.
#[derive(Debug, Clone)]
pub struct UnitPaths {
    /// `<unit>/<build>`.
    pub build_dir: PathBuf,
    /// `<build>/intermediates`.
    pub intermediates: PathBuf,
}

impl UnitPaths {
    fn new(build_dir: PathBuf) -> Self {
        let intermediates = build_dir.join("intermediates");
        Self {
            build_dir,
            intermediates,
        }
    }

    /// Converted dex output.
    pub fn dex(&self) -> PathBuf {
        self.intermediates.join("classes.dex")
    }

    /// Entry class side-channel file.
    pub fn plugin_class(&self) -> PathBuf {
        self.intermediates.join("pluginClass")
    }

    /// Serialized manifest.
    pub fn manifest(&self) -> PathBuf {
        self.intermediates.join("manifest.json")
    }

    /// Linked resource package.
    pub fn res_apk(&self) -> PathBuf {
        self.intermediates.join("res.apk")
    }

    /// Compiled resource flat files.
    pub fn compiled_res(&self) -> PathBuf {
        self.intermediates.join("compiled-res.zip")
    }

    /// Generated library manifest used when the unit has none.
    pub fn generated_android_manifest(&self) -> PathBuf {
        self.intermediates.join("AndroidManifest.xml")
    }

    /// Stage fingerprints.
    pub fn stage_cache(&self) -> PathBuf {
        self.intermediates.join("stage-cache.json")
    }

    /// Analyzer report.
    pub fn jdeps_output(&self) -> PathBuf {
        self.build_dir.join("jdeps-output.txt")
    }

    /// Cross-platform companion jar.
    pub fn portable_jar(&self, module: &str) -> PathBuf {
        self.build_dir.join(format!("{}.jar", module))
    }

    /// Final archive.
    pub fn archive(&self, module: &str) -> PathBuf {
        self.build_dir.join(format!("{}.cs3", module))
    }
}

/// A loaded unit ready for packaging.
pub struct PackagingUnit {
    module: String,
    dir: PathBuf,
    config: ProjectConfig,
    sdk: Box<dyn AndroidSdk>,
    paths: UnitPaths,
}

impl PackagingUnit {
    /// Module name: the unit directory name, used for output file names.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Display name from `[plugin]`, falling back to the module name.
    pub fn display_name(&self) -> &str {
        self.config.plugin.name.as_deref().unwrap_or(&self.module)
    }

    /// Unit directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parsed configuration.
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// SDK shim.
    pub fn sdk(&self) -> &dyn AndroidSdk {
        self.sdk.as_ref()
    }

    /// Output layout.
    pub fn paths(&self) -> &UnitPaths {
        &self.paths
    }

    /// Class inputs resolved against the unit directory.
    pub fn class_inputs(&self) -> Vec<PathBuf> {
        self.config
            .build
            .class_dirs
            .iter()
            .map(|p| self.dir.join(p))
            .collect()
    }

    /// Linked jar resolved against the unit directory.
    pub fn linked_jar(&self) -> Option<PathBuf> {
        self.config.build.linked_jar.as_ref().map(|p| self.dir.join(p))
    }

    /// Declared library manifest resolved against the unit directory.
    pub fn android_manifest(&self) -> Option<PathBuf> {
        self.config
            .build
            .android_manifest
            .as_ref()
            .map(|p| self.dir.join(p))
    }

    /// Whether resources are packaged.
    pub fn requires_resources(&self) -> bool {
        self.config.plugin.requires_resources
    }

    /// Whether the cross-platform branch runs.
    pub fn is_cross_platform(&self) -> bool {
        self.config.plugin.cross_platform
    }

    /// Check everything that can be known before a stage runs.
    ///
    /// Any failure here is a configuration error and nothing is executed.
    pub fn preflight(&self) -> Result<()> {
        self.sdk.boot_classpath()?;
        if self.requires_resources() {
            self.sdk.main_res_src_dir()?;
        }
        if self.is_cross_platform() && self.config.build.linked_jar.is_none() {
            return Err(Error::config(format!(
                "{}: cross_platform = true requires [build] linked_jar",
                self.dir.join(PROJECT_FILE_NAME).display()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for PackagingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackagingUnit")
            .field("module", &self.module)
            .field("dir", &self.dir)
            .field("sdk", &self.sdk)
            .finish()
    }
}

/// Loads units from their `cs3.toml`.
#[derive(Debug, Clone)]
pub struct ProjectLoader {
    config: PackagerConfig,
}

impl ProjectLoader {
    /// Create a loader.
    pub fn new(config: PackagerConfig) -> Self {
        Self { config }
    }

    /// Packager configuration.
    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    /// Load the unit in `dir`.
    pub fn load(&self, dir: impl AsRef<Path>) -> Result<PackagingUnit> {
        let dir = dir.as_ref();
        let file = dir.join(PROJECT_FILE_NAME);
        if !file.is_file() {
            return Err(Error::config(format!("{} not found", file.display())));
        }

        let config = ProjectConfig::from_file(&file)?;
        self.load_config(dir, config)
    }

    /// Build a unit from an already parsed configuration.
    pub fn load_config(&self, dir: &Path, config: ProjectConfig) -> Result<PackagingUnit> {
        // `.` and `..` carry no file name of their own.
        let named = match dir.file_name() {
            Some(_) => dir.to_path_buf(),
            None => dir.canonicalize().map_err(|e| Error::io(dir, e))?,
        };
        let module = named
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::config(format!("cannot derive a module name from {}", dir.display())))?;

        let sdk = sdk::probe(dir, config.android.as_ref())?;
        let build_dir = config
            .build
            .build_dir
            .clone()
            .unwrap_or_else(|| self.config.build_dir.clone());
        let paths = UnitPaths::new(dir.join(build_dir));

        debug!("Loaded unit {} from {}", module, dir.display());
        Ok(PackagingUnit {
            module,
            dir: dir.to_path_buf(),
            config,
            sdk,
            paths,
        })
    }
}

/// Find unit directories: `root` itself and its immediate children that
/// contain a `cs3.toml`, sorted by path.
pub fn discover_units(root: &Path) -> Result<Vec<PathBuf>> {
    let mut units = Vec::new();
    if root.join(PROJECT_FILE_NAME).is_file() {
        units.push(root.to_path_buf());
    }

    let entries = std::fs::read_dir(root).map_err(|e| Error::io(root, e))?;
    let mut children = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(root, e))?;
        let path = entry.path();
        if path.is_dir() && path.join(PROJECT_FILE_NAME).is_file() {
            children.push(path);
        }
    }
    children.sort();
    units.extend(children);

    debug!("Discovered {} units under {}", units.len(), root.display());
    Ok(units)
}
