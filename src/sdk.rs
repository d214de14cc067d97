//! Android SDK access across the two supported `[android]` configuration
//! layouts.
//!
//! The legacy layout mirrors the old base-extension shape: the compile SDK is a
//! platform string (`compile_sdk_version = "android-34"`), resource
//! directories are a source-set list and the boot classpath and adb location
//! may be given explicitly. The modern layout takes an integer `compile_sdk`
//! and derives everything else from the SDK components. Callers only see the
//! [`AndroidSdk`] trait; [`probe`] picks the implementation.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Minimum SDK used when a unit does not declare one.
pub const DEFAULT_MIN_SDK: u32 = 21;

/// Capability interface over the project's Android configuration.
pub trait AndroidSdk: std::fmt::Debug + Send + Sync {
    /// Compile SDK identifier, e.g. `android-34`.
    fn compile_sdk(&self) -> String;

    /// Minimum supported API level.
    fn min_sdk(&self) -> u32;

    /// Build tools version, e.g. `34.0.0`.
    fn build_tools_version(&self) -> Option<String>;

    /// SDK root directory.
    fn sdk_directory(&self) -> Result<PathBuf>;

    /// Platform API archives used for desugaring and resource linking.
    fn boot_classpath(&self) -> Result<Vec<PathBuf>>;

    /// The adb executable.
    fn adb(&self) -> Result<PathBuf>;

    /// The unit's single main resource directory.
    fn main_res_src_dir(&self) -> Result<PathBuf>;

    /// Directory holding the build tools (`d8`, `aapt2`), when resolvable.
    fn build_tools_dir(&self) -> Option<PathBuf> {
        let version = self.build_tools_version()?;
        let dir = self.sdk_directory().ok()?.join("build-tools").join(version);
        dir.is_dir().then_some(dir)
    }
}

/// Legacy `[android]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacySdkConfig {
    /// Platform string such as `android-34`.
    pub compile_sdk_version: String,
    /// Minimum API level.
    #[serde(default)]
    pub min_sdk: Option<u32>,
    /// Build tools version.
    #[serde(default)]
    pub build_tools_version: Option<String>,
    /// SDK root; falls back to the environment.
    #[serde(default)]
    pub sdk_dir: Option<PathBuf>,
    /// Explicit boot classpath.
    #[serde(default)]
    pub boot_classpath: Option<Vec<PathBuf>>,
    /// Explicit adb executable.
    #[serde(default)]
    pub adb: Option<PathBuf>,
    /// Main source set resource directories.
    #[serde(default = "default_res_src_dirs")]
    pub res_src_dirs: Vec<PathBuf>,
}

/// Modern `[android]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ModernSdkConfig {
    /// Compile API level.
    pub compile_sdk: u32,
    /// Minimum API level.
    #[serde(default)]
    pub min_sdk: Option<u32>,
    /// Build tools version.
    #[serde(default)]
    pub build_tools_version: Option<String>,
    /// SDK root; falls back to the environment.
    #[serde(default)]
    pub sdk_dir: Option<PathBuf>,
}

fn default_res_src_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("src/main/res")]
}

/// SDK access for the legacy layout.
#[derive(Debug, Clone)]
pub struct LegacySdk {
    project_dir: PathBuf,
    config: LegacySdkConfig,
}

impl LegacySdk {
    /// Create from a parsed legacy table.
    pub fn new(project_dir: impl Into<PathBuf>, config: LegacySdkConfig) -> Self {
        Self {
            project_dir: project_dir.into(),
            config,
        }
    }
}

impl AndroidSdk for LegacySdk {
    fn compile_sdk(&self) -> String {
        self.config.compile_sdk_version.clone()
    }

    fn min_sdk(&self) -> u32 {
        self.config.min_sdk.unwrap_or(DEFAULT_MIN_SDK)
    }

    fn build_tools_version(&self) -> Option<String> {
        self.config.build_tools_version.clone()
    }

    fn sdk_directory(&self) -> Result<PathBuf> {
        resolve_sdk_dir(self.config.sdk_dir.as_deref(), &self.project_dir)
    }

    fn boot_classpath(&self) -> Result<Vec<PathBuf>> {
        if let Some(paths) = &self.config.boot_classpath {
            return Ok(paths.iter().map(|p| self.project_dir.join(p)).collect());
        }
        let jar = self
            .sdk_directory()?
            .join("platforms")
            .join(&self.config.compile_sdk_version)
            .join("android.jar");
        Ok(vec![jar])
    }

    fn adb(&self) -> Result<PathBuf> {
        match &self.config.adb {
            Some(adb) => Ok(self.project_dir.join(adb)),
            None => Ok(platform_tool(&self.sdk_directory()?, "adb")),
        }
    }

    fn main_res_src_dir(&self) -> Result<PathBuf> {
        match self.config.res_src_dirs.as_slice() {
            [single] => existing_res_dir(self.project_dir.join(single)),
            dirs => Err(Error::config(format!(
                "expected exactly one main resource directory, found {}",
                dirs.len()
            ))),
        }
    }
}

/// SDK access for the modern layout.
#[derive(Debug, Clone)]
pub struct ModernSdk {
    project_dir: PathBuf,
    config: ModernSdkConfig,
}

impl ModernSdk {
    /// Create from a parsed modern table.
    pub fn new(project_dir: impl Into<PathBuf>, config: ModernSdkConfig) -> Self {
        Self {
            project_dir: project_dir.into(),
            config,
        }
    }
}

impl AndroidSdk for ModernSdk {
    fn compile_sdk(&self) -> String {
        format!("android-{}", self.config.compile_sdk)
    }

    fn min_sdk(&self) -> u32 {
        self.config.min_sdk.unwrap_or(DEFAULT_MIN_SDK)
    }

    fn build_tools_version(&self) -> Option<String> {
        self.config.build_tools_version.clone()
    }

    fn sdk_directory(&self) -> Result<PathBuf> {
        resolve_sdk_dir(self.config.sdk_dir.as_deref(), &self.project_dir)
    }

    fn boot_classpath(&self) -> Result<Vec<PathBuf>> {
        let jar = self
            .sdk_directory()?
            .join("platforms")
            .join(self.compile_sdk())
            .join("android.jar");
        Ok(vec![jar])
    }

    fn adb(&self) -> Result<PathBuf> {
        Ok(platform_tool(&self.sdk_directory()?, "adb"))
    }

    fn main_res_src_dir(&self) -> Result<PathBuf> {
        existing_res_dir(self.project_dir.join("src").join("main").join("res"))
    }
}

fn existing_res_dir(dir: PathBuf) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(Error::config(format!(
            "Resource directory not found at {}. Resources are only supported in a single main \
             resource directory. If this unit has no resources, remove requires_resources = true.",
            dir.display()
        )));
    }
    Ok(dir)
}

fn platform_tool(sdk: &Path, name: &str) -> PathBuf {
    let file = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };
    sdk.join("platform-tools").join(file)
}

fn resolve_sdk_dir(configured: Option<&Path>, project_dir: &Path) -> Result<PathBuf> {
    if let Some(dir) = configured {
        return Ok(project_dir.join(dir));
    }
    for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
        if let Some(value) = std::env::var_os(var).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(value));
        }
    }
    Err(Error::config(
        "Android SDK not found: set sdk_dir in [android] or ANDROID_HOME",
    ))
}

/// Pick the SDK implementation matching the shape of the `[android]` table.
pub fn probe(project_dir: &Path, table: Option<&toml::Value>) -> Result<Box<dyn AndroidSdk>> {
    let table = table.ok_or_else(|| Error::config("[android] section not found"))?;
    let map = table
        .as_table()
        .ok_or_else(|| Error::config("[android] must be a table"))?;

    if map.contains_key("compile_sdk_version") {
        let config: LegacySdkConfig = table
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("invalid legacy [android] section: {}", e)))?;
        Ok(Box::new(LegacySdk::new(project_dir, config)))
    } else if map.contains_key("compile_sdk") {
        let config: ModernSdkConfig = table
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("invalid [android] section: {}", e)))?;
        Ok(Box::new(ModernSdk::new(project_dir, config)))
    } else {
        Err(Error::config(
            "[android] found, but it declares neither compile_sdk nor compile_sdk_version",
        ))
    }
}
