//! Resource compilation and linking (`compileResources`).

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::cache::{Fingerprint, StageCache};
use crate::descriptor::{PluginClassFile, PluginDescriptor};
use crate::error::{Error, Result};
use crate::lifecycle::{Stage, StageState};
use crate::project::PackagingUnit;
use crate::tools;

/// Inputs of the link step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    /// Output of the compile step.
    pub compiled: PathBuf,
    /// Library manifest.
    pub manifest: PathBuf,
    /// Platform archives included with `-I`.
    pub platform: Vec<PathBuf>,
    /// Minimum API level.
    pub min_sdk: u32,
    /// Linked resource package to produce.
    pub output: PathBuf,
}

/// Compiles and links Android resources.
pub trait ResourceCompiler: Debug + Send + Sync {
    /// Compile every resource below `res_dir` into `output`.
    fn compile(&self, res_dir: &Path, output: &Path) -> Result<()>;

    /// Link compiled resources into a resource package.
    fn link(&self, request: &LinkRequest) -> Result<()>;
}

/// Resource compiler backed by `aapt2`.
#[derive(Debug, Clone)]
pub struct Aapt2 {
    program: PathBuf,
}

impl Aapt2 {
    /// Use the given `aapt2` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn invoke(&self, args: Vec<String>) -> Result<()> {
        let output = tools::run(&self.program, &args)?;
        if !output.status.success() {
            return Err(Error::ResourceCompilation(format!(
                "{} {} exited with {}: {}",
                self.program.display(),
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                tools::stderr_text(&output)
            )));
        }
        Ok(())
    }
}

impl ResourceCompiler for Aapt2 {
    fn compile(&self, res_dir: &Path, output: &Path) -> Result<()> {
        self.invoke(vec![
            "compile".to_string(),
            "--dir".to_string(),
            tools::arg(res_dir),
            "-o".to_string(),
            tools::arg(output),
        ])
    }

    fn link(&self, request: &LinkRequest) -> Result<()> {
        let mut args = vec!["link".to_string()];
        for platform in &request.platform {
            args.push("-I".to_string());
            args.push(tools::arg(platform));
        }
        args.extend([
            "--manifest".to_string(),
            tools::arg(&request.manifest),
            "--min-sdk-version".to_string(),
            request.min_sdk.to_string(),
            "--auto-add-overlay".to_string(),
            "-o".to_string(),
            tools::arg(&request.output),
            tools::arg(&request.compiled),
        ]);
        self.invoke(args)
    }
}

/// Minimal library manifest for units that do not ship one.
pub fn minimal_manifest(package: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <manifest xmlns:android=\"http://schemas.android.com/apk/res/android\" package=\"{}\" />\n",
        package
    )
}

/// Package used for generated manifests: the entry class's package, else one
/// derived from the module name.
pub fn resource_package(entry_class: Option<&str>, module: &str) -> String {
    if let Some((package, _)) = entry_class.and_then(|c| c.rsplit_once('.')) {
        return package.to_string();
    }
    let suffix: String = module
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if suffix.is_empty() || suffix.starts_with(|c: char| c.is_ascii_digit()) {
        format!("cs3.plugin{}", suffix)
    } else {
        format!("cs3.{}", suffix)
    }
}

/// The `compileResources` stage.
#[derive(Debug)]
pub struct CompileResourcesTask<'a> {
    compiler: &'a dyn ResourceCompiler,
}

impl<'a> CompileResourcesTask<'a> {
    /// Create the stage.
    pub fn new(compiler: &'a dyn ResourceCompiler) -> Self {
        Self { compiler }
    }

    /// Compile and link the unit's resources into `res.apk`.
    pub fn run(
        &self,
        unit: &PackagingUnit,
        descriptor: &PluginDescriptor,
        cache: &StageCache,
    ) -> Result<StageState> {
        if !unit.requires_resources() {
            return Ok(StageState::Skipped);
        }

        let paths = unit.paths();
        let res_dir = unit.sdk().main_res_src_dir()?;
        let platform = unit.sdk().boot_classpath()?;
        let min_sdk = unit.sdk().min_sdk();

        fs::create_dir_all(&paths.intermediates).map_err(|e| Error::io(&paths.intermediates, e))?;

        let manifest = match unit.android_manifest().filter(|p| p.is_file()) {
            Some(manifest) => manifest,
            None => {
                let entry = descriptor
                    .resolve_entry_class(&PluginClassFile::new(paths.plugin_class()))?;
                let package = resource_package(entry.as_deref(), unit.module());
                let generated = paths.generated_android_manifest();
                fs::write(&generated, minimal_manifest(&package))
                    .map_err(|e| Error::io(&generated, e))?;
                debug!("Generated {} for package {}", generated.display(), package);
                generated
            }
        };

        let mut fingerprint = Fingerprint::new(Stage::CompileResources.name())
            .value("min-sdk", min_sdk.to_string())
            .tree(&res_dir)?
            .file(&manifest)?;
        for lib in &platform {
            fingerprint = fingerprint.value("platform", tools::arg(lib));
        }
        let fingerprint = fingerprint.finish();

        let output = paths.res_apk();
        if cache.is_up_to_date(Stage::CompileResources.name(), &fingerprint, &[output.clone()]) {
            return Ok(StageState::UpToDate);
        }

        let compiled = paths.compiled_res();
        self.compiler.compile(&res_dir, &compiled)?;
        self.compiler.link(&LinkRequest {
            compiled,
            manifest,
            platform,
            min_sdk,
            output: output.clone(),
        })?;

        if !output.is_file() {
            return Err(Error::ResourceCompilation(format!(
                "linking produced no package at {}",
                output.display()
            )));
        }

        info!("Compiled resources to {}", output.display());
        cache.record(Stage::CompileResources.name(), fingerprint)?;
        Ok(StageState::Executed)
    }
}
