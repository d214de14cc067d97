//! Bytecode to dex conversion and entry-class discovery (`compileDex`).

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cache::{Fingerprint, StageCache};
use crate::descriptor::{PluginClassFile, PluginDescriptor};
use crate::error::{Error, Result};
use crate::lifecycle::{Stage, StageState};
use crate::project::PackagingUnit;
use crate::scanner::{collect_classes, AnnotationScanner};
use crate::tools;

/// One conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexRequest {
    /// Class directories and jars, in order.
    pub inputs: Vec<PathBuf>,
    /// Minimum API level targeted by desugaring.
    pub min_api: u32,
    /// Platform libraries consulted while desugaring.
    pub boot_classpath: Vec<PathBuf>,
    /// Additional desugaring classpath.
    pub classpath: Vec<PathBuf>,
    /// Whether desugaring is enabled.
    pub desugaring: bool,
    /// Directory receiving `classes.dex`.
    pub output_dir: PathBuf,
}

/// Converts JVM bytecode into a dex file.
pub trait DexConverter: Debug + Send + Sync {
    /// Convert `request.inputs` into `request.output_dir/classes.dex`.
    fn convert(&self, request: &DexRequest) -> Result<()>;
}

/// Converter backed by the `d8` command-line tool.
#[derive(Debug, Clone)]
pub struct D8Converter {
    program: PathBuf,
}

impl D8Converter {
    /// Use the given `d8` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The executable in use.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn arguments(request: &DexRequest) -> Result<Vec<String>> {
        let mut args = vec![
            "--debug".to_string(),
            "--min-api".to_string(),
            request.min_api.to_string(),
        ];
        for lib in &request.boot_classpath {
            args.push("--lib".to_string());
            args.push(tools::arg(lib));
        }
        for entry in &request.classpath {
            args.push("--classpath".to_string());
            args.push(tools::arg(entry));
        }
        if !request.desugaring {
            args.push("--no-desugaring".to_string());
        }
        args.push("--output".to_string());
        args.push(tools::arg(&request.output_dir));

        // d8 takes class files and archives, not directories.
        for input in &request.inputs {
            if input.is_dir() {
                for entry in WalkDir::new(input).sort_by_file_name() {
                    let entry = entry.map_err(|e| Error::io(input, e.into()))?;
                    let path = entry.path();
                    if entry.file_type().is_file()
                        && path.extension().and_then(|e| e.to_str()) == Some("class")
                    {
                        args.push(tools::arg(path));
                    }
                }
            } else {
                args.push(tools::arg(input));
            }
        }
        Ok(args)
    }
}

impl DexConverter for D8Converter {
    fn convert(&self, request: &DexRequest) -> Result<()> {
        let args = Self::arguments(request)?;
        let output = tools::run(&self.program, &args)?;
        if !output.status.success() {
            return Err(Error::Conversion(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                tools::stderr_text(&output)
            )));
        }
        Ok(())
    }
}

/// The `compileDex` stage.
#[derive(Debug)]
pub struct CompileDexTask<'a> {
    converter: &'a dyn DexConverter,
    scanner: AnnotationScanner,
}

impl<'a> CompileDexTask<'a> {
    /// Create the stage.
    pub fn new(converter: &'a dyn DexConverter, scanner: AnnotationScanner) -> Self {
        Self { converter, scanner }
    }

    /// Convert the unit's classes and record the entry class.
    pub fn run(
        &self,
        unit: &PackagingUnit,
        descriptor: &PluginDescriptor,
        cache: &StageCache,
    ) -> Result<StageState> {
        let paths = unit.paths();
        let dex = paths.dex();
        let side_channel = PluginClassFile::new(paths.plugin_class());

        let inputs: Vec<PathBuf> = unit
            .class_inputs()
            .into_iter()
            .filter(|p| p.exists())
            .collect();
        let classes = collect_classes(&inputs)?;

        if classes.is_empty() {
            info!("{}: no class inputs, skipping dex compilation", unit.module());
            remove_if_present(&dex)?;
            side_channel.clear()?;
            cache.invalidate(Stage::CompileDex.name())?;
            return Ok(StageState::NoSource);
        }

        let boot_classpath = unit.sdk().boot_classpath()?;
        let min_api = unit.sdk().min_sdk();

        let mut fingerprint = Fingerprint::new(Stage::CompileDex.name())
            .value("min-api", min_api.to_string())
            .value("marker", self.scanner.marker());
        for lib in &boot_classpath {
            fingerprint = fingerprint.value("lib", tools::arg(lib));
        }
        for input in &inputs {
            fingerprint = fingerprint.value("input", tools::arg(input)).tree(input)?;
        }
        let fingerprint = fingerprint.finish();

        let outputs = [dex.clone(), side_channel.path().to_path_buf()];
        if cache.is_up_to_date(Stage::CompileDex.name(), &fingerprint, &outputs) {
            return Ok(StageState::UpToDate);
        }

        fs::create_dir_all(&paths.intermediates).map_err(|e| Error::io(&paths.intermediates, e))?;

        let request = DexRequest {
            inputs,
            min_api,
            boot_classpath,
            classpath: Vec::new(),
            desugaring: true,
            output_dir: paths.intermediates.clone(),
        };
        self.converter.convert(&request)?;

        if !dex.is_file() {
            return Err(Error::Conversion(format!(
                "converter produced no output at {}",
                dex.display()
            )));
        }

        let detected = match self
            .scanner
            .scan(&classes)
            .and_then(|found| {
                if let Some(name) = &found {
                    descriptor.set_entry_class(name.clone())?;
                }
                Ok(found)
            }) {
            Ok(found) => found,
            Err(e) => {
                remove_if_present(&dex)?;
                cache.invalidate(Stage::CompileDex.name())?;
                return Err(e);
            }
        };

        match &detected {
            Some(name) => {
                side_channel.write(name)?;
                debug!("{}: plugin class {}", unit.module(), name);
            }
            // An empty file records that no class is marked.
            None => side_channel.write("")?,
        }

        info!("Compiled dex to {}", dex.display());
        cache.record(Stage::CompileDex.name(), fingerprint)?;
        Ok(StageState::Executed)
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}
