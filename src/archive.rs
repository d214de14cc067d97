//! Reproducible `.cs3` archive assembly (`make`).

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::cache::{Fingerprint, StageCache};
use crate::descriptor::PluginDescriptor;
use crate::error::{Error, Result};
use crate::lifecycle::{Stage, StageState};
use crate::project::PackagingUnit;

/// Entry name of the manifest inside an archive.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Entry name of the dex file inside an archive.
pub const DEX_ENTRY: &str = "classes.dex";

const EXCLUDED_RESOURCE_ENTRY: &str = "AndroidManifest.xml";

/// Inputs of one archive.
#[derive(Debug, Clone)]
pub struct ArchiveContents {
    /// Serialized manifest.
    pub manifest: PathBuf,
    /// Dex file, when one was produced.
    pub dex: Option<PathBuf>,
    /// Linked resource package whose entries are merged in.
    pub resources: Option<PathBuf>,
}

fn entry_options() -> SimpleFileOptions {
    // Fixed DOS epoch and permissions keep the output byte-identical.
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Write the archive to `target` and return its size.
///
/// Entries are written in a fixed order: the manifest, the dex file, then
/// every resource package entry except its `AndroidManifest.xml`.
pub fn write_archive(target: &Path, contents: &ArchiveContents) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let partial = target.with_extension("cs3.partial");
    let file = fs::File::create(&partial).map_err(|e| Error::io(&partial, e))?;
    let mut zip = ZipWriter::new(file);
    let options = entry_options();

    add_file(&mut zip, MANIFEST_ENTRY, &contents.manifest, options)?;
    if let Some(dex) = &contents.dex {
        add_file(&mut zip, DEX_ENTRY, dex, options)?;
    }
    if let Some(resources) = &contents.resources {
        merge_resources(&mut zip, resources, options)?;
    }

    let file = zip.finish()?;
    file.sync_all().map_err(|e| Error::io(&partial, e))?;
    drop(file);

    fs::rename(&partial, target).map_err(|e| Error::io(target, e))?;
    let size = fs::metadata(target).map_err(|e| Error::io(target, e))?.len();
    Ok(size)
}

fn add_file(
    zip: &mut ZipWriter<fs::File>,
    name: &str,
    source: &Path,
    options: SimpleFileOptions,
) -> Result<()> {
    let bytes = fs::read(source).map_err(|e| Error::io(source, e))?;
    zip.start_file(name, options)?;
    zip.write_all(&bytes).map_err(|e| Error::io(source, e))
}

fn merge_resources(
    zip: &mut ZipWriter<fs::File>,
    resources: &Path,
    options: SimpleFileOptions,
) -> Result<()> {
    let file = fs::File::open(resources).map_err(|e| Error::io(resources, e))?;
    let mut apk = ZipArchive::new(file)?;

    for index in 0..apk.len() {
        let mut entry = apk.by_index(index)?;
        let name = entry.name().to_string();
        if name == EXCLUDED_RESOURCE_ENTRY {
            continue;
        }
        if entry.is_dir() {
            zip.add_directory(name, options)?;
            continue;
        }

        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| Error::io(resources, e))?;
        zip.start_file(name, options)?;
        zip.write_all(&bytes).map_err(|e| Error::io(resources, e))?;
    }
    Ok(())
}

/// The `make` stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct MakeArchiveTask;

impl MakeArchiveTask {
    /// Create the stage.
    pub fn new() -> Self {
        Self
    }

    /// Assemble `<build>/<module>.cs3` and record its size.
    pub fn run(
        &self,
        unit: &PackagingUnit,
        descriptor: &PluginDescriptor,
        cache: &StageCache,
    ) -> Result<StageState> {
        let paths = unit.paths();
        let manifest = paths.manifest();
        if !manifest.is_file() {
            return Err(Error::io(
                &manifest,
                std::io::Error::new(std::io::ErrorKind::NotFound, "manifest was not written"),
            ));
        }

        let dex = Some(paths.dex()).filter(|p| p.is_file());
        if dex.is_none() {
            warn!(
                "{}: no dex output at {}, the archive will not contain code",
                unit.module(),
                paths.dex().display()
            );
        }

        let resources = if unit.requires_resources() {
            let apk = Some(paths.res_apk()).filter(|p| p.is_file());
            if apk.is_none() {
                warn!(
                    "{}: resources are required but {} is missing",
                    unit.module(),
                    paths.res_apk().display()
                );
            }
            apk
        } else {
            None
        };

        let mut fingerprint = Fingerprint::new(Stage::Make.name()).file(&manifest)?;
        if let Some(dex) = &dex {
            fingerprint = fingerprint.file(dex)?;
        }
        if let Some(resources) = &resources {
            fingerprint = fingerprint.file(resources)?;
        }
        let fingerprint = fingerprint.finish();

        let target = paths.archive(unit.module());
        if cache.is_up_to_date(Stage::Make.name(), &fingerprint, &[target.clone()]) {
            let size = fs::metadata(&target).map_err(|e| Error::io(&target, e))?.len();
            descriptor.set_file_size(size);
            return Ok(StageState::UpToDate);
        }

        let size = write_archive(
            &target,
            &ArchiveContents {
                manifest,
                dex,
                resources,
            },
        )?;
        descriptor.set_file_size(size);

        info!("Made package at {}", target.display());
        cache.record(Stage::Make.name(), fingerprint)?;
        Ok(StageState::Executed)
    }
}
