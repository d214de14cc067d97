//! Session-wide registry of produced archives and the aggregate index.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::descriptor::PluginDescriptor;
use crate::error::{Error, Result};
use crate::project::PackagingUnit;

/// One entry of the aggregate index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    /// Display name.
    pub name: String,
    /// Module name.
    pub internal_name: String,
    /// Plugin version.
    pub version: i32,
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Authors.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Availability status.
    pub status: i32,
    /// Content language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Supported content types.
    #[serde(default)]
    pub tv_types: Vec<String>,
    /// Icon location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// Plugin API version.
    pub api_version: i32,
    /// Archive size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Cross-platform jar size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jar_file_size: Option<u64>,
    /// Archive location, relative to the session root when possible.
    pub path: String,
}

impl ArchiveRecord {
    /// Build the record for a unit whose archive has been made.
    pub fn from_unit(unit: &PackagingUnit, descriptor: &PluginDescriptor, root: &Path) -> Self {
        let plugin = &unit.config().plugin;
        let archive = unit.paths().archive(unit.module());
        Self {
            name: unit.display_name().to_string(),
            internal_name: unit.module().to_string(),
            version: plugin.version,
            description: plugin.description.clone(),
            authors: plugin.authors.clone(),
            status: plugin.status,
            language: plugin.language.clone(),
            tv_types: plugin.tv_types.clone(),
            icon_url: plugin.icon_url.clone(),
            api_version: plugin.api_version,
            file_size: descriptor.file_size(),
            jar_file_size: descriptor.jar_file_size(),
            path: relative_path(&archive, root),
        }
    }
}

fn relative_path(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Append-only list of archive records, shared by every unit in a session.
#[derive(Debug, Default)]
pub struct ArchiveRegistry {
    records: Mutex<Vec<ArchiveRecord>>,
}

impl ArchiveRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn append(&self, record: ArchiveRecord) {
        self.records.lock().push(record);
    }

    /// Snapshot of the records in append order.
    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.records.lock().clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no archive was registered.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Whether a record exists for the module.
    pub fn contains(&self, internal_name: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.internal_name == internal_name)
    }

    /// Serialize every record to `path`, sorted by module name so the
    /// output does not depend on completion order. Returns the record count.
    pub fn write_index(&self, path: &Path) -> Result<usize> {
        let mut records = self.records();
        records.sort_by(|a, b| a.internal_name.cmp(&b.internal_name));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(&records)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))?;

        info!("Created {}", path.display());
        Ok(records.len())
    }
}

/// Location of the aggregate index for a session rooted at `root`.
pub fn index_path(root: &Path, build_dir: &str, index_file: &str) -> PathBuf {
    root.join(build_dir).join(index_file)
}
