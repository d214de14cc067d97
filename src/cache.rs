//! Input fingerprints and the per-unit up-to-date cache.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// SHA-256 over a stage's declared inputs.
///
/// Every item is length-prefixed so adjacent values cannot run together.
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    /// Start a fingerprint for the named stage.
    pub fn new(stage: &str) -> Self {
        let mut fp = Self {
            hasher: Sha256::new(),
        };
        fp.feed(b"stage", stage.as_bytes());
        fp
    }

    fn feed(&mut self, key: &[u8], value: &[u8]) {
        self.hasher.update((key.len() as u64).to_le_bytes());
        self.hasher.update(key);
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
    }

    /// Add a named scalar input.
    pub fn value(mut self, key: &str, value: impl AsRef<[u8]>) -> Self {
        self.feed(key.as_bytes(), value.as_ref());
        self
    }

    /// Add a file's contents. Absent files hash as a distinct marker.
    pub fn file(mut self, path: &Path) -> Result<Self> {
        let key = path.to_string_lossy().into_owned();
        if path.is_file() {
            let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
            self.feed(key.as_bytes(), &bytes);
        } else {
            self.feed(key.as_bytes(), b"\0absent");
        }
        Ok(self)
    }

    /// Add a directory tree (every regular file, sorted) or a single file.
    pub fn tree(mut self, root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return self.file(root);
        }

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                Error::io(&path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let bytes = fs::read(entry.path()).map_err(|e| Error::io(entry.path(), e))?;
            self.feed(relative.to_string_lossy().as_bytes(), &bytes);
        }
        Ok(self)
    }

    /// Finish as a lowercase hex digest.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Last successful fingerprint per stage, persisted as JSON.
#[derive(Debug)]
pub struct StageCache {
    path: PathBuf,
    enabled: bool,
    entries: Mutex<BTreeMap<String, String>>,
}

impl StageCache {
    /// Load the cache file. A missing or unreadable file starts empty.
    ///
    /// With `enabled = false` nothing is ever considered up to date, but
    /// successful fingerprints are still recorded.
    pub fn load(path: impl Into<PathBuf>, enabled: bool) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring corrupt stage cache {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self {
            path,
            enabled,
            entries: Mutex::new(entries),
        }
    }

    /// Whether `stage` last succeeded with `fingerprint` and all of its
    /// outputs still exist.
    pub fn is_up_to_date(&self, stage: &str, fingerprint: &str, outputs: &[PathBuf]) -> bool {
        if !self.enabled {
            return false;
        }
        let matches = self
            .entries
            .lock()
            .get(stage)
            .map(|recorded| recorded == fingerprint)
            .unwrap_or(false);
        let up_to_date = matches && outputs.iter().all(|p| p.exists());
        debug!("Stage {} up to date: {}", stage, up_to_date);
        up_to_date
    }

    /// Record a successful run and persist the cache.
    pub fn record(&self, stage: &str, fingerprint: String) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(stage.to_string(), fingerprint);
        self.persist(&entries)
    }

    /// Forget a stage so it runs next time.
    pub fn invalidate(&self, stage: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(stage).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json).map_err(|e| Error::io(&self.path, e))
    }
}
