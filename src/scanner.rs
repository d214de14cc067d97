//! Class input collection and entry-class discovery.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::classfile::parse_class;
use crate::error::{Error, Result};

/// Descriptor of the default plugin marker annotation.
pub const DEFAULT_PLUGIN_MARKER: &str = "Lcom/lagradost/cloudstream3/plugins/CloudstreamPlugin;";

/// A single compiled class, read from a class directory or a jar.
#[derive(Debug, Clone)]
pub struct ClassInput {
    /// Input root the class was found in (directory or jar file).
    pub root: PathBuf,
    /// Path of the class relative to its root, `/`-separated.
    pub entry: String,
    /// Raw class file bytes.
    pub bytes: Vec<u8>,
}

impl ClassInput {
    /// Location used in error messages: the file path for directories,
    /// `jar!/entry` for archives.
    pub fn location(&self) -> PathBuf {
        if self.root.is_dir() {
            self.root.join(&self.entry)
        } else {
            PathBuf::from(format!("{}!/{}", self.root.display(), self.entry))
        }
    }
}

/// Collect every `.class` file below the given roots.
///
/// Roots may be directories or jar/zip files. Missing roots are skipped; the
/// result is ordered by root, then by entry path, so repeated runs see the
/// same sequence.
pub fn collect_classes(roots: &[PathBuf]) -> Result<Vec<ClassInput>> {
    let mut classes = Vec::new();

    for root in roots {
        if root.is_dir() {
            collect_from_dir(root, &mut classes)?;
        } else if root.is_file() {
            collect_from_jar(root, &mut classes)?;
        } else {
            debug!("Class input {} does not exist, skipping", root.display());
        }
    }

    debug!("Collected {} class files from {} roots", classes.len(), roots.len());
    Ok(classes)
}

fn collect_from_dir(root: &Path, out: &mut Vec<ClassInput>) -> Result<()> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            Error::io(&path, e.into())
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_class_file(path) {
            continue;
        }

        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        found.push(ClassInput {
            root: root.to_path_buf(),
            entry: relative,
            bytes,
        });
    }

    found.sort_by(|a, b| a.entry.cmp(&b.entry));
    out.extend(found);
    Ok(())
}

fn collect_from_jar(jar: &Path, out: &mut Vec<ClassInput>) -> Result<()> {
    let file = fs::File::open(jar).map_err(|e| Error::io(jar, e))?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut found = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() || !entry.name().ends_with(".class") {
            continue;
        }
        // module-info and multi-release overlays are not plugin classes.
        if entry.name().ends_with("module-info.class") || entry.name().starts_with("META-INF/") {
            continue;
        }

        let name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| Error::io(jar, e))?;

        found.push(ClassInput {
            root: jar.to_path_buf(),
            entry: name,
            bytes,
        });
    }

    found.sort_by(|a, b| a.entry.cmp(&b.entry));
    out.extend(found);
    Ok(())
}

fn is_class_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("class")
}

/// Scanner that finds the single class carrying the plugin marker.
#[derive(Debug, Clone)]
pub struct AnnotationScanner {
    marker: String,
}

impl AnnotationScanner {
    /// Create a scanner for the given annotation descriptor
    /// (`Lpkg/Name;` form).
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// The annotation descriptor this scanner looks for.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Scan classes and return the dotted name of the marked class, if any.
    ///
    /// Fails as soon as a second marked class is seen.
    pub fn scan(&self, classes: &[ClassInput]) -> Result<Option<String>> {
        let mut detected: Option<String> = None;

        for class in classes {
            if class.entry.ends_with("module-info.class") {
                continue;
            }

            let info = parse_class(&class.bytes)
                .map_err(|e| Error::class_format(class.location(), e.0))?;

            if !info.has_annotation(&self.marker) {
                continue;
            }

            let name = info.dotted_name();
            debug!("Found plugin class {} in {}", name, class.location().display());

            if let Some(first) = detected {
                return Err(Error::multiple_plugin_classes(first, name));
            }
            detected = Some(name);
        }

        Ok(detected)
    }

    /// Collect classes from the given roots and scan them.
    pub fn scan_roots(&self, roots: &[PathBuf]) -> Result<Option<String>> {
        let classes = collect_classes(roots)?;
        self.scan(&classes)
    }
}

impl Default for AnnotationScanner {
    fn default() -> Self {
        Self::new(DEFAULT_PLUGIN_MARKER)
    }
}
