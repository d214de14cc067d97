//! # cs3-packager
//!
//! Packaging pipeline that turns compiled plugin modules into `.cs3`
//! archives for the host application.
//!
//! Each packaging unit (a directory with a `cs3.toml`) goes through a fixed
//! stage graph:
//! - **compileDex** - convert class files to dex with desugaring and find the
//!   single class carrying the plugin marker annotation
//! - **compilePluginJar** / **ensureJarCompatibility** - optionally copy the
//!   linked jar as a cross-platform companion and audit its module
//!   dependencies
//! - **compileResources** - optionally compile and link Android resources
//! - **manifest** / **make** - write `manifest.json` and assemble a
//!   reproducible archive
//! - **register** - record the archive for the session's `plugins.json`
//!
//! Stages whose inputs are unchanged are skipped, failures block only the
//! dependent stages of the same unit, and units build concurrently.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cs3_packager::{PackagerConfig, PackagingSession};
//!
//! let session = PackagingSession::new(".", PackagerConfig::default());
//! let report = session.run_all()?;
//! assert!(report.success());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod archive;
mod audit;
mod cache;
mod classfile;
mod compiler;
mod config;
mod deploy;
mod descriptor;
mod error;
mod lifecycle;
mod manifest;
mod pipeline;
mod portable;
mod project;
mod registry;
mod resources;
mod scanner;
mod sdk;
mod session;
mod tools;

pub use archive::{write_archive, ArchiveContents, MakeArchiveTask, DEX_ENTRY, MANIFEST_ENTRY};
pub use audit::{check_report, AnalyzerOutput, AuditOutcome, EnsureJarCompatibilityTask, Jdeps, ModuleAnalyzer};
pub use cache::{Fingerprint, StageCache};
pub use classfile::{parse_class, ClassFormatError, ClassInfo};
pub use compiler::{CompileDexTask, D8Converter, DexConverter, DexRequest};
pub use config::{
    PackagerConfig, ToolPaths, CONFIG_FILE_NAME, DEFAULT_DEVICE_PLUGIN_DIR, DEFAULT_RESTRICTED_PREFIX,
};
pub use deploy::{deploy, Adb, DeviceBridge};
pub use descriptor::{PluginClassFile, PluginDescriptor};
pub use error::{Error, ErrorCategory, Result};
pub use lifecycle::{BuildEvent, BuildHooks, Stage, StageState};
pub use manifest::{ManifestBuilder, MakeManifestTask, PluginManifest};
pub use pipeline::{Toolchain, UnitFailure, UnitPipeline, UnitReport};
pub use portable::CompilePluginJarTask;
pub use project::{
    discover_units, BuildSection, PackagingUnit, PluginSection, ProjectConfig, ProjectLoader,
    UnitPaths, PROJECT_FILE_NAME,
};
pub use registry::{index_path, ArchiveRecord, ArchiveRegistry};
pub use resources::{Aapt2, CompileResourcesTask, LinkRequest, ResourceCompiler};
pub use scanner::{collect_classes, AnnotationScanner, ClassInput, DEFAULT_PLUGIN_MARKER};
pub use sdk::{probe, AndroidSdk, LegacySdk, LegacySdkConfig, ModernSdk, ModernSdkConfig};
pub use session::{PackagingSession, SessionReport};

/// Crate version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
