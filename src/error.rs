//! Error types for packaging operations.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while packaging a unit.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete project configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// More than one class carries the plugin marker annotation.
    #[error(
        "only one active plugin class per packaging unit is supported: found {first} and {second}"
    )]
    MultiplePluginClasses {
        /// Entry class recorded first.
        first: String,
        /// Entry class that triggered the violation.
        second: String,
    },

    /// The cross-platform jar depends on host-platform modules.
    #[error(
        "the cross-platform jar {} contains '{prefix}' imports, which will break it outside the host platform.\n\
         Remove 'cross_platform = true' or remove the platform-specific imports.",
        .jar.display()
    )]
    ForbiddenImports {
        /// Audited jar.
        jar: PathBuf,
        /// Restricted module prefix that was found.
        prefix: String,
    },

    /// Malformed class file.
    #[error("invalid class file {}: {message}", .path.display())]
    ClassFormat {
        /// Class file (or jar entry) that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Bytecode to dex conversion failed.
    #[error("dex conversion failed: {0}")]
    Conversion(String),

    /// Resource compilation failed.
    #[error("resource compilation failed: {0}")]
    ResourceCompilation(String),

    /// An external tool could not be run.
    #[error("failed to run {tool}: {message}")]
    Tool {
        /// Tool name or path.
        tool: String,
        /// Failure description.
        message: String,
    },

    /// Device deployment failed.
    #[error("deployment failed: {0}")]
    Deploy(String),

    /// IO error on a known path.
    #[error("io error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Zip archive error.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// `cs3.toml` or `packager.toml` could not be parsed.
    #[error("parse error in {}: {message}", .path.display())]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Required entry class was never detected.
    #[error("no plugin class found in {0}; annotate exactly one class with the plugin marker")]
    MissingEntryClass(String),
}

/// Broad error classes used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Raised before any stage runs.
    Configuration,
    /// More than one entry class.
    Multiplicity,
    /// Forbidden imports in the portable jar.
    Compatibility,
    /// External tool failures.
    Tool,
    /// Filesystem failures.
    Io,
    /// Malformed inputs.
    Format,
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a multiplicity error.
    pub fn multiple_plugin_classes(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self::MultiplePluginClasses {
            first: first.into(),
            second: second.into(),
        }
    }

    /// Create a forbidden imports error.
    pub fn forbidden_imports(jar: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self::ForbiddenImports {
            jar: jar.into(),
            prefix: prefix.into(),
        }
    }

    /// Create a class format error.
    pub fn class_format(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::ClassFormat {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a tool error.
    pub fn tool(tool: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: msg.into(),
        }
    }

    /// Attach a path to an IO error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a parse error.
    pub fn parse(path: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            message: msg.into(),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::Parse { .. } | Self::MissingEntryClass(_) => {
                ErrorCategory::Configuration
            }
            Self::MultiplePluginClasses { .. } => ErrorCategory::Multiplicity,
            Self::ForbiddenImports { .. } => ErrorCategory::Compatibility,
            Self::Conversion(_) | Self::ResourceCompilation(_) | Self::Tool { .. } | Self::Deploy(_) => {
                ErrorCategory::Tool
            }
            Self::Io { .. } => ErrorCategory::Io,
            Self::ClassFormat { .. } | Self::Zip(_) | Self::Json(_) => ErrorCategory::Format,
        }
    }

    /// Returns true if this error was raised before any stage ran.
    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}
