//! External tool lookup and invocation.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use crate::error::{Error, Result};

/// Resolve an executable: explicit path, then the SDK directory, then the
/// bare name for a `PATH` lookup.
pub fn resolve(configured: Option<&Path>, sdk_dir: Option<&Path>, name: &str) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }

    let file = executable_name(name);
    if let Some(dir) = sdk_dir {
        let candidate = dir.join(&file);
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from(file)
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        match name {
            "d8" => "d8.bat".to_string(),
            _ => format!("{}.exe", name),
        }
    } else {
        name.to_string()
    }
}

/// Run a tool to completion, capturing stdout and stderr.
///
/// Only a failure to spawn is an error; the exit status is left to the
/// caller.
pub fn run(program: &Path, args: &[String]) -> Result<Output> {
    debug!("Running {} {}", program.display(), args.join(" "));
    Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::tool(program.display().to_string(), e.to_string()))
}

/// Trimmed, lossy stderr of a finished process, for error messages.
pub fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Render a path as a command-line argument.
pub fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
