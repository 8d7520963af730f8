//! Locating external tools and collecting their output

use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use sv_core::{Error, Result};
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;

/// Find an executable named `name` on `PATH`
pub fn locate(name: &str) -> Result<PathBuf> {
    let path = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| Error::EnvironmentPrecondition(format!("{} must be in PATH", name)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Run a tool to completion and return its stdout
///
/// A non-zero exit is reported as a filesystem access failure on `subject`,
/// carrying the tool's stderr.
pub(crate) async fn output(program: &Path, args: &[&str], subject: &Path) -> Result<String> {
    tracing::debug!("Running {} {}", program.display(), args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            Error::EnvironmentPrecondition(format!("Failed to execute {}: {}", program.display(), e))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::filesystem_access(
            subject,
            format!("{} {} ({}): {}", program.display(), args.join(" "), output.status, stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Drain a child's stderr in the background so it can never fill its pipe
pub(crate) fn drain_stderr(stderr: Option<ChildStderr>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut collected = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut collected).await;
        }
        collected
    })
}
