//! One-shot subprocess execution for plugins.

use std::{process::Stdio, time::Duration};

use {
    serde::Serialize,
    tokio::process::Command,
    tracing::{debug, warn},
};

use crate::error::{Context, Error, Result};

pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

/// Run `program` with `args`, no shell involved. The child is killed if it
/// outlives `timeout`.
pub async fn exec(program: &str, args: &[String], timeout: Option<Duration>) -> Result<ExecOutput> {
    if program.trim().is_empty() {
        return Err(Error::message("exec: empty program"));
    }
    let timeout = timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT);
    debug!(program, args = args.len(), timeout_secs = timeout.as_secs(), "exec");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn '{program}'"))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            warn!(program, timeout_secs = timeout.as_secs(), "exec timed out");
            return Err(Error::message(format!(
                "'{program}' timed out after {}s",
                timeout.as_secs()
            )));
        },
    };

    Ok(ExecOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    })
}
