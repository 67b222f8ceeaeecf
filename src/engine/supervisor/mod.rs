//! Drives a created sandbox through start, wait, and output collection.

use tracing::{info, warn};

use super::lifecycle::Sandbox;
use super::runtime::{SandboxExit, SandboxRuntime};
use crate::error::SandjobError;
use crate::job::JobStatus;

/// What a finished sandbox produced, already sanitised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Exit code and engine error text.
    pub exit: SandboxExit,
    /// Combined stdout and stderr of the process.
    pub stdout: String,
    /// Engine error text attached to the exit.
    pub stderr: Option<String>,
    /// Serialised resource-usage snapshot.
    pub resource_usage: String,
}

impl ExecutionReport {
    /// `Completed` for exit code zero, `Failed` otherwise.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        JobStatus::from_exit_code(self.exit.code)
    }
}

/// Remove embedded NUL characters, which the job store cannot hold in text
/// columns.
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.replace('\0', "")
}

/// Start `sandbox`, wait for it to exit, and collect its output and a
/// resource-usage snapshot.
///
/// A failed stats call is logged and recorded as a `null` snapshot.
///
/// # Errors
///
/// Returns the lifecycle error if the sandbox cannot be started, waited on,
/// or have its logs read.
pub async fn supervise<R: SandboxRuntime + ?Sized>(
    sandbox: &mut Sandbox<'_, R>,
) -> Result<ExecutionReport, SandjobError> {
    sandbox.start().await?;
    let exit = sandbox.wait().await?;

    let raw_logs = sandbox.logs().await?;
    let stdout = sanitize(&String::from_utf8_lossy(&raw_logs));

    let snapshot = match sandbox.stats().await {
        Ok(value) => value,
        Err(error) => {
            warn!(sandbox_id = sandbox.id(), %error, "resource usage unavailable");
            serde_json::Value::Null
        }
    };
    let resource_usage = sanitize(&snapshot.to_string());

    info!(
        sandbox_id = sandbox.id(),
        exit_code = exit.code,
        output_bytes = stdout.len(),
        "sandbox output collected"
    );

    Ok(ExecutionReport {
        stderr: exit.error_message.as_deref().map(sanitize),
        exit,
        stdout,
        resource_usage,
    })
}
