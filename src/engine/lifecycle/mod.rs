//! Sandbox creation with fixed platform limits and an ordered lifecycle.
//!
//! A [`Sandbox`] moves through `Created → Started → Exited(code) → Removed`.
//! Operations attempted out of order fail with
//! `SandboxError::InvalidTransition` before the engine is contacted.
//! Removal is best-effort: it logs engine errors instead of returning them,
//! so cleanup can run on every exit path.

use std::fmt;

use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{CreateContainerOptions, CreateContainerOptionsBuilder};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::runtime::{ArchiveStream, SandboxExit, SandboxRuntime};
use crate::config::{SANDBOX_NETWORK_MODE, SandboxConfig};
use crate::error::{ConfigError, SandboxError, SandjobError};

/// Working directory of every sandbox and mount point of the shared volume.
pub const WORKSPACE_DIR: &str = "/workspace";

/// Directory input files are injected into.
pub const DATA_DIR: &str = "/data";

/// The sandbox entrypoint command, with an optional install prefix.
#[must_use]
pub fn sandbox_command(install_prefix: &str) -> Vec<String> {
    vec![
        String::from("sh"),
        String::from("-c"),
        format!("cd {WORKSPACE_DIR} && {install_prefix}python main.py"),
    ]
}

/// Parameters for creating one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    image: String,
    name: Option<String>,
    cmd: Vec<String>,
    limits: SandboxConfig,
}

impl SandboxSpec {
    /// Create a spec for `image` with the given platform limits and the
    /// plain entrypoint command.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingRequired` when `image` is empty or
    /// whitespace-only, and `ConfigError::InvalidValue` when `limits` would
    /// weaken sandbox isolation.
    pub fn new(image: impl Into<String>, limits: &SandboxConfig) -> Result<Self, SandjobError> {
        limits.validate()?;
        let image_value = image.into();
        let trimmed = image_value.trim();
        if trimmed.is_empty() {
            return Err(SandjobError::from(ConfigError::MissingRequired {
                field: String::from("image"),
            }));
        }

        Ok(Self {
            image: String::from(trimmed),
            name: None,
            cmd: sandbox_command(""),
            limits: limits.clone(),
        })
    }

    /// Attach an optional container name.
    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name.filter(|value| !value.trim().is_empty());
        self
    }

    /// Prefix the entrypoint with a dependency-install command.
    #[must_use]
    pub fn with_install_prefix(mut self, install_prefix: &str) -> Self {
        self.cmd = sandbox_command(install_prefix);
        self
    }

    /// Return the configured image.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Return the optional container name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Return the entrypoint command.
    #[must_use]
    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    fn create_options(&self) -> Option<CreateContainerOptions> {
        self.name()
            .map(|name| CreateContainerOptionsBuilder::new().name(name).build())
    }

    fn create_body(&self) -> ContainerCreateBody {
        ContainerCreateBody {
            image: Some(self.image.clone()),
            cmd: Some(self.cmd.clone()),
            working_dir: Some(String::from(WORKSPACE_DIR)),
            host_config: Some(self.host_config()),
            ..ContainerCreateBody::default()
        }
    }

    fn host_config(&self) -> HostConfig {
        let limits = &self.limits;
        HostConfig {
            memory: Some(limits.memory_limit_bytes),
            memory_swap: Some(limits.memory_limit_bytes),
            cpu_period: Some(limits.cpu_period),
            cpu_quota: Some(limits.cpu_quota),
            network_mode: Some(String::from(SANDBOX_NETWORK_MODE)),
            binds: Some(vec![format!(
                "{}:{WORKSPACE_DIR}",
                limits.workspace_volume
            )]),
            ..HostConfig::default()
        }
    }
}

/// Where a sandbox is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Created; archives may be injected.
    Created,
    /// Started and possibly still running.
    Started,
    /// The process exited with this code.
    Exited(i64),
    /// Removed from the engine.
    Removed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Started => f.write_str("started"),
            Self::Exited(code) => write!(f, "exited({code})"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// A live sandbox bound to the runtime that created it.
pub struct Sandbox<'r, R: SandboxRuntime + ?Sized> {
    runtime: &'r R,
    id: String,
    state: SandboxState,
}

impl<R: SandboxRuntime + ?Sized> fmt::Debug for Sandbox<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'r, R: SandboxRuntime + ?Sized> Sandbox<'r, R> {
    /// Create a sandbox from `spec`.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::CreateFailed` when the engine rejects the
    /// request. No sandbox exists afterwards.
    pub async fn create(runtime: &'r R, spec: &SandboxSpec) -> Result<Self, SandjobError> {
        let id = runtime
            .create(spec.create_options(), spec.create_body())
            .await
            .map_err(|error| {
                SandjobError::from(SandboxError::CreateFailed {
                    message: error.to_string(),
                })
            })?;

        info!(sandbox_id = %id, image = spec.image(), "sandbox created");
        Ok(Self {
            runtime,
            id,
            state: SandboxState::Created,
        })
    }

    /// Engine identifier of the sandbox.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SandboxState {
        self.state
    }

    /// Extract a tar archive at `destination` before the sandbox starts.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::InvalidTransition` unless the sandbox is
    /// `Created`, or `SandboxError::UploadFailed` when the engine rejects the
    /// archive.
    pub async fn put_archive(
        &self,
        destination: &str,
        archive: Vec<u8>,
    ) -> Result<(), SandjobError> {
        self.require("upload an archive", |state| state == SandboxState::Created)?;

        let size = archive.len();
        self.runtime
            .put_archive(&self.id, destination, archive)
            .await
            .map_err(|error| {
                SandjobError::from(SandboxError::UploadFailed {
                    sandbox_id: self.id.clone(),
                    destination: String::from(destination),
                    message: error.to_string(),
                })
            })?;

        debug!(sandbox_id = %self.id, destination, bytes = size, "archive injected");
        Ok(())
    }

    /// Start the sandbox process.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::InvalidTransition` unless the sandbox is
    /// `Created`, or `SandboxError::StartFailed` when the engine refuses.
    pub async fn start(&mut self) -> Result<(), SandjobError> {
        self.require("start", |state| state == SandboxState::Created)?;

        self.runtime.start(&self.id).await.map_err(|error| {
            SandjobError::from(SandboxError::StartFailed {
                sandbox_id: self.id.clone(),
                message: error.to_string(),
            })
        })?;

        self.state = SandboxState::Started;
        info!(sandbox_id = %self.id, "sandbox started");
        Ok(())
    }

    /// Block until the sandbox process exits. No timeout is applied.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::InvalidTransition` unless the sandbox is
    /// `Started`, or `SandboxError::WaitFailed` when the engine connection
    /// fails while waiting.
    pub async fn wait(&mut self) -> Result<SandboxExit, SandjobError> {
        self.require("wait", |state| state == SandboxState::Started)?;

        let exit = self.runtime.wait(&self.id).await.map_err(|error| {
            SandjobError::from(SandboxError::WaitFailed {
                sandbox_id: self.id.clone(),
                message: error.to_string(),
            })
        })?;

        self.state = SandboxState::Exited(exit.code);
        info!(sandbox_id = %self.id, exit_code = exit.code, "sandbox exited");
        Ok(exit)
    }

    /// Combined output of the exited sandbox.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::InvalidTransition` unless the sandbox has
    /// exited, or `SandboxError::CollectFailed` when the engine fails.
    pub async fn logs(&self) -> Result<Vec<u8>, SandjobError> {
        self.require("collect logs", |state| matches!(state, SandboxState::Exited(_)))?;

        self.runtime
            .logs(&self.id)
            .await
            .map_err(|error| self.collect_failed("logs", &error))
    }

    /// One-shot resource-usage snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::InvalidTransition` before the sandbox has
    /// started, or `SandboxError::CollectFailed` when the engine fails.
    pub async fn stats(&self) -> Result<Value, SandjobError> {
        self.require("collect stats", |state| {
            matches!(state, SandboxState::Started | SandboxState::Exited(_))
        })?;

        self.runtime
            .stats(&self.id)
            .await
            .map_err(|error| self.collect_failed("stats", &error))
    }

    /// Stream `source` out of the exited sandbox as tar bytes.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::InvalidTransition` unless the sandbox has
    /// exited.
    pub fn archive(&self, source: &str) -> Result<ArchiveStream<'r>, SandjobError> {
        self.require("read an archive", |state| {
            matches!(state, SandboxState::Exited(_))
        })?;

        Ok(self.runtime.get_archive(&self.id, source))
    }

    /// Force-remove the sandbox. Engine errors are logged, never returned.
    pub async fn remove(&mut self) {
        if self.state == SandboxState::Removed {
            return;
        }

        match self.runtime.remove(&self.id).await {
            Ok(()) => info!(sandbox_id = %self.id, "sandbox removed"),
            Err(error) => warn!(sandbox_id = %self.id, %error, "failed to remove sandbox"),
        }
        self.state = SandboxState::Removed;
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: impl Fn(SandboxState) -> bool,
    ) -> Result<(), SandjobError> {
        if allowed(self.state) {
            return Ok(());
        }

        Err(SandjobError::from(SandboxError::InvalidTransition {
            sandbox_id: self.id.clone(),
            operation,
            state: self.state.to_string(),
        }))
    }

    fn collect_failed(&self, what: &'static str, error: &bollard::errors::Error) -> SandjobError {
        SandjobError::from(SandboxError::CollectFailed {
            sandbox_id: self.id.clone(),
            what,
            message: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests;
