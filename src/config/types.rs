//! Configuration data types for sandjob.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Image used when neither the file, environment, nor CLI names one.
pub const DEFAULT_IMAGE: &str = "python-sandbox:latest";

/// Database used when no `database_url` is configured.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://sandjob.db";

/// Platform-wide limits applied to every sandbox.
///
/// These are fixed per deployment. Per-job limits supplied at submission time
/// are recorded but never override these values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Memory ceiling in bytes. Swap is capped at the same value.
    pub memory_limit_bytes: i64,

    /// CFS scheduler period in microseconds.
    pub cpu_period: i64,

    /// CFS quota in microseconds per period. Equal to `cpu_period` for one core.
    pub cpu_quota: i64,

    /// Engine network mode. Only `none` is accepted: sandboxes never get
    /// ingress or egress.
    pub network_mode: String,

    /// Named volume mounted at `/workspace` in every sandbox.
    pub workspace_volume: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 512 * 1024 * 1024,
            cpu_period: 100_000,
            cpu_quota: 100_000,
            network_mode: String::from(SANDBOX_NETWORK_MODE),
            workspace_volume: String::from("job-storage"),
        }
    }
}

/// The only network mode a sandbox may run with.
pub const SANDBOX_NETWORK_MODE: &str = "none";

impl SandboxConfig {
    /// Check the limits against the isolation guarantees every sandbox
    /// carries: a positive memory ceiling, exactly one core
    /// (`cpu_quota == cpu_period`), no network, and a named workspace volume.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        first_invalid(&[
            (
                "sandbox.memory_limit_bytes",
                self.memory_limit_bytes > 0,
                "must be greater than zero",
            ),
            (
                "sandbox.cpu_period",
                self.cpu_period > 0,
                "must be greater than zero",
            ),
            (
                "sandbox.cpu_quota",
                self.cpu_quota == self.cpu_period,
                "must equal sandbox.cpu_period (one full core)",
            ),
            (
                "sandbox.network_mode",
                self.network_mode == SANDBOX_NETWORK_MODE,
                "must be \"none\"; sandboxes have no network access",
            ),
            (
                "sandbox.workspace_volume",
                !self.workspace_volume.trim().is_empty(),
                "cannot be empty",
            ),
        ])
    }
}

/// Host-side storage locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding per-job artifact directories and input files.
    pub root: Utf8PathBuf,

    /// Directory under which per-job staging areas are created. Defaults to
    /// the system temporary directory.
    pub staging_root: Option<Utf8PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("/app/storage"),
            staging_root: None,
        }
    }
}

impl StorageConfig {
    /// Resolve the staging root, falling back to the system temporary
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when the temporary directory path is
    /// not valid UTF-8.
    pub fn resolved_staging_root(&self) -> Result<Utf8PathBuf> {
        if let Some(ref root) = self.staging_root {
            return Ok(root.clone());
        }

        Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|path| {
            ConfigError::InvalidValue {
                field: String::from("storage.staging_root"),
                reason: format!("temporary directory is not UTF-8: {}", path.display()),
            }
            .into()
        })
    }
}

/// Queue worker behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds to sleep when the queue is empty or a poll fails.
    pub poll_interval_secs: u64,

    /// Upper bound in seconds for fetching one external data URL at
    /// submission time.
    pub fetch_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            fetch_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Fetch timeout as a [`Duration`].
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Root application configuration.
///
/// Loaded from configuration files, environment variables, and command-line
/// arguments with layered precedence (lowest to highest): defaults,
/// configuration file, environment variables, command-line arguments.
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `SANDJOB_CONFIG_PATH` environment variable
/// 2. `.sandjob.toml` in the current working directory
/// 3. `.sandjob.toml` in the home directory
/// 4. `~/.config/sandjob/config.toml` (XDG default)
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(
    prefix = "SANDJOB",
    post_merge_hook,
    discovery(
        app_name = "sandjob",
        env_var = "SANDJOB_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".sandjob.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct AppConfig {
    /// The container engine socket path or URL.
    pub engine_socket: Option<String>,

    /// The trusted base image every sandbox is created from.
    pub image: Option<String>,

    /// Connection URL of the job store database.
    pub database_url: Option<String>,

    /// Sandbox resource limits.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub sandbox: SandboxConfig,

    /// Storage locations.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub storage: StorageConfig,

    /// Worker behaviour.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub worker: WorkerConfig,
}

impl AppConfig {
    /// The configured image, or [`DEFAULT_IMAGE`].
    #[must_use]
    pub fn image_or_default(&self) -> &str {
        non_blank(self.image.as_deref()).unwrap_or(DEFAULT_IMAGE)
    }

    /// The configured database URL, or [`DEFAULT_DATABASE_URL`].
    #[must_use]
    pub fn database_url_or_default(&self) -> &str {
        non_blank(self.database_url.as_deref()).unwrap_or(DEFAULT_DATABASE_URL)
    }

    /// Validates values that would make the worker misbehave at runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.sandbox.validate()?;
        first_invalid(&[(
            "worker.poll_interval_secs",
            self.worker.poll_interval_secs > 0,
            "must be greater than zero",
        )])
    }
}

fn first_invalid(checks: &[(&str, bool, &str)]) -> Result<()> {
    match checks.iter().find(|(_, ok, _)| !ok) {
        Some((field, _, reason)) => Err(ConfigError::InvalidValue {
            field: String::from(*field),
            reason: String::from(*reason),
        }
        .into()),
        None => Ok(()),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

impl PostMergeHook for AppConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        // Blank strings from env or CLI mean "unset".
        for value in [&mut self.engine_socket, &mut self.image, &mut self.database_url] {
            if value.as_deref().is_some_and(|text| text.trim().is_empty()) {
                *value = None;
            }
        }
        Ok(())
    }
}
