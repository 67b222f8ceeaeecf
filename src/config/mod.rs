//! Configuration system for sandjob.
//!
//! This module provides the configuration structures and CLI definitions for
//! the sandjob engine. Configuration loading and precedence merging is handled
//! by the `ortho_config` crate. Precedence: CLI flags override environment
//! variables, which override configuration files, which override defaults.
//!
//! The configuration file is expected at `~/.config/sandjob/config.toml` by
//! default.
//!
//! # Example Configuration
//!
//! ```toml
//! engine_socket = "unix:///var/run/docker.sock"
//! image = "python-sandbox:latest"
//! database_url = "sqlite:///var/lib/sandjob/jobs.db"
//!
//! [sandbox]
//! memory_limit_bytes = 536870912
//! cpu_period = 100000
//! cpu_quota = 100000
//! network_mode = "none"
//! workspace_volume = "job-storage"
//!
//! [storage]
//! root = "/app/storage"
//!
//! [worker]
//! poll_interval_secs = 5
//! fetch_timeout_secs = 30
//! ```

mod cli;
mod loader;
mod types;


pub use cli::{Cli, Commands, StatusArgs, SubmitArgs};
pub use loader::{env_var_names, load_config};
pub use types::{
    AppConfig, DEFAULT_DATABASE_URL, DEFAULT_IMAGE, SANDBOX_NETWORK_MODE, SandboxConfig,
    StorageConfig, WorkerConfig,
};
