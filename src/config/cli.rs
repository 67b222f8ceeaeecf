//! Command-line argument definitions for sandjob.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Command-line interface for sandjob.
#[derive(Debug, Parser)]
#[command(name = "sandjob")]
#[command(
    author,
    version,
    about = "Queue-driven execution of submitted code in resource-limited containers"
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Container engine socket path or URL.
    #[arg(long, global = true)]
    pub engine_socket: Option<String>,

    /// Sandbox image to use.
    #[arg(long, global = true)]
    pub image: Option<String>,

    /// Job store database URL.
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Poll the queue and execute jobs until interrupted.
    Worker,

    /// Submit a new job to the queue.
    Submit(SubmitArgs),

    /// Show a job's status, output, and files.
    Status(StatusArgs),
}

/// Arguments for the `submit` subcommand.
#[derive(Debug, Parser)]
pub struct SubmitArgs {
    /// File containing the code to run.
    #[arg(long, required = true)]
    pub code_file: Utf8PathBuf,

    /// Package to install before running (repeatable).
    #[arg(long = "package")]
    pub packages: Vec<String>,

    /// Data reference: an upload path (`/api/files/<id>`) or a URL (repeatable).
    #[arg(long = "data")]
    pub data: Vec<String>,
}

/// Arguments for the `status` subcommand.
#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Job identifier.
    #[arg(required = true)]
    pub job_id: String,
}
