//! `sandjob` application entry point.
//!
//! The binary runs the queue worker, submits jobs, and reports job status. It
//! uses `eyre` for opaque error handling at the application boundary,
//! converting domain-specific errors into human-readable reports.
//!
//! Configuration is loaded with layered precedence via `OrthoConfig`:
//! 1. Application defaults
//! 2. Configuration file (`~/.config/sandjob/config.toml` or path from `SANDJOB_CONFIG_PATH`)
//! 3. Environment variables (`SANDJOB_*`)
//! 4. Command-line arguments

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use clap::Parser;
use eyre::{Report, Result as EyreResult};
use mockable::DefaultEnv;
use sandjob::config::{AppConfig, Cli, Commands, StatusArgs, SubmitArgs, load_config};
use sandjob::engine::{EngineConnector, SocketResolver};
use sandjob::error::{FilesystemError, Result as SandjobResult, StoreError};
use sandjob::store::{JobStore, SqliteJobStore};
use sandjob::submit::{HttpFetcher, JobRequest, JobSubmitter};
use sandjob::worker::{Worker, WorkerSettings};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application entry point.
///
/// Installs the log subscriber, loads configuration with layered precedence
/// via `OrthoConfig`, then dispatches to the subcommand handler on a Tokio
/// runtime.
fn main() -> EyreResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli).map_err(Report::from)?;
    config.validate().map_err(Report::from)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(&cli, &config)).map_err(Report::from)
}

/// Execute the CLI command, returning domain-specific errors.
async fn run(cli: &Cli, config: &AppConfig) -> SandjobResult<()> {
    let store = open_store(config).await?;

    match &cli.command {
        Commands::Worker => run_worker(config, store).await,
        Commands::Submit(args) => submit_job(config, store, args).await,
        Commands::Status(args) => show_status(&store, args).await,
    }
}

async fn open_store(config: &AppConfig) -> SandjobResult<SqliteJobStore> {
    let store = SqliteJobStore::connect(config.database_url_or_default()).await?;
    store.ensure_schema().await?;
    Ok(store)
}

/// Poll and execute jobs until Ctrl-C.
async fn run_worker(config: &AppConfig, store: SqliteJobStore) -> SandjobResult<()> {
    let env = DefaultEnv::new();
    let resolver = SocketResolver::new(&env);
    let docker =
        EngineConnector::connect_and_verify(config.engine_socket.as_deref(), &resolver).await?;

    let worker = Worker::new(docker, store, WorkerSettings::from_config(config)?);
    worker
        .run_until(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "cannot listen for Ctrl-C; stopping");
            }
            info!("shutdown requested; finishing the current job");
        })
        .await;
    Ok(())
}

/// Queue a job and print its identifier.
#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
async fn submit_job(
    config: &AppConfig,
    store: SqliteJobStore,
    args: &SubmitArgs,
) -> SandjobResult<()> {
    let code = read_code(&args.code_file)?;
    let fetcher = HttpFetcher::new(config.worker.fetch_timeout())?;
    let submitter = JobSubmitter::new(store, fetcher, config.storage.root.clone());

    let receipt = submitter
        .submit(JobRequest {
            code,
            data_references: args.data.clone(),
            packages: args.packages.clone(),
            ..JobRequest::default()
        })
        .await?;

    println!("{}", receipt.job_id);
    for input in &receipt.inputs {
        println!("  input {} ({}, {} bytes)", input.filename, input.content_type, input.size);
    }
    Ok(())
}

/// Print a job's status, output, and file records.
#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
async fn show_status(store: &SqliteJobStore, args: &StatusArgs) -> SandjobResult<()> {
    let job = store
        .find_job(&args.job_id)
        .await?
        .ok_or_else(|| StoreError::JobNotFound {
            job_id: args.job_id.clone(),
        })?;
    let files = store.list_files(&job.id).await?;

    println!("job:      {}", job.id);
    println!("status:   {}", job.status);
    println!("created:  {}", job.created_at);
    if let Some(started) = job.started_at {
        println!("started:  {started}");
    }
    if let Some(completed) = job.completed_at {
        println!("finished: {completed}");
    }
    if let Some(seconds) = job.execution_time {
        println!("duration: {seconds}s");
    }
    if let Some(ref stdout) = job.stdout {
        println!("--- stdout ---\n{stdout}");
    }
    if let Some(ref stderr) = job.stderr {
        println!("--- stderr ---\n{stderr}");
    }
    for file in files {
        println!(
            "file {} {} ({}, {} bytes)",
            file.id, file.filename, file.content_type, file.size
        );
    }
    Ok(())
}

fn read_code(path: &Utf8Path) -> SandjobResult<String> {
    let io_failed = |error: std::io::Error| FilesystemError::IoError {
        path: path.as_std_path().to_path_buf(),
        message: error.to_string(),
    };

    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| FilesystemError::NotFound {
        path: path.as_std_path().to_path_buf(),
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(io_failed)?;
    dir.read_to_string(file_name)
        .map_err(|error| io_failed(error).into())
}
