//! Queue-driven execution of submitted code in resource-limited containers.
//!
//! `sandjob` is the job execution engine behind a code-execution service.
//! Clients submit code, optional input files, and a package list; a worker
//! claims each queued job, runs it in an ephemeral container with fixed
//! memory, CPU, and network limits, and records its output together with
//! any files the code produced.
//!
//! # Architecture
//!
//! The worker holds two injected collaborators: a [`store::JobStore`] that is
//! the source of truth for job status, and an [`engine::SandboxRuntime`] that
//! talks to a Docker or Podman compatible engine. A job moves
//! `queued → running → completed | failed` exactly once, and its sandbox and
//! staging directory are removed on every exit path.
//!
//! # Modules
//!
//! - [`config`]: Configuration system with layered precedence (CLI > env > file > defaults)
//! - [`engine`]: Engine connection, sandbox lifecycle, and execution supervision
//! - [`error`]: Semantic error types for the application
//! - [`harvest`]: Discovery and persistence of generated artifacts
//! - [`job`]: Job and file records
//! - [`stage`]: Per-job staging directories and injected archives
//! - [`store`]: Job store trait with SQLite and in-memory implementations
//! - [`submit`]: Job submission and data reference resolution
//! - [`worker`]: The polling worker

pub mod config;
pub mod engine;
pub mod error;
pub mod harvest;
pub mod job;
pub mod stage;
pub mod store;
pub mod submit;
pub mod worker;
