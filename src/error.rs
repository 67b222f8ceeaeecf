//! Semantic error types for the sandjob engine.
//!
//! This module defines the error hierarchy for sandjob, following the principle
//! of using semantic error enums (via `thiserror`) for conditions the caller
//! might inspect or record against a job, while reserving opaque errors
//! (`eyre::Report`) for the binary boundary.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A required configuration value is missing.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The `OrthoConfig` library returned an error during configuration loading.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Errors raised while driving a sandbox through its lifecycle.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Failed to connect to the container engine socket.
    #[error("failed to connect to container engine: {message}")]
    ConnectionFailed {
        /// A description of the connection failure.
        message: String,
    },

    /// The engine refused to provision the sandbox.
    #[error("failed to create sandbox: {message}")]
    CreateFailed {
        /// A description of the creation failure.
        message: String,
    },

    /// Failed to inject an archive into the sandbox.
    #[error("failed to upload archive to '{destination}' in sandbox '{sandbox_id}': {message}")]
    UploadFailed {
        /// The ID of the target sandbox.
        sandbox_id: String,
        /// The in-sandbox destination path.
        destination: String,
        /// A description of the upload failure.
        message: String,
    },

    /// Failed to start the sandbox.
    #[error("failed to start sandbox '{sandbox_id}': {message}")]
    StartFailed {
        /// The ID of the sandbox that failed to start.
        sandbox_id: String,
        /// A description of the start failure.
        message: String,
    },

    /// Waiting for the sandbox to exit failed.
    #[error("failed waiting for sandbox '{sandbox_id}': {message}")]
    WaitFailed {
        /// The ID of the sandbox.
        sandbox_id: String,
        /// A description of the wait failure.
        message: String,
    },

    /// Collecting logs or stats from the sandbox failed.
    #[error("failed to collect {what} from sandbox '{sandbox_id}': {message}")]
    CollectFailed {
        /// The ID of the sandbox.
        sandbox_id: String,
        /// What was being collected (`logs`, `stats`).
        what: &'static str,
        /// A description of the failure.
        message: String,
    },

    /// A lifecycle operation was attempted from the wrong state.
    #[error("sandbox '{sandbox_id}' cannot {operation} while {state}")]
    InvalidTransition {
        /// The ID of the sandbox.
        sandbox_id: String,
        /// The attempted operation.
        operation: &'static str,
        /// The state the sandbox was in.
        state: String,
    },
}

/// Errors raised by a job store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database rejected or failed a query.
    #[error("job store query failed during {operation}: {message}")]
    QueryFailed {
        /// The store operation being performed.
        operation: &'static str,
        /// A description of the failure.
        message: String,
    },

    /// A stored row could not be decoded into a domain value.
    #[error("job store returned an invalid {field}: {message}")]
    Decode {
        /// The column that failed to decode.
        field: &'static str,
        /// A description of the decode failure.
        message: String,
    },

    /// A job expected to exist was not found.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The missing job identifier.
        job_id: String,
    },
}

/// Errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FilesystemError {
    /// A file or directory was not found.
    #[error("path not found: {path}")]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// An I/O error occurred.
    #[error("I/O error at '{path}': {message}")]
    IoError {
        /// The path where the error occurred.
        path: PathBuf,
        /// A description of the I/O error.
        message: String,
    },
}

/// Errors raised while accepting a new job.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The request carried no code to run.
    #[error("code is required")]
    MissingCode,

    /// A data reference could not be resolved to bytes.
    #[error("failed to resolve data reference '{reference}': {message}")]
    FetchFailed {
        /// The reference as submitted.
        reference: String,
        /// A description of the failure.
        message: String,
    },
}

/// Top-level error type for the sandjob engine.
///
/// This enum aggregates all domain-specific errors into a single type. The
/// worker records its display text as a failed job's `stderr`; the binary
/// converts it to `eyre::Report`.
#[derive(Debug, Error)]
pub enum SandjobError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred while driving a sandbox.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// An error occurred in the job store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An error occurred during filesystem operations.
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    /// An error occurred while submitting a job.
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// A specialised `Result` type for sandjob operations.
pub type Result<T> = std::result::Result<T, SandjobError>;
