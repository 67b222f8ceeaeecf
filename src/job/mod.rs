//! Job and file records shared by the store, the submitter, and the worker.
//!
//! A job moves through `queued → running → {completed | failed}` exactly
//! once. [`JobStatus::can_transition_to`] encodes that rule. The in-memory
//! store checks it before writing a status; the SQLite store expresses the
//! same rule as `WHERE status = ?` guards on each update.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Waiting to be claimed by a worker.
    Queued,
    /// Claimed; the sandbox is being prepared or is executing.
    Running,
    /// The sandbox exited with code zero.
    Completed,
    /// The sandbox exited non-zero or processing failed.
    Failed,
}

impl JobStatus {
    /// Text form stored in the job table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects the monotonic lifecycle.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running) | (Self::Running, Self::Completed | Self::Failed)
        )
    }

    /// Terminal status for a sandbox exit code.
    #[must_use]
    pub const fn from_exit_code(exit_code: i64) -> Self {
        if exit_code == 0 {
            Self::Completed
        } else {
            Self::Failed
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Decode {
                field: "status",
                message: format!("unknown job status '{other}'"),
            }),
        }
    }
}

/// A unit of submitted code plus its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Job identifier.
    pub id: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Source code written to the sandbox entrypoint.
    pub code: String,
    /// Data references as submitted, in order.
    pub data_references: Vec<String>,
    /// Packages installed before the entrypoint runs, in order.
    pub packages: Vec<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When a worker claimed the job.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Combined sandbox output.
    pub stdout: Option<String>,
    /// Engine error text or the processing failure message.
    pub stderr: Option<String>,
    /// Whole seconds between `started_at` and completion.
    pub execution_time: Option<i64>,
    /// Serialised resource-usage snapshot.
    pub resource_usage: Option<String>,
}

impl Job {
    /// Build a freshly queued job with a new identifier.
    #[must_use]
    pub fn queued(
        code: impl Into<String>,
        data_references: Vec<String>,
        packages: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            code: code.into(),
            data_references,
            packages,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            stdout: None,
            stderr: None,
            execution_time: None,
            resource_usage: None,
        }
    }

    /// Whole seconds elapsed between `started_at` and `now`, clamped at zero.
    ///
    /// Returns zero for a job that was never started.
    #[must_use]
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.started_at
            .map_or(0, |started| (now - started).num_seconds().max(0))
    }
}

/// Terminal fields written in one update when a job finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// `Completed` or `Failed`.
    pub status: JobStatus,
    /// Sanitised combined output.
    pub stdout: String,
    /// Sanitised engine error text, if any.
    pub stderr: Option<String>,
    /// Whole seconds of execution.
    pub execution_time: i64,
    /// Sanitised resource-usage snapshot.
    pub resource_usage: String,
    /// When the job finished.
    pub completed_at: DateTime<Utc>,
}

/// Terminal fields written when processing a job fails before a normal
/// outcome could be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    /// The failure message recorded as `stderr`.
    pub stderr: String,
    /// Whole seconds between `started_at` and the failure.
    pub execution_time: i64,
    /// When the failure was recorded.
    pub completed_at: DateTime<Utc>,
}

/// Metadata for an input or output file belonging to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// File identifier.
    pub id: String,
    /// Owning job identifier.
    pub job_id: String,
    /// Basename of the file.
    pub filename: String,
    /// MIME type.
    pub content_type: String,
    /// Absolute host path for inputs; `<job id>/<basename>` under the storage
    /// root for artifacts.
    pub file_path: String,
    /// Size in bytes.
    pub size: u64,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a record with a fresh identifier and the current timestamp.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        file_path: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            file_path: file_path.into(),
            size,
            created_at: Utc::now(),
        }
    }
}

/// A client-uploaded file that data references may name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Upload identifier, the last segment of `/api/files/<id>`.
    pub id: String,
    /// Original filename.
    pub filename: String,
    /// MIME type recorded at upload.
    pub content_type: String,
    /// Absolute host path of the stored bytes.
    pub file_path: String,
    /// Size in bytes.
    pub size: u64,
    /// When the upload was received.
    pub uploaded_at: DateTime<Utc>,
}
