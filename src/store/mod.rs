//! Durable job and file metadata behind an injectable trait.
//!
//! The worker and the submitter never talk to a database directly; they hold
//! a [`JobStore`] implementation. [`SqliteJobStore`] is the production store
//! and [`InMemoryJobStore`] backs tests and embedding.
//!
//! Terminal updates are conditional on the job still being `running`, so a
//! status never regresses even if a late failure handler fires after the job
//! was completed.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{FileRecord, Job, JobFailure, JobOutcome, Upload};

mod memory;
mod sqlite;

pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Boxed future type returned by [`JobStore`] implementors.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Operations the engine needs from the job store.
pub trait JobStore: Send + Sync {
    /// Insert a new job record.
    fn insert_job<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, ()>;

    /// Fetch a job by identifier.
    fn find_job<'a>(&'a self, job_id: &'a str) -> StoreFuture<'a, Option<Job>>;

    /// Fetch the queued job with the earliest creation timestamp.
    fn oldest_queued(&self) -> StoreFuture<'_, Option<Job>>;

    /// Atomically move a job from `queued` to `running`, stamping
    /// `started_at`.
    ///
    /// Resolves to the claimed job, or `None` when the job was no longer
    /// queued.
    fn claim<'a>(&'a self, job_id: &'a str, started_at: DateTime<Utc>)
    -> StoreFuture<'a, Option<Job>>;

    /// List every file record belonging to a job, oldest first.
    fn list_files<'a>(&'a self, job_id: &'a str) -> StoreFuture<'a, Vec<FileRecord>>;

    /// Append a file record.
    fn append_file<'a>(&'a self, record: &'a FileRecord) -> StoreFuture<'a, ()>;

    /// Write a terminal outcome if the job is still `running`.
    ///
    /// Resolves to whether the update was applied.
    fn complete_job<'a>(&'a self, job_id: &'a str, outcome: &'a JobOutcome)
    -> StoreFuture<'a, bool>;

    /// Mark the job `failed` if it is still `running`.
    ///
    /// Resolves to whether the update was applied.
    fn fail_job<'a>(&'a self, job_id: &'a str, failure: &'a JobFailure) -> StoreFuture<'a, bool>;

    /// Fetch a client upload by identifier.
    fn find_upload<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Option<Upload>>;
}
