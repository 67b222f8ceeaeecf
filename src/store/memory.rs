//! Mutex-guarded in-memory job store.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{JobStore, StoreFuture};
use crate::error::StoreError;
use crate::job::{FileRecord, Job, JobFailure, JobOutcome, JobStatus, Upload};

#[derive(Debug, Default)]
struct MemoryState {
    jobs: Vec<Job>,
    files: Vec<FileRecord>,
    uploads: Vec<Upload>,
}

/// A [`JobStore`] holding everything in process memory.
///
/// Clones share the same state, so a test can keep a handle while a worker
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a client upload that data references may name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::QueryFailed` if the state lock is poisoned.
    pub fn register_upload(&self, upload: Upload) -> Result<(), StoreError> {
        self.lock("register_upload")?.uploads.push(upload);
        Ok(())
    }

    /// Snapshot of every stored job, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::QueryFailed` if the state lock is poisoned.
    pub fn jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.lock("jobs")?.jobs.clone())
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::QueryFailed {
            operation,
            message: String::from("in-memory store lock poisoned"),
        })
    }

    fn transition<F>(
        &self,
        operation: &'static str,
        job_id: &str,
        next: JobStatus,
        apply: F,
    ) -> Result<Option<Job>, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        let mut state = self.lock(operation)?;
        let Some(job) = state.jobs.iter_mut().find(|job| job.id == job_id) else {
            return Ok(None);
        };
        if !job.status.can_transition_to(next) {
            return Ok(None);
        }

        job.status = next;
        apply(job);
        Ok(Some(job.clone()))
    }
}

impl JobStore for InMemoryJobStore {
    fn insert_job<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.lock("insert_job")?.jobs.push(job.clone());
            Ok(())
        })
    }

    fn find_job<'a>(&'a self, job_id: &'a str) -> StoreFuture<'a, Option<Job>> {
        Box::pin(async move {
            let state = self.lock("find_job")?;
            Ok(state.jobs.iter().find(|job| job.id == job_id).cloned())
        })
    }

    fn oldest_queued(&self) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move {
            let state = self.lock("oldest_queued")?;
            // `min_by_key` keeps the first of equal keys, so insertion order
            // breaks timestamp ties.
            Ok(state
                .jobs
                .iter()
                .filter(|job| job.status == JobStatus::Queued)
                .min_by_key(|job| job.created_at)
                .cloned())
        })
    }

    fn claim<'a>(
        &'a self,
        job_id: &'a str,
        started_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<Job>> {
        Box::pin(async move {
            self.transition("claim", job_id, JobStatus::Running, |job| {
                job.started_at = Some(started_at);
            })
        })
    }

    fn list_files<'a>(&'a self, job_id: &'a str) -> StoreFuture<'a, Vec<FileRecord>> {
        Box::pin(async move {
            let state = self.lock("list_files")?;
            Ok(state
                .files
                .iter()
                .filter(|record| record.job_id == job_id)
                .cloned()
                .collect())
        })
    }

    fn append_file<'a>(&'a self, record: &'a FileRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.lock("append_file")?.files.push(record.clone());
            Ok(())
        })
    }

    fn complete_job<'a>(
        &'a self,
        job_id: &'a str,
        outcome: &'a JobOutcome,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let updated = self.transition("complete_job", job_id, outcome.status, |job| {
                job.stdout = Some(outcome.stdout.clone());
                job.stderr.clone_from(&outcome.stderr);
                job.execution_time = Some(outcome.execution_time);
                job.resource_usage = Some(outcome.resource_usage.clone());
                job.completed_at = Some(outcome.completed_at);
            })?;
            Ok(updated.is_some())
        })
    }

    fn fail_job<'a>(&'a self, job_id: &'a str, failure: &'a JobFailure) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let updated = self.transition("fail_job", job_id, JobStatus::Failed, |job| {
                job.stderr = Some(failure.stderr.clone());
                job.execution_time = Some(failure.execution_time);
                job.completed_at = Some(failure.completed_at);
            })?;
            Ok(updated.is_some())
        })
    }

    fn find_upload<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Option<Upload>> {
        Box::pin(async move {
            let state = self.lock("find_upload")?;
            Ok(state
                .uploads
                .iter()
                .find(|upload| upload.id == upload_id)
                .cloned())
        })
    }
}
