//! The queue worker: claim a job, run it in a sandbox, publish the result.
//!
//! One job is processed end to end before the next poll. Every job that is
//! claimed ends `completed` or `failed`, and its sandbox and staging
//! directory are removed on every exit path.

use std::future::Future;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::Utc;
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, SandboxConfig};
use crate::engine::{
    DATA_DIR, Sandbox, SandboxRuntime, SandboxSpec, WORKSPACE_DIR, sanitize, supervise,
};
use crate::error::SandjobError;
use crate::harvest::harvest;
use crate::job::{FileRecord, Job, JobFailure, JobOutcome, JobStatus};
use crate::stage::StagingArea;
use crate::store::JobStore;

/// Everything the worker needs from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Image every sandbox is created from.
    pub image: String,
    /// Fixed sandbox limits.
    pub sandbox: SandboxConfig,
    /// Root of the per-job artifact directories.
    pub storage_root: Utf8PathBuf,
    /// Directory under which staging areas are created.
    pub staging_root: Utf8PathBuf,
    /// Sleep between polls when the queue is empty or a poll failed.
    pub poll_interval: Duration,
}

impl WorkerSettings {
    /// Derive settings from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when the sandbox limits would
    /// weaken isolation or the staging root cannot be resolved.
    pub fn from_config(config: &AppConfig) -> Result<Self, SandjobError> {
        config.sandbox.validate()?;
        Ok(Self {
            image: String::from(config.image_or_default()),
            sandbox: config.sandbox.clone(),
            storage_root: config.storage.root.clone(),
            staging_root: config.storage.resolved_staging_root()?,
            poll_interval: config.worker.poll_interval(),
        })
    }
}

/// Processes queued jobs against a sandbox runtime and a job store.
pub struct Worker<R, S> {
    runtime: R,
    store: S,
    settings: WorkerSettings,
}

impl<R: SandboxRuntime, S: JobStore> Worker<R, S> {
    /// Create a worker.
    #[must_use]
    pub const fn new(runtime: R, store: S, settings: WorkerSettings) -> Self {
        Self {
            runtime,
            store,
            settings,
        }
    }

    /// The sandbox runtime.
    #[must_use]
    pub const fn runtime(&self) -> &R {
        &self.runtime
    }

    /// The job store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Claim the oldest queued job.
    ///
    /// A lost claim race retries immediately with the next oldest job.
    ///
    /// # Errors
    ///
    /// Returns the store error if the queue cannot be read or the claim
    /// cannot be written.
    pub async fn poll(&self) -> Result<Option<Job>, SandjobError> {
        loop {
            let Some(candidate) = self.store.oldest_queued().await? else {
                return Ok(None);
            };

            if let Some(claimed) = self.store.claim(&candidate.id, Utc::now()).await? {
                info!(job_id = %claimed.id, "job claimed");
                return Ok(Some(claimed));
            }
            debug!(job_id = %candidate.id, "claim lost to another worker");
        }
    }

    /// Poll once and process the claimed job, if any.
    ///
    /// Resolves to the claimed job's identifier and final status.
    ///
    /// # Errors
    ///
    /// Returns the store error from polling. Processing errors are recorded
    /// against the job instead.
    pub async fn process_next(&self) -> Result<Option<(String, JobStatus)>, SandjobError> {
        let Some(job) = self.poll().await? else {
            return Ok(None);
        };
        let status = self.process_job(&job).await;
        Ok(Some((job.id, status)))
    }

    /// Process jobs until `shutdown` resolves.
    ///
    /// Shutdown is observed between jobs only. Poll errors are logged and the
    /// loop sleeps before retrying.
    pub async fn run_until<F: Future<Output = ()>>(&self, shutdown: F) {
        let mut shutdown = std::pin::pin!(shutdown);
        info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "worker started"
        );

        loop {
            if shutdown.as_mut().now_or_never().is_some() {
                break;
            }

            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => debug!("queue empty"),
                Err(poll_error) => error!(error = %poll_error, "failed to poll the queue"),
            }

            tokio::select! {
                () = shutdown.as_mut() => break,
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        info!("worker stopped");
    }

    /// Run a claimed job and record its terminal state.
    ///
    /// Any error is recorded as a `failed` job with the error text as
    /// `stderr`. Cleanup always runs.
    pub async fn process_job(&self, job: &Job) -> JobStatus {
        info!(job_id = %job.id, "processing job");

        let mut staging = None;
        let mut sandbox = None;
        let status = match self.execute(job, &mut staging, &mut sandbox).await {
            Ok(status) => status,
            Err(failure) => {
                self.record_failure(job, &failure).await;
                JobStatus::Failed
            }
        };

        if let Some(mut live) = sandbox {
            live.remove().await;
        }
        if let Some(area) = staging {
            area.remove();
        }

        info!(job_id = %job.id, %status, "job finished");
        status
    }

    async fn execute<'a>(
        &'a self,
        job: &Job,
        staging_slot: &mut Option<StagingArea>,
        sandbox_slot: &mut Option<Sandbox<'a, R>>,
    ) -> Result<JobStatus, SandjobError> {
        let inputs = self.store.list_files(&job.id).await?;
        let staging = staging_slot.insert(StagingArea::create(
            &self.settings.staging_root,
            job,
            &inputs,
        )?);
        let workspace_archive = staging.workspace_archive()?;
        let data_archive = staging.data_archive()?;

        let spec = SandboxSpec::new(self.settings.image.as_str(), &self.settings.sandbox)?
            .with_name(Some(format!("sandjob-{}", job.id)))
            .with_install_prefix(staging.install_prefix());
        let sandbox = sandbox_slot.insert(Sandbox::create(&self.runtime, &spec).await?);
        sandbox.put_archive(WORKSPACE_DIR, workspace_archive).await?;
        sandbox.put_archive(DATA_DIR, data_archive).await?;

        let report = supervise(sandbox).await?;
        let artifacts = harvest(sandbox, &self.settings.storage_root, &job.id).await?;

        let completed_at = Utc::now();
        let status = report.status();
        let outcome = JobOutcome {
            status,
            stdout: report.stdout,
            stderr: report.stderr,
            execution_time: job.elapsed_seconds(completed_at),
            resource_usage: report.resource_usage,
            completed_at,
        };
        if !self.store.complete_job(&job.id, &outcome).await? {
            warn!(job_id = %job.id, "job left the running state; outcome discarded");
            return Ok(status);
        }

        for artifact in artifacts {
            let record = FileRecord::new(
                job.id.as_str(),
                artifact.filename,
                artifact.content_type,
                artifact.relative_path,
                artifact.size,
            );
            self.store.append_file(&record).await?;
        }

        Ok(status)
    }

    async fn record_failure(&self, job: &Job, failure: &SandjobError) {
        let completed_at = Utc::now();
        let record = JobFailure {
            stderr: sanitize(&failure.to_string()),
            execution_time: job.elapsed_seconds(completed_at),
            completed_at,
        };

        match self.store.fail_job(&job.id, &record).await {
            Ok(true) => warn!(job_id = %job.id, error = %failure, "job failed"),
            Ok(false) => warn!(
                job_id = %job.id,
                error = %failure,
                "job already terminal; failure not recorded"
            ),
            Err(store_error) => error!(
                job_id = %job.id,
                error = %failure,
                %store_error,
                "failed to record job failure"
            ),
        }
    }
}
