//! Shared behavioural-test state for job-execution scenarios.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;
use sandjob::config::SandboxConfig;
use sandjob::job::JobStatus;
use sandjob::store::InMemoryJobStore;
use sandjob::worker::WorkerSettings;
use tempfile::TempDir;

use super::engine::FakeEngine;

/// Step result type for job-execution BDD tests.
pub type StepResult<T> = Result<T, String>;

/// Temporary storage and staging roots used by a scenario.
#[derive(Clone)]
pub(crate) struct Workspace {
    /// Keeps the temporary directory alive for the full scenario.
    pub(crate) _temp_dir: Arc<TempDir>,

    /// Artifact storage root.
    pub(crate) storage_root: Utf8PathBuf,

    /// Root under which staging areas are created.
    pub(crate) staging_root: Utf8PathBuf,
}

impl Workspace {
    pub(crate) fn new() -> StepResult<Self> {
        let temp_dir = tempfile::tempdir()
            .map_err(|error| format!("failed to create scenario directory: {error}"))?;
        let root = Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf())
            .map_err(|_| String::from("scenario directory path should be valid UTF-8"))?;

        Ok(Self {
            _temp_dir: Arc::new(temp_dir),
            storage_root: root.join("storage"),
            staging_root: root.join("staging"),
        })
    }

    pub(crate) fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            image: String::from("python-sandbox:latest"),
            sandbox: SandboxConfig::default(),
            storage_root: self.storage_root.clone(),
            staging_root: self.staging_root.clone(),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// The job the worker processed and its final status.
#[derive(Clone, Debug)]
pub(crate) struct Processed {
    pub(crate) job_id: String,
    pub(crate) status: JobStatus,
}

/// State shared across job-execution scenario steps.
#[derive(Default, ScenarioState)]
pub struct JobExecutionState {
    /// Queue and file records.
    pub(crate) store: Slot<InMemoryJobStore>,

    /// Scripted engine handle.
    pub(crate) engine: Slot<FakeEngine>,

    /// Storage and staging roots.
    pub(crate) workspace: Slot<Workspace>,

    /// Outcome of the worker pass.
    pub(crate) processed: Slot<Processed>,
}

impl JobExecutionState {
    pub(crate) fn store(&self) -> InMemoryJobStore {
        if let Some(store) = self.store.get() {
            return store;
        }
        let store = InMemoryJobStore::new();
        self.store.set(store.clone());
        store
    }

    pub(crate) fn engine(&self) -> FakeEngine {
        if let Some(engine) = self.engine.get() {
            return engine;
        }
        let engine = FakeEngine::default();
        self.engine.set(engine.clone());
        engine
    }

    pub(crate) fn workspace(&self) -> StepResult<Workspace> {
        if let Some(workspace) = self.workspace.get() {
            return Ok(workspace);
        }
        let workspace = Workspace::new()?;
        self.workspace.set(workspace.clone());
        Ok(workspace)
    }

    pub(crate) fn processed(&self) -> StepResult<Processed> {
        self.processed
            .get()
            .ok_or_else(|| String::from("the worker has not processed a job"))
    }
}

/// Fixture providing fresh job-execution state.
#[fixture]
pub fn job_execution_state() -> JobExecutionState {
    JobExecutionState::default()
}
