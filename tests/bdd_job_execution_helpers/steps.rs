//! Given/when step definitions for job-execution behavioural scenarios.

use std::time::Duration;

use rstest_bdd_macros::{given, when};
use sandjob::job::Job;
use sandjob::store::JobStore;
use sandjob::submit::{HttpFetcher, JobRequest, JobSubmitter};
use sandjob::worker::Worker;

use super::state::{JobExecutionState, Processed, StepResult};

fn scenario_runtime() -> StepResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|error| format!("failed to create tokio runtime for scenario: {error}"))
}

#[given("a queued job that prints \"{text}\"")]
fn a_queued_job_that_prints(
    job_execution_state: &JobExecutionState,
    text: String,
) -> StepResult<()> {
    let job = Job::queued(format!("print('{text}')"), vec![], vec![]);
    scenario_runtime()?
        .block_on(job_execution_state.store().insert_job(&job))
        .map_err(|error| format!("failed to queue job: {error}"))?;
    job_execution_state.engine().print(&text);
    Ok(())
}

#[given("a job submitted with data URL \"{url}\" that prints \"{text}\"")]
fn a_job_submitted_with_data_url(
    job_execution_state: &JobExecutionState,
    url: String,
    text: String,
) -> StepResult<()> {
    let workspace = job_execution_state.workspace()?;
    let fetcher = HttpFetcher::new(Duration::from_secs(2))
        .map_err(|error| format!("failed to build fetcher: {error}"))?;
    let submitter = JobSubmitter::new(job_execution_state.store(), fetcher, workspace.storage_root);

    let request = JobRequest {
        code: format!("print('{text}')"),
        data_references: vec![url],
        ..JobRequest::default()
    };
    scenario_runtime()?
        .block_on(submitter.submit(request))
        .map_err(|error| format!("submission failed: {error}"))?;
    job_execution_state.engine().print(&text);
    Ok(())
}

#[given("the sandbox writes \"{name}\" containing \"{contents}\"")]
fn the_sandbox_writes(job_execution_state: &JobExecutionState, name: String, contents: String) {
    job_execution_state.engine().write_file(&name, &contents);
}

#[given("the sandbox exits with code {code}")]
fn the_sandbox_exits_with_code(job_execution_state: &JobExecutionState, code: i64) {
    job_execution_state.engine().exit_with(code);
}

#[given("the engine connection drops while the job runs")]
fn the_engine_connection_drops(job_execution_state: &JobExecutionState) {
    job_execution_state.engine().drop_connection_while_waiting();
}

#[given("the engine refuses to create sandboxes")]
fn the_engine_refuses_to_create_sandboxes(job_execution_state: &JobExecutionState) {
    job_execution_state.engine().refuse_create();
}

#[when("the worker processes the next job")]
fn the_worker_processes_the_next_job(job_execution_state: &JobExecutionState) -> StepResult<()> {
    let workspace = job_execution_state.workspace()?;
    let worker = Worker::new(
        job_execution_state.engine(),
        job_execution_state.store(),
        workspace.settings(),
    );

    let processed = scenario_runtime()?
        .block_on(worker.process_next())
        .map_err(|error| format!("worker poll failed: {error}"))?
        .ok_or_else(|| String::from("the queue was empty"))?;

    let (job_id, status) = processed;
    job_execution_state.processed.set(Processed { job_id, status });
    Ok(())
}
