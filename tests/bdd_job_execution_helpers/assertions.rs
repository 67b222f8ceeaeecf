//! Then-step assertions for job-execution behavioural scenarios.

use rstest_bdd_macros::then;
use sandjob::job::{FileRecord, Job, JobStatus};
use sandjob::store::JobStore;

use super::state::{JobExecutionState, StepResult};

fn processed_job(state: &JobExecutionState) -> StepResult<Job> {
    let processed = state.processed()?;
    state
        .store()
        .jobs()
        .map_err(|error| format!("failed to read jobs: {error}"))?
        .into_iter()
        .find(|job| job.id == processed.job_id)
        .ok_or_else(|| format!("job {} is missing from the store", processed.job_id))
}

fn job_files(state: &JobExecutionState) -> StepResult<Vec<FileRecord>> {
    let processed = state.processed()?;
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|error| format!("failed to create tokio runtime for scenario: {error}"))?;
    runtime
        .block_on(state.store().list_files(&processed.job_id))
        .map_err(|error| format!("failed to list files: {error}"))
}

fn assert_status(state: &JobExecutionState, expected: JobStatus) -> StepResult<()> {
    let processed = state.processed()?;
    let job = processed_job(state)?;
    if processed.status != expected || job.status != expected {
        return Err(format!(
            "expected {expected}, worker reported {} and store holds {}",
            processed.status, job.status
        ));
    }
    if job.completed_at.is_none() {
        return Err(String::from("terminal job has no completion time"));
    }
    Ok(())
}

#[then("the job is completed")]
fn the_job_is_completed(job_execution_state: &JobExecutionState) -> StepResult<()> {
    assert_status(job_execution_state, JobStatus::Completed)
}

#[then("the job is failed")]
fn the_job_is_failed(job_execution_state: &JobExecutionState) -> StepResult<()> {
    assert_status(job_execution_state, JobStatus::Failed)
}

#[then("the job output is \"{expected}\"")]
fn the_job_output_is(job_execution_state: &JobExecutionState, expected: String) -> StepResult<()> {
    let job = processed_job(job_execution_state)?;
    let wanted = format!("{expected}\n");
    if job.stdout.as_deref() != Some(wanted.as_str()) {
        return Err(format!("expected output {wanted:?}, got {:?}", job.stdout));
    }
    Ok(())
}

#[then("the job error mentions \"{expected}\"")]
fn the_job_error_mentions(
    job_execution_state: &JobExecutionState,
    expected: String,
) -> StepResult<()> {
    let job = processed_job(job_execution_state)?;
    let stderr = job.stderr.unwrap_or_default();
    if !stderr.contains(&expected) {
        return Err(format!("expected error to mention {expected:?}, got {stderr:?}"));
    }
    Ok(())
}

#[then("the job has no files")]
fn the_job_has_no_files(job_execution_state: &JobExecutionState) -> StepResult<()> {
    let files = job_files(job_execution_state)?;
    if !files.is_empty() {
        return Err(format!("expected no files, got {files:?}"));
    }
    Ok(())
}

#[then("exactly {count} file is recorded")]
fn exactly_count_files_are_recorded(
    job_execution_state: &JobExecutionState,
    count: usize,
) -> StepResult<()> {
    let files = job_files(job_execution_state)?;
    if files.len() != count {
        return Err(format!("expected {count} files, got {files:?}"));
    }
    Ok(())
}

#[then("output file \"{name}\" is recorded as \"{content_type}\" with {size} bytes")]
fn output_file_is_recorded(
    job_execution_state: &JobExecutionState,
    name: String,
    content_type: String,
    size: u64,
) -> StepResult<()> {
    let processed = job_execution_state.processed()?;
    let workspace = job_execution_state.workspace()?;
    let files = job_files(job_execution_state)?;
    let record = files
        .iter()
        .find(|record| record.filename == name)
        .ok_or_else(|| format!("no file record named {name}: {files:?}"))?;

    if record.content_type != content_type || record.size != size {
        return Err(format!(
            "expected {content_type} with {size} bytes, got {} with {} bytes",
            record.content_type, record.size
        ));
    }
    let expected_path = format!("{}/{name}", processed.job_id);
    if record.file_path != expected_path {
        return Err(format!(
            "expected relative path {expected_path}, got {}",
            record.file_path
        ));
    }
    let stored = workspace.storage_root.join(&record.file_path);
    let on_disk = std::fs::metadata(stored.as_std_path())
        .map_err(|error| format!("artifact {stored} was not persisted: {error}"))?;
    if on_disk.len() != size {
        return Err(format!("artifact {stored} holds {} bytes", on_disk.len()));
    }
    Ok(())
}

#[then("no sandbox remains")]
fn no_sandbox_remains(job_execution_state: &JobExecutionState) -> StepResult<()> {
    let live = job_execution_state.engine().live_sandboxes();
    if live != 0 {
        return Err(format!("{live} sandboxes were left behind"));
    }
    Ok(())
}

#[then("no staging directory remains")]
fn no_staging_directory_remains(job_execution_state: &JobExecutionState) -> StepResult<()> {
    let processed = job_execution_state.processed()?;
    let workspace = job_execution_state.workspace()?;
    let staging = workspace
        .staging_root
        .join(format!("sandjob-{}", processed.job_id));
    if staging.as_std_path().exists() {
        return Err(format!("staging directory {staging} still exists"));
    }
    Ok(())
}
