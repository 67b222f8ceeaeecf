//! Behavioural step helpers for job-execution scenarios.

mod assertions;
mod engine;
mod state;
mod steps;

pub use state::{JobExecutionState, job_execution_state};
