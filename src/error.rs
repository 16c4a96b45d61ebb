use thiserror::Error;

use crate::scheduler::{JobId, JobState, JoinFailure};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Invalid dependency: job {0} does not exist")]
    InvalidDependency(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid transition for job {job}: {from} -> {to}")]
    InvalidTransition {
        job: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Job failure: {0}")]
    JobFailure(JoinFailure),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Worker pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Stage {stage} failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: WorkError,
    },

    #[error("Invalid job plan: {0}")]
    Plan(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors raised by a job's work. These never escape the scheduler; they are
/// recorded against the job and reported through `join`.
#[derive(Error, Debug)]
pub enum WorkError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}: {detail}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("Work panicked: {0}")]
    Panicked(String),

    #[error("Work aborted before completion")]
    Aborted,
}

impl WorkError {
    pub fn failed(message: impl Into<String>) -> Self {
        WorkError::Failed(message.into())
    }
}
