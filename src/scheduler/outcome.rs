use serde::Serialize;

use crate::error::{BatchError, Result};
use crate::scheduler::job::JobId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedJob {
    pub id: JobId,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedJob {
    pub id: JobId,
    pub name: String,
    /// The failed job that doomed this one.
    pub cause: JobId,
}

/// Which jobs in a joined set did not succeed, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinFailure {
    pub failed: Vec<FailedJob>,
    pub skipped: Vec<SkippedJob>,
}

impl JoinFailure {
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<JobId> {
        self.failed.iter().map(|f| f.id).collect()
    }

    pub fn skipped_ids(&self) -> Vec<JobId> {
        self.skipped.iter().map(|s| s.id).collect()
    }
}

impl std::fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} job(s) failed, {} skipped",
            self.failed.len(),
            self.skipped.len()
        )?;
        for failed in &self.failed {
            write!(f, "; {} {} failed: {}", failed.id, failed.name, failed.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JoinOutcome {
    AllSucceeded,
    PartialFailure(JoinFailure),
}

impl JoinOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JoinOutcome::AllSucceeded)
    }

    /// Turn a partial failure into an error, for callers that abort on any failure.
    pub fn into_result(self) -> Result<()> {
        match self {
            JoinOutcome::AllSucceeded => Ok(()),
            JoinOutcome::PartialFailure(failure) => Err(BatchError::JobFailure(failure)),
        }
    }
}

/// Aggregate state of a set of jobs and everything they depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSetStatus {
    pub total: usize,
    pub succeeded: usize,
    pub unfinished: usize,
    /// Unfinished jobs that hold a worker slot.
    pub running: usize,
    pub failure: JoinFailure,
}

impl JobSetStatus {
    pub fn is_terminal(&self) -> bool {
        self.unfinished == 0
    }

    pub fn outcome(&self) -> JoinOutcome {
        if self.failure.is_empty() {
            JoinOutcome::AllSucceeded
        } else {
            JoinOutcome::PartialFailure(self.failure.clone())
        }
    }
}
