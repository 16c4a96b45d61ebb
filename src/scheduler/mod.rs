pub mod graph;
pub mod job;
pub mod outcome;

pub use graph::{Claim, JobGraph};
pub use job::{Job, JobArgs, JobId, JobState, JobSummary};
pub use outcome::{FailedJob, JobSetStatus, JoinFailure, JoinOutcome, SkippedJob};
