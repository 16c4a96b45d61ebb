pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use batch::BatchScheduler;
pub use config::SchedulerConfig;
pub use error::{BatchError, Result, WorkError};
pub use scheduler::{JobArgs, JobId, JobState, JoinOutcome};
