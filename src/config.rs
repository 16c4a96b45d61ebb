use tokio::sync::Semaphore;

use crate::error::{BatchError, Result};

/// Parallelism used when the platform cannot report its CPU count.
pub const FALLBACK_PARALLELISM: usize = 4;

/// Scheduler configuration, fixed once dispatch starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of jobs running at any instant.
    pub parallelism: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(FALLBACK_PARALLELISM),
        }
    }
}

impl SchedulerConfig {
    pub fn new(parallelism: usize) -> Self {
        Self { parallelism }
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(BatchError::ConfigurationError(
                "parallelism must be a positive integer".to_string(),
            ));
        }
        if self.parallelism > Semaphore::MAX_PERMITS {
            return Err(BatchError::ConfigurationError(format!(
                "parallelism {} exceeds the maximum of {} worker slots",
                self.parallelism,
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}
