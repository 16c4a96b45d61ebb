use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{BatchError, WorkError};
use crate::scheduler::JobArgs;
use crate::worker::{panic_message, Work, WorkResult};

/// A held worker slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

/// Fixed number of worker slots. A job may only run while it holds a slot,
/// so at most `capacity` jobs run at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held by running jobs.
    pub fn busy(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Wait for a free slot. Fails once the pool has been closed.
    pub async fn acquire(&self) -> Result<WorkerSlot, BatchError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| BatchError::PoolExhausted("worker pool is closed".to_string()))?;
        Ok(WorkerSlot { _permit: permit })
    }

    /// Stop handing out slots. Pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Run a job's work in its own task, so a panic is reported as that
    /// job's failure.
    pub async fn run(work: &Arc<dyn Work>, args: JobArgs) -> WorkResult {
        let work = Arc::clone(work);
        match tokio::spawn(async move { work.call(args).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(WorkError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(WorkError::Aborted),
        }
    }
}
