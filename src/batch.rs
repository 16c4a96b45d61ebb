//! Bounded-parallelism executor over the job graph.
//!
//! [`BatchScheduler`] owns the [`JobGraph`] and a [`WorkerPool`]. Callers
//! submit jobs with dependencies and get a [`JobId`] back immediately; a
//! dispatcher task hands ready jobs to free worker slots, and each worker
//! writes its outcome back into the graph, which may make dependents ready.
//!
//! # Dispatch
//!
//! The dispatcher starts with the first submission. From then on the
//! parallelism is fixed. Its loop is:
//!
//! 1. Wait for a free worker slot (suspends while the pool is saturated)
//! 2. Claim the oldest ready job, or sleep until a submission or completion
//!    wakes it
//! 3. Spawn the job with its slot; the slot is released only after the
//!    outcome has been recorded
//!
//! # Joining
//!
//! [`BatchScheduler::join`] waits on a progress counter bumped by every
//! completion and re-checks the awaited set, including everything it
//! transitively depends on. Unrelated jobs keep running.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{watch, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::{BatchError, Result};
use crate::scheduler::{Claim, JobArgs, JobGraph, JobId, JobSetStatus, JobState, JobSummary, JoinOutcome};
use crate::worker::{CommandWork, JobSpec, LogWork, Work, WorkerPool};

#[derive(Debug)]
struct DispatchState {
    parallelism: usize,
    started: bool,
}

struct Shared {
    graph: RwLock<JobGraph>,
    /// Wakes the dispatcher when a job may have become ready.
    wake: Notify,
    /// Bumped after every recorded outcome.
    progress: watch::Sender<u64>,
    shutdown: CancellationToken,
}

/// Dependency-aware job scheduler with a fixed-size worker pool.
///
/// Dropping the scheduler stops dispatch; jobs already running finish in the
/// background.
pub struct BatchScheduler {
    shared: Arc<Shared>,
    dispatch: Mutex<DispatchState>,
}

impl BatchScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_shutdown(config, CancellationToken::new())
    }

    /// Create a scheduler that stops dispatching when `shutdown` is cancelled.
    pub fn with_shutdown(config: SchedulerConfig, shutdown: CancellationToken) -> Result<Self> {
        config.validate()?;
        let (progress, _) = watch::channel(0);
        Ok(Self {
            shared: Arc::new(Shared {
                graph: RwLock::new(JobGraph::new()),
                wake: Notify::new(),
                progress,
                shutdown: shutdown.child_token(),
            }),
            dispatch: Mutex::new(DispatchState {
                parallelism: config.parallelism,
                started: false,
            }),
        })
    }

    /// Set the parallelism. Only allowed before the first job is dispatched.
    pub fn configure(&self, parallelism: usize) -> Result<()> {
        SchedulerConfig::new(parallelism).validate()?;
        let mut dispatch = self.dispatch_state()?;
        if dispatch.started && dispatch.parallelism != parallelism {
            return Err(BatchError::ConfigurationError(format!(
                "parallelism is fixed at {} once dispatch has started",
                dispatch.parallelism
            )));
        }
        dispatch.parallelism = parallelism;
        Ok(())
    }

    pub fn parallelism(&self) -> usize {
        self.dispatch
            .lock()
            .map(|d| d.parallelism)
            .unwrap_or_else(|poisoned| poisoned.into_inner().parallelism)
    }

    /// Register a job. Returns as soon as the job is recorded; it runs once
    /// all of `dependencies` have succeeded.
    pub async fn submit(
        &self,
        work: Arc<dyn Work>,
        args: JobArgs,
        dependencies: &[JobId],
    ) -> Result<JobId> {
        if self.shared.shutdown.is_cancelled() {
            return Err(BatchError::PoolExhausted(
                "scheduler is shut down".to_string(),
            ));
        }
        let id = self
            .shared
            .graph
            .write()
            .await
            .submit(work, args, dependencies)?;
        // A rejected submission leaves the parallelism open to `configure`.
        self.ensure_dispatching()?;
        self.shared.wake.notify_one();
        Ok(id)
    }

    pub async fn submit_spec(&self, spec: JobSpec, dependencies: &[JobId]) -> Result<JobId> {
        self.submit(spec.work, spec.args, dependencies).await
    }

    /// Submit an external command as a job.
    pub async fn submit_command(
        &self,
        command: CommandWork,
        dependencies: &[JobId],
    ) -> Result<JobId> {
        self.submit(Arc::new(command), JobArgs::new(), dependencies)
            .await
    }

    /// Submit a job that logs `message` once its dependencies have succeeded.
    pub async fn log(&self, message: impl Into<String>, dependencies: &[JobId]) -> Result<JobId> {
        let args = JobArgs::new().with_arg(message.into());
        self.submit(Arc::new(LogWork), args, dependencies).await
    }

    /// Wait until every job in `handles`, and everything they depend on, is
    /// terminal.
    pub async fn join(&self, handles: &[JobId]) -> Result<JoinOutcome> {
        if handles.is_empty() {
            return Ok(JoinOutcome::AllSucceeded);
        }

        let mut progress = self.shared.progress.subscribe();
        loop {
            let status = self.shared.graph.read().await.status_of(handles)?;
            if status.is_terminal() {
                let outcome = status.outcome();
                if outcome.is_success() {
                    tracing::debug!(jobs = status.total, "Join complete");
                } else {
                    tracing::warn!(
                        jobs = status.total,
                        failed = status.failure.failed.len(),
                        skipped = status.failure.skipped.len(),
                        "Join complete with failures"
                    );
                }
                return Ok(outcome);
            }

            if self.shared.shutdown.is_cancelled() {
                // Jobs already running still finish; anything else never will.
                let undispatched = status.unfinished - status.running;
                if undispatched > 0 {
                    return Err(BatchError::PoolExhausted(format!(
                        "scheduler shut down with {} awaited job(s) never dispatched",
                        undispatched
                    )));
                }
                if progress.changed().await.is_err() {
                    return Err(BatchError::Internal("progress channel closed".to_string()));
                }
                continue;
            }

            tokio::select! {
                changed = progress.changed() => {
                    if changed.is_err() {
                        return Err(BatchError::Internal("progress channel closed".to_string()));
                    }
                }
                _ = self.shared.shutdown.cancelled() => {}
            }
        }
    }

    pub async fn status_of(&self, handles: &[JobId]) -> Result<JobSetStatus> {
        self.shared.graph.read().await.status_of(handles)
    }

    pub async fn state_of(&self, id: JobId) -> Result<JobState> {
        self.shared
            .graph
            .read()
            .await
            .state_of(&id)
            .ok_or(BatchError::JobNotFound(id))
    }

    /// The value a succeeded job returned.
    pub async fn result_of(&self, id: JobId) -> Result<Option<Value>> {
        let graph = self.shared.graph.read().await;
        let job = graph.get_job(&id).ok_or(BatchError::JobNotFound(id))?;
        Ok(job.result.clone())
    }

    pub async fn ready_set(&self) -> Vec<JobId> {
        self.shared.graph.read().await.ready_set()
    }

    pub async fn running_count(&self) -> usize {
        self.shared.graph.read().await.running_count()
    }

    pub async fn jobs(&self) -> Vec<JobSummary> {
        self.shared.graph.read().await.summaries()
    }

    /// Discard finished jobs nothing else waits on. Returns how many were removed.
    pub async fn cleanup_finished_jobs(&self) -> usize {
        let mut graph = self.shared.graph.write().await;
        let removed = graph.cleanup_finished_jobs();
        if graph.is_empty() {
            tracing::debug!(removed, "All finished jobs discarded, graph is empty");
        } else if removed > 0 {
            tracing::debug!(removed, remaining = graph.len(), "Finished jobs discarded");
        }
        removed
    }

    /// Stop dispatching. Running jobs finish; jobs not yet started never run.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    fn dispatch_state(&self) -> Result<MutexGuard<'_, DispatchState>> {
        self.dispatch
            .lock()
            .map_err(|_| BatchError::Internal("dispatch state lock poisoned".to_string()))
    }

    fn ensure_dispatching(&self) -> Result<()> {
        let mut dispatch = self.dispatch_state()?;
        if dispatch.started {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BatchError::PoolExhausted(format!("no runtime to run workers on: {}", e)))?;
        let pool = WorkerPool::new(dispatch.parallelism);
        runtime.spawn(dispatch_loop(Arc::clone(&self.shared), pool));
        dispatch.started = true;
        Ok(())
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn dispatch_loop(shared: Arc<Shared>, pool: WorkerPool) {
    tracing::info!(parallelism = pool.capacity(), "Dispatcher started");

    loop {
        let slot = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            slot = pool.acquire() => match slot {
                Ok(slot) => slot,
                Err(e) => {
                    tracing::error!(error = %e, "Cannot obtain a worker, dispatcher stopping");
                    break;
                }
            },
        };

        let claim = loop {
            let next = shared.graph.write().await.claim_next();
            if let Some(claim) = next {
                break Some(claim);
            }
            tokio::select! {
                _ = shared.shutdown.cancelled() => break None,
                _ = shared.wake.notified() => {}
            }
        };
        let Some(claim) = claim else {
            break;
        };

        tracing::info!(job_id = %claim.id, name = %claim.name, busy = pool.busy(), "Dispatching job");
        let worker_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            run_job(worker_shared, claim).await;
            drop(slot);
        });
    }

    pool.close();
    shared.progress.send_modify(|n| *n += 1);
    let abandoned = {
        let graph = shared.graph.read().await;
        graph.unfinished_count().saturating_sub(graph.running_count())
    };
    tracing::info!(abandoned, "Dispatcher stopped");
}

async fn run_job(shared: Arc<Shared>, claim: Claim) {
    let Claim {
        id,
        name,
        work,
        args,
    } = claim;
    let started = Instant::now();
    let result = WorkerPool::run(&work, args).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    {
        let mut graph = shared.graph.write().await;
        let recorded = match result {
            Ok(value) => {
                tracing::info!(job_id = %id, name = %name, elapsed_ms, "Job succeeded");
                graph.mark_done(&id, value)
            }
            Err(e) => {
                tracing::warn!(job_id = %id, name = %name, error = %e, elapsed_ms, "Job failed");
                graph.mark_failed(&id, e.to_string())
            }
        };
        if let Err(e) = recorded {
            tracing::error!(job_id = %id, error = %e, "Failed to record job outcome");
        }
    }

    shared.progress.send_modify(|n| *n += 1);
    shared.wake.notify_one();
}
