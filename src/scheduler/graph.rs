use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::error::{BatchError, Result};
use crate::scheduler::job::{Job, JobArgs, JobId, JobState, JobSummary};
use crate::scheduler::outcome::{FailedJob, JobSetStatus, SkippedJob};
use crate::worker::Work;

/// A job taken off the ready queue, carrying its own copy of the arguments.
pub struct Claim {
    pub id: JobId,
    pub name: String,
    pub work: Arc<dyn Work>,
    pub args: JobArgs,
}

/// Holds job records and dependency edges.
///
/// Every job keeps a countdown of dependencies that have not yet succeeded.
/// A success decrements the countdown of each direct dependent and promotes
/// it to `Ready` at zero; a failure walks the dependents and marks them
/// `Skipped`. Each state change only touches the jobs it affects.
#[derive(Debug, Default)]
pub struct JobGraph {
    jobs: HashMap<JobId, Job>,
    ready: VecDeque<JobId>,
    next_id: u64,
    running: usize,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Every dependency must be a handle this graph already
    /// returned, which keeps the graph acyclic.
    pub fn submit(
        &mut self,
        work: Arc<dyn Work>,
        args: JobArgs,
        dependencies: &[JobId],
    ) -> Result<JobId> {
        let mut deps: Vec<JobId> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if !self.jobs.contains_key(dep) {
                return Err(BatchError::InvalidDependency(*dep));
            }
            if !deps.contains(dep) {
                deps.push(*dep);
            }
        }

        let id = JobId::new(self.next_id);
        self.next_id += 1;

        let mut job = Job::new(id, work, args, deps.clone());
        let mut doomed_by = None;
        for dep in &deps {
            if let Some(parent) = self.jobs.get_mut(dep) {
                parent.dependents.push(id);
                match parent.state {
                    JobState::Succeeded => {}
                    state if state.is_unsuccessful() => {
                        // A failed job is its own cause; a skipped one carries its root.
                        doomed_by.get_or_insert(parent.skipped_because.unwrap_or(parent.id));
                    }
                    _ => job.unresolved += 1,
                }
            }
        }

        if let Some(cause) = doomed_by {
            job.state = JobState::Skipped;
            job.skipped_because = Some(cause);
            job.completed_at = Some(Utc::now());
            tracing::warn!(job_id = %id, name = %job.name, cause = %cause, "Job skipped at submission, a dependency already failed");
        } else if job.unresolved == 0 {
            job.state = JobState::Ready;
            self.ready.push_back(id);
            tracing::debug!(job_id = %id, name = %job.name, "Job submitted and ready");
        } else {
            tracing::debug!(job_id = %id, name = %job.name, waiting_on = job.unresolved, "Job submitted");
        }

        self.jobs.insert(id, job);
        Ok(id)
    }

    pub fn get_job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn state_of(&self, id: &JobId) -> Option<JobState> {
        self.jobs.get(id).map(|j| j.state)
    }

    /// Jobs currently eligible to run, in the order they became ready.
    pub fn ready_set(&self) -> Vec<JobId> {
        self.ready.iter().copied().collect()
    }

    /// Pop the oldest ready job and mark it running.
    pub fn claim_next(&mut self) -> Option<Claim> {
        while let Some(id) = self.ready.pop_front() {
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            if job.state != JobState::Ready {
                continue;
            }
            job.state = JobState::Running;
            job.started_at = Some(Utc::now());
            self.running += 1;
            return Some(Claim {
                id,
                name: job.name.clone(),
                work: Arc::clone(&job.work),
                args: job.args.clone(),
            });
        }
        None
    }

    pub fn mark_running(&mut self, id: &JobId) -> Result<()> {
        let job = self.jobs.get_mut(id).ok_or(BatchError::JobNotFound(*id))?;
        if job.state != JobState::Ready {
            return Err(BatchError::InvalidTransition {
                job: *id,
                from: job.state,
                to: JobState::Running,
            });
        }
        job.state = JobState::Running;
        job.started_at = Some(Utc::now());
        self.running += 1;
        self.ready.retain(|j| j != id);
        Ok(())
    }

    /// Record a successful result and promote dependents whose countdown hits
    /// zero. Returns false if the job was already terminal.
    pub fn mark_done(&mut self, id: &JobId, result: Value) -> Result<bool> {
        let job = self.jobs.get_mut(id).ok_or(BatchError::JobNotFound(*id))?;
        if job.state.is_terminal() {
            return Ok(false);
        }
        if job.state != JobState::Running {
            return Err(BatchError::InvalidTransition {
                job: *id,
                from: job.state,
                to: JobState::Succeeded,
            });
        }
        job.state = JobState::Succeeded;
        job.result = Some(result);
        job.completed_at = Some(Utc::now());
        self.running -= 1;
        let dependents = job.dependents.clone();

        for dep_id in dependents {
            let Some(dependent) = self.jobs.get_mut(&dep_id) else {
                continue;
            };
            if dependent.state != JobState::Pending {
                continue;
            }
            dependent.unresolved = dependent.unresolved.saturating_sub(1);
            if dependent.unresolved == 0 {
                dependent.state = JobState::Ready;
                self.ready.push_back(dep_id);
                tracing::debug!(job_id = %dep_id, name = %dependent.name, "Job ready");
            }
        }
        Ok(true)
    }

    /// Record a failure and skip every transitive dependent. Returns false if
    /// the job was already terminal.
    pub fn mark_failed(&mut self, id: &JobId, error: impl Into<String>) -> Result<bool> {
        let job = self.jobs.get_mut(id).ok_or(BatchError::JobNotFound(*id))?;
        if job.state.is_terminal() {
            return Ok(false);
        }
        if job.state != JobState::Running {
            return Err(BatchError::InvalidTransition {
                job: *id,
                from: job.state,
                to: JobState::Failed,
            });
        }
        job.state = JobState::Failed;
        job.error = Some(error.into());
        job.completed_at = Some(Utc::now());
        self.running -= 1;

        let skipped = self.cascade_skip(*id);
        if skipped > 0 {
            tracing::warn!(job_id = %id, skipped, "Dependents skipped after failure");
        }
        Ok(true)
    }

    fn cascade_skip(&mut self, failed: JobId) -> usize {
        let mut skipped = 0;
        let mut frontier: VecDeque<JobId> = self
            .jobs
            .get(&failed)
            .map(|j| j.dependents.iter().copied().collect())
            .unwrap_or_default();

        while let Some(id) = frontier.pop_front() {
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            if !matches!(job.state, JobState::Pending | JobState::Ready) {
                continue;
            }
            if job.state == JobState::Ready {
                self.ready.retain(|j| *j != id);
            }
            job.state = JobState::Skipped;
            job.skipped_because = Some(failed);
            job.completed_at = Some(Utc::now());
            skipped += 1;
            tracing::debug!(job_id = %id, name = %job.name, cause = %failed, "Job skipped");
            frontier.extend(job.dependents.iter().copied());
        }
        skipped
    }

    /// Aggregate state of `handles` and everything they transitively depend on.
    pub fn status_of(&self, handles: &[JobId]) -> Result<JobSetStatus> {
        let mut seen: HashSet<JobId> = HashSet::new();
        let mut stack: Vec<JobId> = Vec::with_capacity(handles.len());
        for id in handles {
            if !self.jobs.contains_key(id) {
                return Err(BatchError::JobNotFound(*id));
            }
            stack.push(*id);
        }

        let mut status = JobSetStatus::default();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            // Dependencies discarded by cleanup were terminal with terminal dependents.
            let Some(job) = self.jobs.get(&id) else {
                continue;
            };
            status.total += 1;
            match job.state {
                JobState::Succeeded => status.succeeded += 1,
                JobState::Failed => status.failure.failed.push(FailedJob {
                    id,
                    name: job.name.clone(),
                    error: job.error.clone().unwrap_or_default(),
                }),
                JobState::Skipped => status.failure.skipped.push(SkippedJob {
                    id,
                    name: job.name.clone(),
                    cause: job.skipped_because.unwrap_or(id),
                }),
                JobState::Running => {
                    status.unfinished += 1;
                    status.running += 1;
                }
                JobState::Pending | JobState::Ready => status.unfinished += 1,
            }
            stack.extend(job.dependencies.iter().copied());
        }

        status.failure.failed.sort_by_key(|f| f.id);
        status.failure.skipped.sort_by_key(|s| s.id);
        Ok(status)
    }

    /// Number of jobs currently in the `Running` state.
    pub fn running_count(&self) -> usize {
        self.running
    }

    /// Number of jobs that have not reached a terminal state.
    pub fn unfinished_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| !j.state.is_terminal())
            .count()
    }

    /// All jobs in submission order.
    pub fn all_jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub fn summaries(&self) -> Vec<JobSummary> {
        self.all_jobs().into_iter().map(Job::summary).collect()
    }

    /// Drop terminal jobs whose dependents are all terminal too. Their handles
    /// become unknown afterwards. Returns the number of jobs removed.
    pub fn cleanup_finished_jobs(&mut self) -> usize {
        let removable: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| {
                job.state.is_terminal()
                    && job.dependents.iter().all(|d| {
                        self.jobs
                            .get(d)
                            .map(|dep| dep.state.is_terminal())
                            .unwrap_or(true)
                    })
            })
            .map(|job| job.id)
            .collect();

        for id in &removable {
            self.jobs.remove(id);
        }
        removable.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
