//! Work executed by the scheduler's worker pool.
//!
//! A job's work is a closure-free value: something implementing [`Work`]
//! plus a plain-data [`JobArgs`] copy handed over at dispatch time.
//!
//! # Work types
//!
//! - [`FnWork`]: a plain function pointer, run on the blocking pool
//! - [`LogWork`]: emits a progress message when its turn in the graph comes
//! - [`CommandWork`]: runs an external process, buffered or with direct I/O
//!
//! # Isolation
//!
//! [`WorkerPool`] runs every job in its own task. Errors and panics raised by
//! the work are turned into a [`WorkError`] and never reach the scheduler.

pub mod executor;
pub mod pool;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::WorkError;
use crate::scheduler::JobArgs;

pub use executor::{execute_command, CommandOutput, CommandWork};
pub use pool::{WorkerPool, WorkerSlot};

pub type WorkResult = Result<Value, WorkError>;
pub type WorkFuture = Pin<Box<dyn Future<Output = WorkResult> + Send + 'static>>;

/// A unit of executable logic. Implementations hold no per-call state; each
/// call gets its own arguments.
pub trait Work: Send + Sync + 'static {
    /// Name used in logs and job summaries.
    fn name(&self) -> &str;

    fn call(&self, args: JobArgs) -> WorkFuture;
}

/// Work plus the arguments to call it with.
#[derive(Clone)]
pub struct JobSpec {
    pub work: Arc<dyn Work>,
    pub args: JobArgs,
}

impl JobSpec {
    pub fn new(work: impl Work, args: JobArgs) -> Self {
        Self {
            work: Arc::new(work),
            args,
        }
    }
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("work", &self.work.name())
            .field("args", &self.args)
            .finish()
    }
}

/// Work backed by a plain function. Runs on tokio's blocking pool, so it may
/// do synchronous I/O.
#[derive(Clone)]
pub struct FnWork {
    name: String,
    func: fn(&JobArgs) -> WorkResult,
}

impl FnWork {
    pub fn new(name: impl Into<String>, func: fn(&JobArgs) -> WorkResult) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl Work for FnWork {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: JobArgs) -> WorkFuture {
        let func = self.func;
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || func(&args)).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(WorkError::Panicked(panic_message(e.into_panic()))),
                Err(_) => Err(WorkError::Aborted),
            }
        })
    }
}

/// Logs its first positional argument. Submitted with dependencies, it
/// reports progress at the point in the graph where that stage starts.
#[derive(Debug, Clone, Default)]
pub struct LogWork;

impl Work for LogWork {
    fn name(&self) -> &str {
        "log"
    }

    fn call(&self, args: JobArgs) -> WorkFuture {
        Box::pin(log_message(args))
    }
}

async fn log_message(args: JobArgs) -> WorkResult {
    let message = args.str_arg(0)?;
    tracing::info!("{}", message);
    Ok(Value::Null)
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
