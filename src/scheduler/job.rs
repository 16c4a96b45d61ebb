use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkError;
use crate::worker::Work;

/// Opaque handle returned by submission. Ids are assigned in submission
/// order, so a job can only ever depend on a smaller id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Skipped
        )
    }

    /// True for states that doom every dependent.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Skipped)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Ready => write!(f, "ready"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
            JobState::Skipped => write!(f, "skipped"),
        }
    }
}

/// Plain-data arguments handed to a job's work. Workers always receive their
/// own copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArgs {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl JobArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            keyword: Map::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.keyword.get(key)
    }

    /// Positional argument `index` as a string slice.
    pub fn str_arg(&self, index: usize) -> Result<&str, WorkError> {
        self.arg(index).and_then(Value::as_str).ok_or_else(|| {
            WorkError::InvalidArguments(format!("expected a string at position {}", index))
        })
    }

    /// Positional arguments rendered as strings, for appending to a command line.
    pub fn positional_strings(&self) -> Vec<String> {
        self.positional
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// A job record held by the graph.
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub work: Arc<dyn Work>,
    pub args: JobArgs,
    pub dependencies: Vec<JobId>,
    pub dependents: Vec<JobId>,
    pub state: JobState,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// The failed job whose cascade skipped this one.
    pub skipped_because: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub(crate) unresolved: usize,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        work: Arc<dyn Work>,
        args: JobArgs,
        dependencies: Vec<JobId>,
    ) -> Self {
        Self {
            id,
            name: work.name().to_string(),
            work,
            args,
            dependencies,
            dependents: Vec::new(),
            state: JobState::Pending,
            result: None,
            error: None,
            skipped_because: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            unresolved: 0,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            dependencies: self.dependencies.clone(),
            error: self.error.clone(),
            skipped_because: self.skipped_because,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("dependencies", &self.dependencies)
            .field("unresolved", &self.unresolved)
            .finish()
    }
}

/// Snapshot of a job without its work or arguments.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub state: JobState,
    pub dependencies: Vec<JobId>,
    pub error: Option<String>,
    pub skipped_because: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
