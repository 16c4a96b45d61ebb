use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::batch::BatchScheduler;
use crate::error::{BatchError, Result};
use crate::scheduler::JobId;
use crate::worker::CommandWork;

/// A batch of external commands with ordering constraints, as read from a
/// JSON file:
///
/// ```json
/// { "jobs": [
///     { "name": "fetch", "command": ["git", "fetch"] },
///     { "name": "report", "command": ["make", "report"], "after": ["fetch"], "direct_io": true }
/// ] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPlan {
    pub jobs: Vec<PlannedJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedJob {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub direct_io: bool,
    /// Names of earlier jobs that must succeed first.
    #[serde(default)]
    pub after: Vec<String>,
}

impl JobPlan {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json(&contents)
    }

    /// Submit every job in order. Returns the handle of each job by name.
    pub async fn submit_all(&self, scheduler: &BatchScheduler) -> Result<Vec<(String, JobId)>> {
        let mut by_name: HashMap<&str, JobId> = HashMap::new();
        let mut submitted = Vec::with_capacity(self.jobs.len());

        for job in &self.jobs {
            if job.command.is_empty() {
                return Err(BatchError::Plan(format!("job '{}' has an empty command", job.name)));
            }
            if by_name.contains_key(job.name.as_str()) {
                return Err(BatchError::Plan(format!("duplicate job name '{}'", job.name)));
            }

            let deps = job
                .after
                .iter()
                .map(|name| {
                    by_name.get(name.as_str()).copied().ok_or_else(|| {
                        BatchError::Plan(format!(
                            "job '{}' runs after '{}', which is not declared before it",
                            job.name, name
                        ))
                    })
                })
                .collect::<Result<Vec<JobId>>>()?;

            let mut work = CommandWork::new(job.command.iter().cloned())
                .with_name(job.name.clone())
                .direct_io(job.direct_io);
            if let Some(cwd) = &job.cwd {
                work = work.current_dir(cwd);
            }

            let id = scheduler.submit_command(work, &deps).await?;
            by_name.insert(job.name.as_str(), id);
            submitted.push((job.name.clone(), id));
        }
        Ok(submitted)
    }
}
