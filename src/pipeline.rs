//! Multi-stage analysis over a series of revision ranges.
//!
//! Every revision range gets its own chain of jobs:
//!
//! ```text
//! commit analysis ─┬─> "detecting clusters" log
//!                  └─> cluster detection ─┬─> "generating reports" log ─┐
//!                                         ├─────────────────────────────┴─> layout graph (one per file) ─┐
//!                                         └──────────────────────────────────────────────────────────────┴─> report
//! ```
//!
//! The chains of all ranges run side by side. Once every cluster detection
//! and report has finished, two global stages run one after the other:
//! time-series preparation, then time-series analysis.
//!
//! Mailing lists are analysed separately by [`AnalysisPipeline::analyse_mailing_lists`],
//! one external command per list, in order.
//!
//! The stages themselves (database access, analysis tools, renderers) are
//! supplied through [`AnalysisStages`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::batch::BatchScheduler;
use crate::error::{BatchError, Result};
use crate::scheduler::JobId;
use crate::worker::{CommandWork, JobSpec};

/// A revision range to analyse, with the directory its results go to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRange {
    pub id: u64,
    pub start: String,
    pub end: String,
    pub result_dir: PathBuf,
}

impl RevisionRange {
    pub fn new(
        id: u64,
        start: impl Into<String>,
        end: impl Into<String>,
        result_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            start: start.into(),
            end: end.into(),
            result_dir: result_dir.into(),
        }
    }
}

impl std::fmt::Display for RevisionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A mailing list configured for the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailingList {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl MailingList {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lay out cluster graphs and generate a report per range.
    pub generate_reports: bool,
    /// Extension of the graph files cluster detection leaves in a range's result dir.
    pub graph_extension: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generate_reports: true,
            graph_extension: "dot".to_string(),
        }
    }
}

/// The work behind each pipeline stage.
pub trait AnalysisStages: Send + Sync {
    fn commit_analysis(&self, range: &RevisionRange) -> JobSpec;

    /// External cluster detection for the `index`-th range. Runs with direct I/O.
    fn cluster_detection(&self, index: usize, range: &RevisionRange) -> CommandWork;

    fn layout_graph(&self, graph_file: &Path) -> JobSpec;

    fn generate_report(&self, range: &RevisionRange) -> JobSpec;

    fn prepare_time_series(&self) -> JobSpec;

    /// Final stage, run directly after everything else has finished.
    fn analyse_time_series(&self) -> CommandWork;

    /// Analysis of the `index`-th configured mailing list. Runs with direct I/O.
    fn mailing_list(&self, index: usize, list: &MailingList) -> CommandWork;
}

/// Handles of the jobs submitted for one revision range.
#[derive(Debug, Clone)]
pub struct RangeJobs {
    pub range_id: u64,
    pub commit_analysis: JobId,
    pub cluster_detection: JobId,
    pub layouts: Vec<JobId>,
    pub report: Option<JobId>,
}

impl RangeJobs {
    /// Jobs the global stages wait for.
    pub fn terminal_jobs(&self) -> Vec<JobId> {
        let mut jobs = vec![self.cluster_detection];
        jobs.extend(self.report);
        jobs
    }
}

pub struct AnalysisPipeline<S> {
    stages: S,
    config: PipelineConfig,
}

impl<S: AnalysisStages> AnalysisPipeline<S> {
    pub fn new(stages: S, config: PipelineConfig) -> Self {
        Self { stages, config }
    }

    pub fn stages(&self) -> &S {
        &self.stages
    }

    /// Submit the chain of jobs for one range without waiting for it.
    pub async fn submit_range(
        &self,
        scheduler: &BatchScheduler,
        index: usize,
        range: &RevisionRange,
    ) -> Result<RangeJobs> {
        let commit = scheduler
            .submit_spec(self.stages.commit_analysis(range), &[])
            .await?;

        scheduler
            .log(
                format!("  -> Analysing revision range {}: Detecting clusters...", range),
                &[commit],
            )
            .await?;
        let cluster_cmd = self.stages.cluster_detection(index, range).direct_io(true);
        let clusters = scheduler.submit_command(cluster_cmd, &[commit]).await?;

        let mut jobs = RangeJobs {
            range_id: range.id,
            commit_analysis: commit,
            cluster_detection: clusters,
            layouts: Vec::new(),
            report: None,
        };
        if !self.config.generate_reports {
            return Ok(jobs);
        }

        // Graph files are picked up now, while the jobs are being planned.
        let graph_files = self.graph_files(&range.result_dir).await?;
        let announce = scheduler
            .log(
                format!("  -> Analysing revision range {}: Generating Reports...", range),
                &[clusters],
            )
            .await?;
        for file in &graph_files {
            let layout = scheduler
                .submit_spec(self.stages.layout_graph(file), &[clusters, announce])
                .await?;
            jobs.layouts.push(layout);
        }

        let mut report_deps = jobs.layouts.clone();
        report_deps.push(clusters);
        let report = scheduler
            .submit_spec(self.stages.generate_report(range), &report_deps)
            .await?;
        jobs.report = Some(report);

        tracing::debug!(
            range = %range,
            layouts = jobs.layouts.len(),
            "Revision range submitted"
        );
        Ok(jobs)
    }

    /// Run the whole pipeline. Any failure in the per-range stages aborts the
    /// run before the global stages start.
    pub async fn run(
        &self,
        scheduler: &BatchScheduler,
        ranges: &[RevisionRange],
    ) -> Result<Vec<RangeJobs>> {
        tracing::info!(ranges = ranges.len(), "Analysing revision ranges");

        let mut submitted = Vec::with_capacity(ranges.len());
        for (index, range) in ranges.iter().enumerate() {
            submitted.push(self.submit_range(scheduler, index, range).await?);
        }

        let awaited: Vec<JobId> = submitted.iter().flat_map(RangeJobs::terminal_jobs).collect();
        scheduler.join(&awaited).await?.into_result()?;

        tracing::info!("Preparing time series data");
        let prepare = scheduler
            .submit_spec(self.stages.prepare_time_series(), &[])
            .await?;
        scheduler.join(&[prepare]).await?.into_result()?;

        tracing::info!("Analysing time series");
        let analysis = self.stages.analyse_time_series().direct_io(true);
        analysis
            .run()
            .await
            .map_err(|source| BatchError::StageFailed {
                stage: "time series analysis".to_string(),
                source,
            })?;

        tracing::info!("Analysis run complete");
        Ok(submitted)
    }

    /// Analyse each mailing list in turn, stopping at the first failure.
    pub async fn analyse_mailing_lists(&self, lists: &[MailingList]) -> Result<()> {
        for (index, list) in lists.iter().enumerate() {
            tracing::info!(
                "=> Analysing mailing list '{}' of type '{}'",
                list.name,
                list.kind
            );
            self.stages
                .mailing_list(index, list)
                .direct_io(true)
                .run()
                .await
                .map_err(|source| BatchError::StageFailed {
                    stage: format!("mailing list '{}'", list.name),
                    source,
                })?;
        }
        tracing::info!(lists = lists.len(), "Mailing list analysis complete");
        Ok(())
    }

    async fn graph_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path
                .extension()
                .map(|ext| ext == self.config.graph_extension.as_str())
                .unwrap_or(false);
            if matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
