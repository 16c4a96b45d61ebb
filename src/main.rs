use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use batch_lite::plan::JobPlan;
use batch_lite::scheduler::{JobId, JobSummary, JoinOutcome};
use batch_lite::shutdown::install_shutdown_handler;
use batch_lite::{BatchScheduler, SchedulerConfig};

#[derive(Parser, Debug)]
#[command(name = "batch-lite")]
#[command(version)]
#[command(about = "A dependency-aware batch job scheduler")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a JSON job plan and wait for every job to finish
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the job plan (JSON)
    plan: PathBuf,

    /// Maximum number of jobs running at once (defaults to the CPU count)
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Output format for the final summary
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct RunOutput<'a> {
    outcome: &'a JoinOutcome,
    jobs: &'a [JobSummary],
}

async fn run_plan(args: RunArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let config = match args.jobs {
        Some(jobs) => SchedulerConfig::new(jobs),
        None => SchedulerConfig::default(),
    };
    let shutdown = install_shutdown_handler()?;
    let scheduler = BatchScheduler::with_shutdown(config, shutdown)?;

    let plan = JobPlan::load(&args.plan).await?;
    tracing::info!(
        plan = %args.plan.display(),
        jobs = plan.jobs.len(),
        parallelism = scheduler.parallelism(),
        "Running job plan"
    );

    let submitted = plan.submit_all(&scheduler).await?;
    let handles: Vec<JobId> = submitted.iter().map(|(_, id)| *id).collect();
    let outcome = scheduler.join(&handles).await?;
    let jobs = scheduler.jobs().await;

    match args.output {
        OutputFormat::Json => {
            let output = RunOutput {
                outcome: &outcome,
                jobs: &jobs,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => print_table(&jobs, &outcome),
    }

    Ok(outcome.is_success())
}

fn print_table(jobs: &[JobSummary], outcome: &JoinOutcome) {
    println!("{:<8} {:<24} {:<10} {:<10} DETAIL", "ID", "NAME", "STATE", "TIME");
    println!("{}", "-".repeat(72));
    for job in jobs {
        let elapsed = match (job.started_at, job.completed_at) {
            (Some(start), Some(end)) => format!("{}ms", (end - start).num_milliseconds()),
            _ => "-".to_string(),
        };
        let detail = match (&job.error, job.skipped_because) {
            (Some(error), _) => error.lines().next().unwrap_or_default().to_string(),
            (None, Some(cause)) => format!("skipped, {} failed", cause),
            (None, None) => String::new(),
        };
        println!(
            "{:<8} {:<24} {:<10} {:<10} {}",
            job.id.to_string(),
            job.name,
            job.state.to_string(),
            elapsed,
            detail
        );
    }
    println!();
    match outcome {
        JoinOutcome::AllSucceeded => println!("All {} job(s) succeeded", jobs.len()),
        JoinOutcome::PartialFailure(failure) => println!("{}", failure),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let result = match args.command {
        Commands::Run(run_args) => run_plan(run_args).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            ExitCode::from(2)
        }
    }
}
