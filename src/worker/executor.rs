use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;

use crate::error::WorkError;
use crate::scheduler::JobArgs;
use crate::worker::{Work, WorkFuture, WorkResult};

/// Result of a finished external command. In direct I/O mode the output went
/// straight to the caller's terminal, so `stdout` and `stderr` are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Runs an external command as a job.
///
/// Positional job arguments are appended to the argument vector. A non-zero
/// exit is a job failure.
#[derive(Debug, Clone)]
pub struct CommandWork {
    name: String,
    argv: Vec<String>,
    cwd: Option<PathBuf>,
    direct_io: bool,
}

impl CommandWork {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        let name = argv
            .first()
            .map(|program| {
                Path::new(program)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| program.clone())
            })
            .unwrap_or_else(|| "command".to_string());
        Self {
            name,
            argv,
            cwd: None,
            direct_io: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Stream the child's stdout/stderr to ours instead of capturing it.
    pub fn direct_io(mut self, direct_io: bool) -> Self {
        self.direct_io = direct_io;
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn is_direct_io(&self) -> bool {
        self.direct_io
    }

    /// Run the command outside the job graph.
    pub async fn run(&self) -> Result<CommandOutput, WorkError> {
        execute_command(&self.argv, self.cwd.as_deref(), self.direct_io).await
    }
}

impl Work for CommandWork {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: JobArgs) -> WorkFuture {
        let mut argv = self.argv.clone();
        argv.extend(args.positional_strings());
        Box::pin(run_command_job(argv, self.cwd.clone(), self.direct_io))
    }
}

async fn run_command_job(argv: Vec<String>, cwd: Option<PathBuf>, direct_io: bool) -> WorkResult {
    let output = execute_command(&argv, cwd.as_deref(), direct_io).await?;
    serde_json::to_value(output).map_err(|e| WorkError::failed(e.to_string()))
}

/// Execute `argv` and wait for it to exit.
///
/// With `direct_io` the child inherits our stdout and stderr so long-running
/// tools can report progress live. Otherwise both streams are captured.
pub async fn execute_command(
    argv: &[String],
    cwd: Option<&Path>,
    direct_io: bool,
) -> Result<CommandOutput, WorkError> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| WorkError::InvalidArguments("empty command line".to_string()))?;

    tracing::info!(command = %argv.join(" "), cwd = ?cwd, direct_io, "Running command");

    let mut command = Command::new(program);
    command.args(rest).stdin(Stdio::null());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    if direct_io {
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        let status = command.status().await.map_err(|source| WorkError::Spawn {
            program: program.clone(),
            source,
        })?;
        let exit_code = status.code();
        if !status.success() {
            tracing::warn!(program = %program, exit_code = ?exit_code, "Command failed");
            return Err(WorkError::NonZeroExit {
                program: program.clone(),
                code: exit_code,
                detail: format!("Exit code: {:?}", exit_code),
            });
        }
        return Ok(CommandOutput {
            exit_code,
            stdout: None,
            stderr: None,
        });
    }

    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let output = command.output().await.map_err(|source| WorkError::Spawn {
        program: program.clone(),
        source,
    })?;
    process_output(program, output)
}

fn process_output(program: &str, output: std::process::Output) -> Result<CommandOutput, WorkError> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code();

    if !output.status.success() {
        tracing::warn!(program, exit_code = ?exit_code, "Command failed");
        return Err(WorkError::NonZeroExit {
            program: program.to_string(),
            code: exit_code,
            detail: if stderr.trim().is_empty() {
                format!("Exit code: {:?}", exit_code)
            } else {
                stderr.trim_end().to_string()
            },
        });
    }

    tracing::debug!(program, exit_code = ?exit_code, "Command completed");
    Ok(CommandOutput {
        exit_code,
        stdout: non_empty(stdout),
        stderr: non_empty(stderr),
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
