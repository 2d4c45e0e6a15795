//! Run execution
//!
//! The agent hands every claimed run to an [`Executor`]. The process
//! executor runs a shell command in a per-workspace directory with the run's
//! identity exported in the environment.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use terrarun_core::dto::run::RunDescriptor;
use tokio::process::Command;
use tracing::{debug, info};

/// Longest failure message forwarded to the server
const MAX_FAILURE_MESSAGE: usize = 4096;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed(String),
}

/// Executes a claimed run
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run to completion. `Err` means the run could not be started at all;
    /// a run that started and failed is `Ok(ExecutionOutcome::Failed)`.
    async fn execute(&self, run: &RunDescriptor) -> Result<ExecutionOutcome>;
}

/// Runs a shell command per entry
pub struct ProcessExecutor {
    command: String,
    work_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(command: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            work_dir: work_dir.into(),
        }
    }

    fn workspace_dir(&self, run: &RunDescriptor) -> PathBuf {
        self.work_dir.join(run.workspace_id.to_string())
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, run: &RunDescriptor) -> Result<ExecutionOutcome> {
        let dir = self.workspace_dir(run);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create work directory {}", dir.display()))?;

        info!(
            "Executing {} of run {} in {}",
            run.operation,
            run.run_id,
            dir.display()
        );

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&dir)
            .env("TERRARUN_RUN_ID", run.run_id.to_string())
            .env("TERRARUN_WORKSPACE_ID", run.workspace_id.to_string())
            .env("TERRARUN_WORKSPACE_NAME", &run.workspace_name)
            .env("TERRARUN_ORGANISATION", &run.organisation)
            .env("TERRARUN_OPERATION", run.operation.as_str())
            .env("TERRARUN_ATTEMPT", run.attempt.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn '{}'", self.command))?;

        debug!(
            "Run {} finished: status={} stdout_len={} stderr_len={}",
            run.run_id,
            output.status,
            output.stdout.len(),
            output.stderr.len()
        );

        if output.status.success() {
            return Ok(ExecutionOutcome::Succeeded);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let mut message = match output.status.code() {
            Some(code) => format!("command exited with status {}", code),
            None => "command terminated by signal".to_string(),
        };
        if !stderr.is_empty() {
            message.push_str(": ");
            message.push_str(tail(stderr, MAX_FAILURE_MESSAGE));
        }

        Ok(ExecutionOutcome::Failed(message))
    }
}

/// The last `max` bytes of `s`, cut on a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }

    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
