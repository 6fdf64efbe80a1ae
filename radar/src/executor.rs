//! Parallel test execution.
//!
//! Runs discovered test units as isolated subprocesses under a bounded
//! worker pool, each with a hard timeout. Coverage reported by the
//! subprocesses is merged into a run-level union by a single aggregator
//! task fed over a channel, so workers never contend on shared state.

use crate::scanner::TestUnit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A covered line identifier in `<file>:<line>` form.
pub type CoverageLine = String;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("parallel_jobs must be greater than 0 (got {jobs})")]
    InvalidParallelism { jobs: usize },

    #[error("Timeout must be greater than 0")]
    InvalidTimeout,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Passed,
    Failed,
    Errored,
    TimedOut,
    Skipped,
}

/// Outcome of running one test unit. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub unit_id: String,
    pub status: ExecutionStatus,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub covered_lines: Option<BTreeSet<CoverageLine>>,
    pub error_message: Option<String>,
}

impl ExecutionResult {
    fn errored(unit_id: &str, duration: Duration, message: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            status: ExecutionStatus::Errored,
            duration,
            stdout: String::new(),
            stderr: String::new(),
            covered_lines: None,
            error_message: Some(message.into()),
        }
    }

    fn skipped(unit_id: &str, message: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            status: ExecutionStatus::Skipped,
            duration: Duration::ZERO,
            stdout: String::new(),
            stderr: String::new(),
            covered_lines: None,
            error_message: Some(message.into()),
        }
    }

    /// Placeholder for analysis-only runs where the unit was never executed.
    pub fn not_executed(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            status: ExecutionStatus::Skipped,
            duration: Duration::ZERO,
            stdout: String::new(),
            stderr: String::new(),
            covered_lines: None,
            error_message: None,
        }
    }
}

/// Command used to run one test unit. The `{target}` placeholder expands to
/// the unit's file path, or `<file>::<case>` for case-level units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![
                "-m".to_string(),
                "pytest".to_string(),
                "{target}".to_string(),
                "-v".to_string(),
                "--tb=short".to_string(),
            ],
        }
    }
}

impl CommandTemplate {
    pub fn render(&self, unit: &TestUnit) -> (String, Vec<String>) {
        let target = match &unit.case_name {
            Some(case) => format!("{}::{}", unit.file_path.display(), case),
            None => unit.file_path.display().to_string(),
        };

        let args = self
            .args
            .iter()
            .map(|a| a.replace("{target}", &target))
            .collect();

        (self.program.clone(), args)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub parallel_jobs: usize,
    pub timeout: Duration,
    pub collect_coverage: bool,
    pub command: CommandTemplate,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel_jobs: 2,
            timeout: Duration::from_secs(300),
            collect_coverage: false,
            command: CommandTemplate::default(),
        }
    }
}

/// Merge per-unit coverage into the run-level set. Union semantics, so
/// re-merging an identical set is a no-op.
pub fn merge_coverage(into: &mut BTreeSet<CoverageLine>, unit_lines: &BTreeSet<CoverageLine>) {
    into.extend(unit_lines.iter().cloned());
}

/// Single-writer reducer for run-level coverage. Workers send each unit's
/// lines through the sender; the task resolves to the union once every
/// sender has been dropped.
pub(crate) fn coverage_reducer() -> (
    mpsc::UnboundedSender<BTreeSet<CoverageLine>>,
    tokio::task::JoinHandle<BTreeSet<CoverageLine>>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<BTreeSet<CoverageLine>>();
    let handle = tokio::spawn(async move {
        let mut union = BTreeSet::new();
        while let Some(lines) = rx.recv().await {
            merge_coverage(&mut union, &lines);
        }
        union
    });
    (tx, handle)
}

fn parse_coverage(stdout: &str) -> BTreeSet<CoverageLine> {
    stdout
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("COVERAGE:")?;
            let (file, lineno) = rest.rsplit_once(':')?;
            if file.is_empty() || lineno.parse::<u64>().is_err() {
                return None;
            }
            Some(format!("{}:{}", file, lineno))
        })
        .collect()
}

fn map_exit_code(code: Option<i32>) -> ExecutionStatus {
    match code {
        Some(0) => ExecutionStatus::Passed,
        Some(1) => ExecutionStatus::Failed,
        Some(5) => ExecutionStatus::Skipped,
        _ => ExecutionStatus::Errored,
    }
}

async fn read_pipe<R: tokio::io::AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Resolves once the cancellation flag flips to true; pends forever otherwise.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // The child runs in its own process group (see spawn below); signal the
    // whole group so test-spawned grandchildren do not outlive the unit.
    let _ = std::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{}", pid)])
        .status();
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[derive(Clone)]
pub struct Executor {
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutionError> {
        if config.parallel_jobs == 0 {
            return Err(ExecutionError::InvalidParallelism { jobs: 0 });
        }
        if config.timeout.is_zero() {
            return Err(ExecutionError::InvalidTimeout);
        }

        let semaphore = Arc::new(Semaphore::new(config.parallel_jobs));
        Ok(Self { config, semaphore })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a single unit through the bounded pool.
    ///
    /// Never returns an error: spawn failures, timeouts, and cancellation are
    /// all recorded in the unit's `ExecutionResult`. When coverage collection
    /// is on, the unit's covered lines are also sent to `coverage_tx`.
    pub async fn run_unit(
        &self,
        unit: &TestUnit,
        coverage_tx: Option<&mpsc::UnboundedSender<BTreeSet<CoverageLine>>>,
        cancel: &watch::Receiver<bool>,
    ) -> ExecutionResult {
        let permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return ExecutionResult::errored(&unit.id, Duration::ZERO, "worker pool closed")
            }
        };

        let mut cancel = cancel.clone();
        if *cancel.borrow() {
            drop(permit);
            return ExecutionResult::skipped(&unit.id, "run cancelled before unit started");
        }

        let start = Instant::now();
        let (program, args) = self.config.command.render(unit);
        debug!("Running unit {} via {} {:?}", unit.id, program, args);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn subprocess for {}: {}", unit.id, e);
                return ExecutionResult::errored(
                    &unit.id,
                    start.elapsed(),
                    format!("failed to spawn {}: {}", program, e),
                );
            }
        };

        let pid = child.id();
        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let (status, error_message) = tokio::select! {
            waited = timeout(self.config.timeout, child.wait()) => match waited {
                Ok(Ok(exit)) => (map_exit_code(exit.code()), match map_exit_code(exit.code()) {
                    ExecutionStatus::Errored => Some(format!("subprocess exited with {}", exit)),
                    _ => None,
                }),
                Ok(Err(e)) => (
                    ExecutionStatus::Errored,
                    Some(format!("failed to wait on subprocess: {}", e)),
                ),
                Err(_) => {
                    warn!(
                        "Unit {} exceeded timeout of {:?}, killing subprocess",
                        unit.id, self.config.timeout
                    );
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    let _ = child.kill().await;
                    (
                        ExecutionStatus::TimedOut,
                        Some(format!(
                            "timed out after {}s",
                            self.config.timeout.as_secs_f64()
                        )),
                    )
                }
            },
            _ = cancelled(&mut cancel) => {
                info!("Cancellation requested, killing subprocess for {}", unit.id);
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let _ = child.kill().await;
                (
                    ExecutionStatus::Errored,
                    Some("run cancelled while unit was executing".to_string()),
                )
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        drop(permit);

        let covered_lines = if self.config.collect_coverage {
            let lines = parse_coverage(&stdout);
            if let Some(tx) = coverage_tx {
                let _ = tx.send(lines.clone());
            }
            Some(lines)
        } else {
            None
        };

        ExecutionResult {
            unit_id: unit.id.clone(),
            status,
            duration: start.elapsed(),
            stdout,
            stderr,
            covered_lines,
            error_message,
        }
    }

}
