//! Test runner adapter
//!
//! Launches the test command as a child process and classifies the run by
//! exit status alone. A nonzero exit is an ordinary result, not an error;
//! only a command that cannot be launched at all is reported as
//! [`RunnerError::Unavailable`].

mod process;

use async_trait::async_trait;
use process::{CaptureError, PartialOutput, capture_child_output, exit_status_code};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

/// Exit code reported when a run is killed for exceeding its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Errors that stop a test run from producing a result
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("test command '{program}' could not be launched: {source}")]
    Unavailable {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to collect output of '{program}': {message}")]
    Output { program: String, message: String },
}

/// An executable plus arguments, run in a working directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl TestCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: PathBuf::from("."),
            timeout: None,
        }
    }

    /// Run a command line through `sh -c`
    pub fn shell(command_line: &str) -> Self {
        Self::new("sh", vec!["-c".into(), command_line.to_string()])
    }

    /// Run `script` directly, picking an interpreter from its extension.
    ///
    /// `.py` goes through `python`, JavaScript through `node`, anything else
    /// is executed as-is.
    pub fn for_script(script: &Path, args: &[String], python: &str) -> Self {
        let script_arg = script.display().to_string();
        let extension = script
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let (program, mut full_args) = match extension {
            "py" => (python.to_string(), vec![script_arg]),
            "js" | "mjs" | "cjs" => ("node".to_string(), vec![script_arg]),
            _ => (script_arg, Vec::new()),
        };
        full_args.extend(args.iter().cloned());

        Self::new(program, full_args)
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable command line
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of one test run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let mut output = self.stdout.clone();
                if !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(&self.stderr);
                output
            }
        }
    }
}

/// Something that can run a test command
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, command: &TestCommand) -> Result<RunOutcome, RunnerError>;
}

/// Runs test commands as real child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl TestRunner for ProcessRunner {
    async fn run(&self, command: &TestCommand) -> Result<RunOutcome, RunnerError> {
        let start = Instant::now();

        tracing::debug!(command = %command.display(), dir = %command.working_dir.display(), "running tests");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Unavailable {
                program: command.program.clone(),
                source,
            })?;

        let mut output = PartialOutput::default();
        let status = match command.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, capture_child_output(&mut child, &mut output)).await {
                    Ok(result) => result,
                    Err(_) => {
                        let _ = child.kill().await;
                        tracing::warn!(command = %command.display(), ?limit, "test run timed out");
                        // The output up to the kill usually shows where it hung
                        let mut stderr = output.stderr();
                        if !stderr.is_empty() && !stderr.ends_with('\n') {
                            stderr.push('\n');
                        }
                        stderr.push_str(&format!("test command timed out after {:?}", limit));
                        return Ok(RunOutcome {
                            exit_code: TIMEOUT_EXIT_CODE,
                            stdout: output.stdout(),
                            stderr,
                            duration: start.elapsed(),
                            timed_out: true,
                        });
                    }
                }
            }
            None => capture_child_output(&mut child, &mut output).await,
        };

        let status = status.map_err(|e: CaptureError| RunnerError::Output {
            program: command.program.clone(),
            message: e.to_string(),
        })?;

        let exit_code = exit_status_code(&status).unwrap_or(-1);
        let outcome = RunOutcome {
            exit_code,
            stdout: output.stdout(),
            stderr: output.stderr(),
            duration: start.elapsed(),
            timed_out: false,
        };

        tracing::debug!(exit_code, duration = ?outcome.duration, "test run finished");
        Ok(outcome)
    }
}
