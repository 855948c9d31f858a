//! Runner that delegates a report to an external process.
//!
//! The command is an argv array (no shell interpretation). The period start
//! is appended as the last argument and the full key is passed through the
//! environment:
//!
//! - `ORACARE_REPORT_TYPE`: `DAILY`, `WEEKLY` or `MONTHLY`
//! - `ORACARE_PERIOD_START` / `ORACARE_PERIOD_END`: inclusive ISO dates
//!
//! The process must print a JSON `RunResult` on stdout and exit zero. The
//! child is killed if the run is aborted, so a timed-out report leaves no
//! orphan behind.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ensure_report_type, ReportRunner, RunResult, RunnerError};
use crate::period::{PeriodKey, ReportType};

/// Longest stderr excerpt kept in a failure message.
const STDERR_EXCERPT: usize = 512;

/// Runs a configured executable for one report type.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    report_type: ReportType,
    command: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandRunner {
    /// Create a runner for `command`, where the first element is the
    /// executable and the rest are arguments.
    pub fn new(report_type: ReportType, command: Vec<String>) -> Result<Self, RunnerError> {
        if command.first().map_or(true, |exe| exe.trim().is_empty()) {
            return Err(RunnerError::Spawn(
                "command array cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            report_type,
            command,
            working_dir: None,
        })
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn build(&self, period: &PeriodKey) -> Command {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg(period.start.to_string())
            .env("ORACARE_REPORT_TYPE", period.report_type.as_str())
            .env("ORACARE_PERIOD_START", period.start.to_string())
            .env("ORACARE_PERIOD_END", period.end.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            if dir.exists() {
                cmd.current_dir(dir);
            } else {
                warn!(dir = %dir.display(), "Working directory does not exist, using current directory");
            }
        }
        cmd
    }
}

#[async_trait]
impl ReportRunner for CommandRunner {
    fn report_type(&self) -> ReportType {
        self.report_type
    }

    async fn run(&self, period: &PeriodKey) -> Result<RunResult, RunnerError> {
        ensure_report_type(self.report_type, period)?;

        info!(
            executable = %self.command[0],
            args = ?&self.command[1..],
            %period,
            "Spawning report command"
        );

        let output = self
            .build(period)
            .output()
            .await
            .map_err(|e| RunnerError::Spawn(format!("{}: {e}", self.command[0])))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "Report command stderr");
        }

        if !output.status.success() {
            return Err(RunnerError::Command(format!(
                "{} {}: {}",
                self.command[0],
                output.status,
                excerpt(stderr.trim())
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str::<RunResult>(stdout.trim())
            .map_err(|e| RunnerError::InvalidOutput(format!("{}: {e}", self.command[0])))
    }
}

fn excerpt(text: &str) -> &str {
    if text.len() <= STDERR_EXCERPT {
        return text;
    }
    let mut end = STDERR_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
