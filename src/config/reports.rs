//! Report scheduling and runner configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::period::{PeriodCalculator, ReportType, WeekStart};

/// Conventions shared by every report.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// First day of the business week.
    pub week_start: WeekStart,
    /// Upper bound on a single runner invocation.
    pub timeout_secs: u64,
    /// Weeks kept in the rolling shipment history.
    pub history_weeks: usize,
    /// Mark runs left IN_PROGRESS by a previous process as FAILED at startup.
    pub fail_stale_on_startup: bool,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            week_start: WeekStart::Monday,
            timeout_secs: 300,
            history_weeks: 52,
            fail_stale_on_startup: false,
        }
    }
}

impl ReportsConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn period_calculator(&self) -> PeriodCalculator {
        PeriodCalculator::new(self.week_start)
    }
}

/// External command for one report type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Executable followed by its arguments. No shell interpretation.
    pub command: Vec<String>,
    /// Working directory for the process.
    pub working_dir: Option<String>,
}

/// Optional command overrides. A report type without one uses its built-in runner.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunnersConfig {
    pub daily: Option<CommandConfig>,
    pub weekly: Option<CommandConfig>,
    pub monthly: Option<CommandConfig>,
}

impl RunnersConfig {
    pub fn command_for(&self, report_type: ReportType) -> Option<&CommandConfig> {
        match report_type {
            ReportType::Daily => self.daily.as_ref(),
            ReportType::Weekly => self.weekly.as_ref(),
            ReportType::Monthly => self.monthly.as_ref(),
        }
    }

    /// Every report type with a command configured.
    pub fn configured(&self) -> impl Iterator<Item = (ReportType, &CommandConfig)> {
        ReportType::ALL
            .into_iter()
            .filter_map(|rt| self.command_for(rt).map(|cmd| (rt, cmd)))
    }
}
