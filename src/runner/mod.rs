//! Report runners: the units of work that compute one report for one period.
//!
//! The coordinator treats runners as external collaborators. It only relies on
//! the protocol:
//! - rerunning for the same period recomputes, it never accumulates
//! - the caller bounds execution time and may abort the run at any await point
//! - failure is reported either as `Err(RunnerError)` or as a `RunResult`
//!   with `success == false`, never as a silent success
//!
//! # Implementations
//!
//! - `DailyInventoryRunner`: per-SKU shipped units for one day
//! - `WeeklyAggregationRunner`: weekly totals into the rolling history
//! - `MonthlyBillingRunner`: carrier/service charge reconciliation
//! - `CommandRunner`: any of the above delegated to an external process

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ledger::Details;
use crate::period::{PeriodKey, ReportType};
use crate::sources::SourceError;

pub mod command;
pub mod daily;
pub mod monthly;
pub mod weekly;

pub use command::CommandRunner;
pub use daily::DailyInventoryRunner;
pub use monthly::{group_charges, ChargeGroup, MonthlyBillingRunner};
pub use weekly::WeeklyAggregationRunner;

/// Errors raised while computing a report.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("data source error: {0}")]
    Source(#[from] SourceError),

    #[error("failed to start command: {0}")]
    Spawn(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("invalid runner output: {0}")]
    InvalidOutput(String),

    #[error("{runner} cannot run {requested} reports")]
    WrongReportType {
        runner: ReportType,
        requested: ReportType,
    },
}

/// Outcome of a runner invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub summary: String,
    #[serde(default)]
    pub details: Details,
}

impl RunResult {
    pub fn succeeded(summary: impl Into<String>, details: Details) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            details,
        }
    }

    pub fn failed(summary: impl Into<String>, details: Details) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            details,
        }
    }
}

/// Computes one report type for a given period.
#[async_trait]
pub trait ReportRunner: Send + Sync + 'static {
    /// The report type this runner produces.
    fn report_type(&self) -> ReportType;

    /// Compute the report for `period`.
    async fn run(&self, period: &PeriodKey) -> Result<RunResult, RunnerError>;
}

/// Reject periods meant for another runner.
pub(crate) fn ensure_report_type(
    runner: ReportType,
    period: &PeriodKey,
) -> Result<(), RunnerError> {
    if period.report_type != runner {
        return Err(RunnerError::WrongReportType {
            runner,
            requested: period.report_type,
        });
    }
    Ok(())
}

/// Registry of one runner per report type.
#[derive(Clone, Default)]
pub struct RunnerSet {
    runners: HashMap<ReportType, Arc<dyn ReportRunner>>,
}

impl RunnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `runner`, replacing any previous runner for its type.
    pub fn register(&mut self, runner: Arc<dyn ReportRunner>) {
        self.runners.insert(runner.report_type(), runner);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, runner: Arc<dyn ReportRunner>) -> Self {
        self.register(runner);
        self
    }

    pub fn get(&self, report_type: ReportType) -> Option<Arc<dyn ReportRunner>> {
        self.runners.get(&report_type).cloned()
    }

    /// Registered report types, in display order.
    pub fn report_types(&self) -> Vec<ReportType> {
        ReportType::ALL
            .into_iter()
            .filter(|rt| self.runners.contains_key(rt))
            .collect()
    }
}

impl std::fmt::Debug for RunnerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerSet")
            .field("report_types", &self.report_types())
            .finish()
    }
}
