//! Errors surfaced at the trigger boundary.

use chrono::NaiveDate;

use crate::ledger::LedgerError;
use crate::period::ReportType;

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Why a trigger did not complete successfully.
///
/// A duplicate run is not an error here: it surfaces as an already-done
/// outcome so repeated clicks stay idempotent.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{0} report is already running")]
    AlreadyRunning(ReportType),

    #[error("{report_type} report for {period} failed: {message}")]
    RunnerFailure {
        report_type: ReportType,
        period: NaiveDate,
        message: String,
    },

    #[error("{report_type} report blocked: prerequisite {prerequisite} failed: {message}")]
    DependencyFailure {
        report_type: ReportType,
        prerequisite: ReportType,
        message: String,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl CoordinatorError {
    /// Short machine-readable kind, used in API responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::AlreadyRunning(_) => "already_running",
            CoordinatorError::RunnerFailure { .. } => "runner_failure",
            CoordinatorError::DependencyFailure { .. } => "dependency_failure",
            CoordinatorError::Ledger(_) => "ledger_error",
        }
    }
}
