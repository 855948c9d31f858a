//! Run ledger: the persistent audit log of report executions.
//!
//! One row is written per attempt at a `(report type, covered period)` key.
//! Rows are never deleted. A forced rerun appends a new row; when it succeeds
//! the previously current success is stamped `superseded_at`, so at most one
//! *current* SUCCEEDED row exists per key at any time.
//!
//! # Implementations
//!
//! - `SqliteRunLedger`: SQLite storage, uniqueness enforced by a partial index
//! - `MockRunLedger`: In-memory ledger with failure injection for testing

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::period::ReportType;

pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockRunLedger;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRunLedger;

/// Free-form structured output attached to a run.
pub type Details = serde_json::Map<String, serde_json::Value>;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{report_type} report for {period} already succeeded")]
    DuplicateRun {
        report_type: ReportType,
        period: NaiveDate,
    },

    #[error("run {0} not found")]
    NotFound(i64),

    #[error("run {run_id} is {status}, expected IN_PROGRESS")]
    InvalidTransition { run_id: i64, status: RunStatus },

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

/// Lifecycle state of a single run row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "IN_PROGRESS",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IN_PROGRESS" => Ok(RunStatus::InProgress),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(LedgerError::Corrupt(format!("unknown status {other}"))),
        }
    }
}

/// Terminal outcome passed to [`RunLedger::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

impl From<RunOutcome> for RunStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Succeeded => RunStatus::Succeeded,
            RunOutcome::Failed => RunStatus::Failed,
        }
    }
}

/// One attempt at generating a report for a period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRun {
    pub id: i64,
    pub report_type: ReportType,
    pub covered_period: NaiveDate,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub message: String,
    pub details: Details,
    /// Started under the forced-rerun flag.
    pub forced: bool,
    /// Set when a later forced rerun replaced this success.
    pub superseded_at: Option<DateTime<Utc>>,
}

impl ReportRun {
    /// Whether this row is the current answer for its key.
    pub fn is_current_success(&self) -> bool {
        self.status == RunStatus::Succeeded && self.superseded_at.is_none()
    }
}

/// Ticket for an IN_PROGRESS row, consumed by [`RunLedger::complete`].
///
/// Not `Clone`: each `begin` yields exactly one handle and each handle can be
/// completed exactly once.
#[derive(Debug)]
pub struct RunHandle {
    run_id: i64,
    report_type: ReportType,
    period: NaiveDate,
    forced: bool,
}

impl RunHandle {
    /// Issued by ledger implementations from `begin`.
    pub fn new(run_id: i64, report_type: ReportType, period: NaiveDate, forced: bool) -> Self {
        Self {
            run_id,
            report_type,
            period,
            forced,
        }
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn report_type(&self) -> ReportType {
        self.report_type
    }

    pub fn period(&self) -> NaiveDate {
        self.period
    }

    pub fn forced(&self) -> bool {
        self.forced
    }
}

/// Interface for the run ledger.
#[async_trait]
pub trait RunLedger: Send + Sync + 'static {
    /// Create tables and indexes if they don't exist.
    async fn init_schema(&self) -> Result<()>;

    /// True iff a current SUCCEEDED row exists for the key.
    async fn has_succeeded(&self, report_type: ReportType, period: NaiveDate) -> Result<bool>;

    /// Record the start of a run as IN_PROGRESS.
    ///
    /// Fails with [`LedgerError::DuplicateRun`] when the key already has a
    /// current success and `force` is false.
    async fn begin(
        &self,
        report_type: ReportType,
        period: NaiveDate,
        force: bool,
    ) -> Result<RunHandle>;

    /// Move the handle's row to its terminal state.
    ///
    /// A successful forced run supersedes the previous success atomically.
    async fn complete(
        &self,
        handle: RunHandle,
        outcome: RunOutcome,
        message: &str,
        details: &Details,
    ) -> Result<ReportRun>;

    /// Most recently triggered run of a type, any status.
    async fn latest(&self, report_type: ReportType) -> Result<Option<ReportRun>>;

    /// Every attempt for a key, oldest first.
    async fn history(&self, report_type: ReportType, period: NaiveDate) -> Result<Vec<ReportRun>>;

    /// Rows still marked IN_PROGRESS, oldest first.
    async fn in_progress(&self) -> Result<Vec<ReportRun>>;

    /// Fail an IN_PROGRESS row that no live process will ever complete.
    async fn abandon(&self, run_id: i64, message: &str) -> Result<()>;
}
