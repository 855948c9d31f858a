//! Oracare report coordinator
//!
//! Runs the dashboard's end-of-day, end-of-week and end-of-month reports on
//! demand. Each trigger is guarded against overlapping runs of the same
//! report, runs its prerequisites first, and is recorded in an append-only
//! run ledger so repeated clicks for a finished period are no-ops.

pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod deps;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod period;
pub mod runner;
pub mod sources;
#[cfg(feature = "sqlite")]
pub mod storage;
pub mod utils;

pub use coordinator::{Disposition, ReportCoordinator, StatusReport, TriggerOutcome};
pub use error::CoordinatorError;
pub use guard::{ExecutionGuard, GuardPermit};
pub use ledger::{ReportRun, RunLedger, RunStatus};
pub use period::{PeriodCalculator, PeriodKey, ReportType, WeekStart};
