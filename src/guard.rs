//! Per-report-type execution guard.
//!
//! At most one run of each report type may be in flight within a process.
//! A caller that cannot acquire the gate is rejected immediately; there is no
//! queue. The guard is an injected value rather than global state, so each
//! coordinator (and each test) owns an isolated set of gates.
//!
//! The guard is process-local. Several processes sharing one ledger database
//! are only protected by the ledger's uniqueness constraint, not by this gate.
//!
//! ```rust,ignore
//! let guard = ExecutionGuard::new();
//! let Some(permit) = guard.try_lock(ReportType::Daily) else {
//!     return Err(CoordinatorError::AlreadyRunning(ReportType::Daily));
//! };
//! // ... run the report ...
//! drop(permit); // or let it fall out of scope on any exit path
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::period::ReportType;

/// Set of report types whose gate is currently held.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGuard {
    held: Arc<Mutex<HashSet<ReportType>>>,
}

impl ExecutionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the std mutex cannot leave the set half-updated,
    // so a poisoned lock is still safe to use.
    fn held(&self) -> MutexGuard<'_, HashSet<ReportType>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the gate for `report_type`. Returns false if already held.
    pub fn acquire(&self, report_type: ReportType) -> bool {
        let acquired = self.held().insert(report_type);
        debug!(%report_type, acquired, "Execution guard acquire");
        acquired
    }

    /// Free the gate for `report_type`. Idempotent.
    pub fn release(&self, report_type: ReportType) {
        if self.held().remove(&report_type) {
            debug!(%report_type, "Execution guard released");
        }
    }

    pub fn is_held(&self, report_type: ReportType) -> bool {
        self.held().contains(&report_type)
    }

    /// Take the gate and return a permit that frees it when dropped.
    pub fn try_lock(&self, report_type: ReportType) -> Option<GuardPermit> {
        self.acquire(report_type).then(|| GuardPermit {
            guard: self.clone(),
            report_type,
        })
    }
}

/// Proof that the holder owns the gate for one report type.
///
/// Releases the gate on drop, including when the owning future is cancelled
/// or unwinds.
#[derive(Debug)]
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GuardPermit {
    guard: ExecutionGuard,
    report_type: ReportType,
}

impl GuardPermit {
    pub fn report_type(&self) -> ReportType {
        self.report_type
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.guard.release(self.report_type);
    }
}
