//! Prerequisite resolution between report types.
//!
//! The prerequisite table is static and one level deep: a prerequisite never
//! pulls in prerequisites of its own, so cycles cannot form. Whether a
//! prerequisite still needs to run is decided fresh on every trigger by
//! asking the ledger.

use chrono::NaiveDate;
use serde::Serialize;

use crate::ledger::{self, RunLedger};
use crate::period::{PeriodCalculator, PeriodKey, ReportType};

/// A prerequisite report that must succeed before the dependent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Prerequisite {
    pub report_type: ReportType,
    pub period: PeriodKey,
}

/// Decides which prerequisite reports a trigger must run first.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver {
    periods: PeriodCalculator,
}

impl DependencyResolver {
    pub fn new(periods: PeriodCalculator) -> Self {
        Self { periods }
    }

    /// Report types that must be satisfied before `report_type`, in run order.
    pub fn prerequisites(report_type: ReportType) -> &'static [ReportType] {
        match report_type {
            ReportType::Daily => &[],
            ReportType::Weekly => &[ReportType::Daily],
            ReportType::Monthly => &[],
        }
    }

    /// Prerequisites for a trigger of `report_type` on `reference` that have
    /// not yet succeeded for their own period.
    ///
    /// A weekly trigger checks the daily report for the reference day itself,
    /// not for every day in the week.
    pub async fn resolve(
        &self,
        ledger: &dyn RunLedger,
        report_type: ReportType,
        reference: NaiveDate,
    ) -> ledger::Result<Vec<Prerequisite>> {
        let mut missing = Vec::new();
        for &prereq in Self::prerequisites(report_type) {
            let period = self.periods.covered_period(prereq, reference);
            if !ledger.has_succeeded(prereq, period.start).await? {
                missing.push(Prerequisite {
                    report_type: prereq,
                    period,
                });
            }
        }
        Ok(missing)
    }
}
