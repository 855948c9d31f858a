//! Mock RunLedger implementation for testing.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;

use super::{
    Details, LedgerError, ReportRun, Result, RunHandle, RunLedger, RunOutcome, RunStatus,
};
use crate::period::ReportType;

/// Mock ledger that keeps runs in memory.
///
/// Applies the same duplicate and supersede rules as the SQLite ledger.
#[derive(Default)]
pub struct MockRunLedger {
    runs: RwLock<Vec<ReportRun>>,
    fail_on_begin: RwLock<bool>,
    fail_on_complete: RwLock<bool>,
}

impl MockRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_begin(&self, fail: bool) {
        *self.fail_on_begin.write().await = fail;
    }

    pub async fn set_fail_on_complete(&self, fail: bool) {
        *self.fail_on_complete.write().await = fail;
    }

    /// Snapshot of every stored row.
    pub async fn runs(&self) -> Vec<ReportRun> {
        self.runs.read().await.clone()
    }

    /// Insert an IN_PROGRESS row without a handle, as a crashed process would leave it.
    pub async fn insert_orphan(&self, report_type: ReportType, period: NaiveDate) -> i64 {
        let mut runs = self.runs.write().await;
        let id = runs.len() as i64 + 1;
        runs.push(new_row(id, report_type, period, false));
        id
    }
}

fn new_row(id: i64, report_type: ReportType, period: NaiveDate, forced: bool) -> ReportRun {
    ReportRun {
        id,
        report_type,
        covered_period: period,
        triggered_at: Utc::now(),
        completed_at: None,
        status: RunStatus::InProgress,
        message: String::new(),
        details: Details::new(),
        forced,
        superseded_at: None,
    }
}

fn is_current_success_for(run: &ReportRun, report_type: ReportType, period: NaiveDate) -> bool {
    run.report_type == report_type && run.covered_period == period && run.is_current_success()
}

#[async_trait]
impl RunLedger for MockRunLedger {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn has_succeeded(&self, report_type: ReportType, period: NaiveDate) -> Result<bool> {
        let runs = self.runs.read().await;
        Ok(runs
            .iter()
            .any(|r| is_current_success_for(r, report_type, period)))
    }

    async fn begin(
        &self,
        report_type: ReportType,
        period: NaiveDate,
        force: bool,
    ) -> Result<RunHandle> {
        if *self.fail_on_begin.read().await {
            return Err(LedgerError::Database("injected begin failure".to_string()));
        }

        let mut runs = self.runs.write().await;
        if !force
            && runs
                .iter()
                .any(|r| is_current_success_for(r, report_type, period))
        {
            return Err(LedgerError::DuplicateRun {
                report_type,
                period,
            });
        }

        let id = runs.len() as i64 + 1;
        runs.push(new_row(id, report_type, period, force));
        Ok(RunHandle::new(id, report_type, period, force))
    }

    async fn complete(
        &self,
        handle: RunHandle,
        outcome: RunOutcome,
        message: &str,
        details: &Details,
    ) -> Result<ReportRun> {
        if *self.fail_on_complete.read().await {
            return Err(LedgerError::Database("injected complete failure".to_string()));
        }

        let mut runs = self.runs.write().await;
        let now = Utc::now();

        let index = runs
            .iter()
            .position(|r| r.id == handle.run_id())
            .ok_or(LedgerError::NotFound(handle.run_id()))?;
        if runs[index].status != RunStatus::InProgress {
            return Err(LedgerError::InvalidTransition {
                run_id: handle.run_id(),
                status: runs[index].status,
            });
        }

        if outcome == RunOutcome::Succeeded {
            let existing = runs.iter().position(|r| {
                r.id != handle.run_id()
                    && is_current_success_for(r, handle.report_type(), handle.period())
            });
            match existing {
                Some(prior) if handle.forced() => runs[prior].superseded_at = Some(now),
                Some(_) => {
                    let run = &mut runs[index];
                    run.status = RunStatus::Failed;
                    run.completed_at = Some(now);
                    run.message = "discarded: another run already succeeded for this period".into();
                    return Err(LedgerError::DuplicateRun {
                        report_type: handle.report_type(),
                        period: handle.period(),
                    });
                }
                None => {}
            }
        }

        let run = &mut runs[index];
        run.status = outcome.into();
        run.completed_at = Some(now);
        run.message = message.to_string();
        run.details = details.clone();
        Ok(run.clone())
    }

    async fn latest(&self, report_type: ReportType) -> Result<Option<ReportRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .iter()
            .rev()
            .find(|r| r.report_type == report_type)
            .cloned())
    }

    async fn history(&self, report_type: ReportType, period: NaiveDate) -> Result<Vec<ReportRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .iter()
            .filter(|r| r.report_type == report_type && r.covered_period == period)
            .cloned()
            .collect())
    }

    async fn in_progress(&self) -> Result<Vec<ReportRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .iter()
            .filter(|r| r.status == RunStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn abandon(&self, run_id: i64, message: &str) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or(LedgerError::NotFound(run_id))?;
        if run.status != RunStatus::InProgress {
            return Err(LedgerError::InvalidTransition {
                run_id,
                status: run.status,
            });
        }
        run.status = RunStatus::Failed;
        run.completed_at = Some(Utc::now());
        run.message = message.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_mock_injected_begin_failure() {
        let ledger = MockRunLedger::new();
        ledger.set_fail_on_begin(true).await;

        let err = ledger
            .begin(ReportType::Daily, date(2025, 10, 16), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Database(_)));
        assert!(ledger.runs().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_orphan_is_in_progress() {
        let ledger = MockRunLedger::new();
        let id = ledger.insert_orphan(ReportType::Weekly, date(2025, 10, 13)).await;

        let stuck = ledger.in_progress().await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, id);
    }
}
