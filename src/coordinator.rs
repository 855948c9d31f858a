//! Report trigger orchestration.
//!
//! A trigger walks one report type through the lifecycle:
//!
//! ```text
//! RECEIVED --guard denied--> REJECTED (already running)
//! RECEIVED --guard acquired--> RESOLVING_DEPS
//! RESOLVING_DEPS --prereq missing--> RUNNING_PREREQ (one level)
//! RESOLVING_DEPS --prereqs satisfied--> EXECUTING
//! EXECUTING --runner succeeds--> DONE (success, logged)
//! EXECUTING --runner fails / times out / panics--> DONE (failure, logged)
//! ```
//!
//! The guard permit lives for the whole trigger and is released on every exit
//! path, including cancellation of the trigger future. Runners execute in
//! their own task so a panic is contained and a timeout aborts the work.

use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::deps::DependencyResolver;
use crate::error::{CoordinatorError, Result};
use crate::guard::ExecutionGuard;
use crate::ledger::{Details, LedgerError, ReportRun, RunLedger, RunOutcome};
use crate::period::{PeriodCalculator, PeriodKey, ReportType};
use crate::runner::{ReportRunner, RunResult, RunnerSet};

/// Runner timeout used when none is configured.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);

const ABANDONED_MESSAGE: &str = "abandoned: process exited before the run completed";

/// How a trigger that did not fail was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The runner executed and its success was recorded.
    Completed,
    /// The period had already succeeded; nothing ran.
    AlreadyDone,
}

/// Result of a successful or no-op trigger.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerOutcome {
    pub report_type: ReportType,
    pub period: PeriodKey,
    pub disposition: Disposition,
    pub message: String,
    /// Ledger row written by this trigger, if the runner executed.
    pub run_id: Option<i64>,
    #[serde(skip_serializing_if = "Details::is_empty")]
    pub details: Details,
    /// Prerequisite reports run in-line before this one.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<TriggerOutcome>,
}

impl TriggerOutcome {
    fn already_done(period: PeriodKey) -> Self {
        Self {
            report_type: period.report_type,
            period,
            disposition: Disposition::AlreadyDone,
            message: format!(
                "{} report for {} already completed",
                period.report_type, period.start
            ),
            run_id: None,
            details: Details::new(),
            prerequisites: Vec::new(),
        }
    }
}

/// Latest state of one report type.
#[derive(Debug, Clone, Serialize)]
pub struct ReportStatus {
    pub report_type: ReportType,
    /// Whether this process currently holds the type's guard.
    pub running: bool,
    pub last_run: Option<ReportRun>,
}

/// Read-only snapshot for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub reports: Vec<ReportStatus>,
    /// IN_PROGRESS rows with no live run in this process behind them.
    ///
    /// Only runs started by this coordinator are known to be live. A separate
    /// process, such as the `status` command next to a running `serve`, lists
    /// that server's in-flight runs here too.
    pub stale: Vec<ReportRun>,
}

/// Aborts a spawned runner task when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Marks a ledger row as owned by a live run until dropped.
struct LiveRun<'a> {
    runs: &'a Mutex<HashSet<i64>>,
    run_id: i64,
}

impl<'a> LiveRun<'a> {
    fn track(runs: &'a Mutex<HashSet<i64>>, run_id: i64) -> Self {
        lock_runs(runs).insert(run_id);
        Self { runs, run_id }
    }
}

impl Drop for LiveRun<'_> {
    fn drop(&mut self) {
        lock_runs(self.runs).remove(&self.run_id);
    }
}

fn lock_runs(runs: &Mutex<HashSet<i64>>) -> MutexGuard<'_, HashSet<i64>> {
    runs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coordinates guarded, dependency-ordered report runs.
pub struct ReportCoordinator {
    ledger: Arc<dyn RunLedger>,
    guard: ExecutionGuard,
    periods: PeriodCalculator,
    resolver: DependencyResolver,
    runners: RunnerSet,
    run_timeout: Duration,
    live_runs: Mutex<HashSet<i64>>,
}

impl ReportCoordinator {
    pub fn new(ledger: Arc<dyn RunLedger>, runners: RunnerSet) -> Self {
        let periods = PeriodCalculator::default();
        Self {
            ledger,
            guard: ExecutionGuard::new(),
            periods,
            resolver: DependencyResolver::new(periods),
            runners,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            live_runs: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_guard(mut self, guard: ExecutionGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_period_calculator(mut self, periods: PeriodCalculator) -> Self {
        self.periods = periods;
        self.resolver = DependencyResolver::new(periods);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    pub fn periods(&self) -> PeriodCalculator {
        self.periods
    }

    /// Run `report_type` for the period containing `reference`.
    ///
    /// Without `force`, a period that already succeeded is reported as
    /// [`Disposition::AlreadyDone`] and the runner does not execute. `force`
    /// applies to the requested report only, never to its prerequisites.
    pub async fn trigger(
        &self,
        report_type: ReportType,
        reference: NaiveDate,
        force: bool,
    ) -> Result<TriggerOutcome> {
        let period = self.periods.covered_period(report_type, reference);

        let Some(_permit) = self.guard.try_lock(report_type) else {
            warn!(%report_type, period = %period.start, "Trigger rejected, report already running");
            return Err(CoordinatorError::AlreadyRunning(report_type));
        };

        info!(%report_type, period = %period.start, force, "Trigger accepted");

        if !force && self.ledger.has_succeeded(report_type, period.start).await? {
            info!(%report_type, period = %period.start, "Period already succeeded, skipping");
            return Ok(TriggerOutcome::already_done(period));
        }

        let missing = self
            .resolver
            .resolve(self.ledger.as_ref(), report_type, reference)
            .await?;

        let mut prerequisites = Vec::with_capacity(missing.len());
        for prereq in missing {
            let dependency_failure = |message: String| CoordinatorError::DependencyFailure {
                report_type,
                prerequisite: prereq.report_type,
                message,
            };

            let Some(_prereq_permit) = self.guard.try_lock(prereq.report_type) else {
                warn!(%report_type, prerequisite = %prereq.report_type, "Prerequisite already running");
                return Err(dependency_failure(format!(
                    "{} report is already running",
                    prereq.report_type
                )));
            };

            info!(%report_type, prerequisite = %prereq.report_type, period = %prereq.period.start, "Running prerequisite");
            match self.execute(prereq.period, false).await {
                Ok(outcome) => prerequisites.push(outcome),
                Err(CoordinatorError::RunnerFailure { message, .. }) => {
                    return Err(dependency_failure(message));
                }
                Err(e) => return Err(dependency_failure(e.to_string())),
            }
        }

        let mut outcome = self.execute(period, force).await?;
        outcome.prerequisites = prerequisites;
        Ok(outcome)
    }

    /// Begin, run and record one report. The caller holds the guard.
    async fn execute(&self, period: PeriodKey, force: bool) -> Result<TriggerOutcome> {
        let report_type = period.report_type;

        let handle = match self.ledger.begin(report_type, period.start, force).await {
            Ok(handle) => handle,
            Err(LedgerError::DuplicateRun { .. }) => {
                info!(%report_type, period = %period.start, "Period already succeeded, skipping");
                return Ok(TriggerOutcome::already_done(period));
            }
            Err(e) => return Err(e.into()),
        };
        let run_id = handle.run_id();
        let _live = LiveRun::track(&self.live_runs, run_id);
        info!(%report_type, period = %period.start, run_id, "Run started");

        let result = match self.runners.get(report_type) {
            Some(runner) => self.run_bounded(runner, period).await,
            None => Err(format!("no runner configured for {report_type} reports")),
        };

        let failure = match result {
            Ok(run) if run.success => {
                return match self
                    .ledger
                    .complete(handle, RunOutcome::Succeeded, &run.summary, &run.details)
                    .await
                {
                    Ok(row) => {
                        info!(%report_type, period = %period.start, run_id, summary = %row.message, "Run succeeded");
                        Ok(TriggerOutcome {
                            report_type,
                            period,
                            disposition: Disposition::Completed,
                            message: row.message,
                            run_id: Some(run_id),
                            details: row.details,
                            prerequisites: Vec::new(),
                        })
                    }
                    Err(LedgerError::DuplicateRun { .. }) => {
                        warn!(%report_type, period = %period.start, run_id, "Another run succeeded first, result discarded");
                        Ok(TriggerOutcome::already_done(period))
                    }
                    Err(e) => {
                        error!(%report_type, period = %period.start, run_id, error = %e, "Failed to record success");
                        Err(e.into())
                    }
                };
            }
            Ok(run) => (run.summary, run.details),
            Err(message) => (message, Details::new()),
        };

        let (message, details) = failure;
        error!(%report_type, period = %period.start, run_id, error = %message, "Run failed");
        if let Err(e) = self
            .ledger
            .complete(handle, RunOutcome::Failed, &message, &details)
            .await
        {
            error!(%report_type, run_id, error = %e, "Failed to record failure, row left IN_PROGRESS");
        }

        Err(CoordinatorError::RunnerFailure {
            report_type,
            period: period.start,
            message,
        })
    }

    /// Run in a separate task, bounded by the run timeout.
    async fn run_bounded(
        &self,
        runner: Arc<dyn ReportRunner>,
        period: PeriodKey,
    ) -> std::result::Result<RunResult, String> {
        let task = tokio::spawn(async move { runner.run(&period).await });
        let _abort = AbortOnDrop(task.abort_handle());

        match tokio::time::timeout(self.run_timeout, task).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join)) if join.is_panic() => Err(format!(
                "runner panicked: {}",
                panic_message(join.into_panic())
            )),
            Ok(Err(join)) => Err(format!("runner task cancelled: {join}")),
            Err(_) => Err(format!("timed out after {:?}", self.run_timeout)),
        }
    }

    /// Latest run per report type and any stale IN_PROGRESS rows.
    pub async fn status(&self) -> Result<StatusReport> {
        let mut reports = Vec::with_capacity(ReportType::ALL.len());
        for report_type in ReportType::ALL {
            reports.push(ReportStatus {
                report_type,
                running: self.guard.is_held(report_type),
                last_run: self.ledger.latest(report_type).await?,
            });
        }

        Ok(StatusReport {
            reports,
            stale: self.stale_runs().await?,
        })
    }

    /// Every attempt recorded for the period of `report_type` containing `reference`.
    pub async fn history(
        &self,
        report_type: ReportType,
        reference: NaiveDate,
    ) -> Result<Vec<ReportRun>> {
        let period = self.periods.covered_period(report_type, reference);
        Ok(self.ledger.history(report_type, period.start).await?)
    }

    /// Log stale IN_PROGRESS rows and, if `mark_failed`, move them to FAILED.
    ///
    /// Meant for startup, before any trigger is accepted.
    pub async fn recover_stale(&self, mark_failed: bool) -> Result<Vec<ReportRun>> {
        let stale = self.stale_runs().await?;
        for run in &stale {
            warn!(
                report_type = %run.report_type,
                period = %run.covered_period,
                run_id = run.id,
                triggered_at = %run.triggered_at,
                "Found run stuck IN_PROGRESS"
            );
            if mark_failed {
                self.ledger.abandon(run.id, ABANDONED_MESSAGE).await?;
                info!(run_id = run.id, "Marked stale run as FAILED");
            }
        }
        Ok(stale)
    }

    async fn stale_runs(&self) -> Result<Vec<ReportRun>> {
        let rows = self.ledger.in_progress().await?;
        let live = lock_runs(&self.live_runs);
        Ok(rows
            .into_iter()
            .filter(|run| !live.contains(&run.id))
            .collect())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
