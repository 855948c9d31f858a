//! Bootstrap utilities for the oracare-reports binary.
//!
//! Shared initialization: tracing, runner selection and coordinator wiring.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LOG_ENV_VAR};
use crate::coordinator::ReportCoordinator;
use crate::ledger::RunLedger;
use crate::period::ReportType;
use crate::runner::{
    CommandRunner, DailyInventoryRunner, MonthlyBillingRunner, ReportRunner, RunnerError,
    RunnerSet, WeeklyAggregationRunner,
};
use crate::sources::{BillingSource, InventorySource, ShipmentHistoryStore};

/// Initialize tracing with the ORACARE_LOG environment variable.
///
/// Defaults to "info" level if ORACARE_LOG is not set.
pub fn init_tracing(json: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Data sources the built-in runners read from.
#[derive(Clone)]
pub struct RunnerSources {
    pub inventory: Arc<dyn InventorySource>,
    pub history: Arc<dyn ShipmentHistoryStore>,
    pub billing: Arc<dyn BillingSource>,
}

/// One runner per report type: the configured command if any, otherwise
/// the built-in runner over `sources`.
pub fn build_runners(config: &Config, sources: RunnerSources) -> Result<RunnerSet, RunnerError> {
    let mut runners = RunnerSet::new();

    for report_type in ReportType::ALL {
        let runner: Arc<dyn ReportRunner> = match config.runners.command_for(report_type) {
            Some(cmd) => {
                info!(%report_type, command = ?cmd.command, "Using external report command");
                let mut runner = CommandRunner::new(report_type, cmd.command.clone())?;
                if let Some(dir) = &cmd.working_dir {
                    runner = runner.with_working_dir(dir);
                }
                Arc::new(runner)
            }
            None => match report_type {
                ReportType::Daily => {
                    Arc::new(DailyInventoryRunner::new(sources.inventory.clone()))
                }
                ReportType::Weekly => Arc::new(WeeklyAggregationRunner::new(
                    sources.inventory.clone(),
                    sources.history.clone(),
                    config.reports.history_weeks,
                )),
                ReportType::Monthly => {
                    Arc::new(MonthlyBillingRunner::new(sources.billing.clone()))
                }
            },
        };
        runners.register(runner);
    }

    Ok(runners)
}

/// Coordinator configured from `config`.
pub fn build_coordinator(
    config: &Config,
    ledger: Arc<dyn RunLedger>,
    runners: RunnerSet,
) -> ReportCoordinator {
    ReportCoordinator::new(ledger, runners)
        .with_period_calculator(config.reports.period_calculator())
        .with_run_timeout(config.reports.run_timeout())
}
