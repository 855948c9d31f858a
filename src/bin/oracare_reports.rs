//! oracare-reports: end-of-day/week/month report coordinator
//!
//! ## Architecture
//! ```text
//! [Dashboard button / CLI] -> [ReportCoordinator] -> [ExecutionGuard]
//!                                    |
//!                     +--------------+--------------+
//!                     v                             v
//!               [Report runners]             [Run ledger (SQLite)]
//! ```
//!
//! See `oracare_reports::cli` for commands and configuration.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use oracare_reports::api;
use oracare_reports::cli::{Cli, Commands, RunArgs};
use oracare_reports::config::Config;
use oracare_reports::coordinator::ReportCoordinator;
use oracare_reports::storage::init_storage;
use oracare_reports::utils::bootstrap::{
    build_coordinator, build_runners, init_tracing, RunnerSources,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    init_tracing(config.logging.json);

    let storage = init_storage(&config.storage).await?;
    let sources = RunnerSources {
        inventory: storage.sources.clone(),
        history: storage.sources.clone(),
        billing: storage.sources.clone(),
    };
    let runners = build_runners(&config, sources)?;
    let coordinator = Arc::new(build_coordinator(&config, storage.ledger.clone(), runners));

    match cli.command {
        Commands::Serve(args) => {
            if let Some(port) = args.port {
                config.server.port = port;
            }
            let stale = coordinator
                .recover_stale(config.reports.fail_stale_on_startup)
                .await?;
            if !stale.is_empty() {
                info!(count = stale.len(), "stale runs found at startup");
            }
            api::serve(coordinator, &config.server.bind_address()).await
        }
        Commands::Run(args) => run_once(&coordinator, args).await,
        Commands::Status => {
            let status = coordinator.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn run_once(
    coordinator: &ReportCoordinator,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let reference = args
        .date
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    match coordinator
        .trigger(args.report_type, reference, args.force)
        .await
    {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(e) => {
            error!(report_type = %args.report_type, error = %e, "report run failed");
            Err(e.into())
        }
    }
}
