//! Command-line interface for the `oracare-reports` binary.
//!
//! ## Commands
//!
//! - `oracare-reports serve` - Run the report API
//! - `oracare-reports run <daily|weekly|monthly>` - Trigger one report and exit
//! - `oracare-reports status` - Print the latest run of every report
//!
//! ## Configuration
//!
//! - `--config` / `ORACARE_CONFIG` - YAML configuration file
//! - `ORACARE__<SECTION>__<KEY>` - individual overrides
//! - `ORACARE_LOG` - log filter (default: `info`)

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::period::ReportType;

/// Oracare end-of-period report coordinator.
#[derive(Debug, Parser)]
#[command(name = "oracare-reports")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, short, global = true)]
    pub config: Option<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the report API.
    Serve(ServeArgs),
    /// Trigger one report and print the outcome.
    Run(RunArgs),
    /// Print the latest run of every report and any stale runs.
    Status,
}

/// Arguments for `serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Override `server.port`.
    #[arg(long)]
    pub port: Option<u16>,
}

/// Arguments for `run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Report to run: daily, weekly or monthly (eod/eow/eom also accepted).
    pub report_type: ReportType,

    /// Reference date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Rerun even if the period already succeeded.
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_alias_and_date() {
        let cli = Cli::parse_from([
            "oracare-reports",
            "run",
            "eow",
            "--date",
            "2025-10-16",
            "--force",
            "--config",
            "/etc/oracare.yaml",
        ]);

        assert_eq!(cli.config.as_deref(), Some("/etc/oracare.yaml"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.report_type, ReportType::Weekly);
                assert_eq!(args.date, NaiveDate::from_ymd_opt(2025, 10, 16));
                assert!(args.force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_report() {
        assert!(Cli::try_parse_from(["oracare-reports", "run", "quarterly"]).is_err());
    }

    #[test]
    fn test_parse_serve_port() {
        let cli = Cli::parse_from(["oracare-reports", "serve", "--port", "9000"]);
        assert!(matches!(
            cli.command,
            Commands::Serve(ServeArgs { port: Some(9000) })
        ));
    }
}
