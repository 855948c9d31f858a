//! Application configuration.
//!
//! Aggregates every section into a single `Config` that can be loaded from
//! YAML files and overridden through environment variables, e.g.
//! `ORACARE__SERVER__PORT=9000` or `ORACARE__REPORTS__WEEK_START=sunday`.

mod reports;
mod server;
mod storage;

pub use reports::{CommandConfig, ReportsConfig, RunnersConfig};
pub use server::{LoggingConfig, ServerConfig};
pub use storage::StorageConfig;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ORACARE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ORACARE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ORACARE_LOG";

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Ledger and data source database.
    pub storage: StorageConfig,
    /// Report scheduling conventions.
    pub reports: ReportsConfig,
    /// External commands replacing the built-in runners.
    pub runners: RunnersConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the service misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reports.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "reports.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.reports.history_weeks == 0 {
            return Err(ConfigError::Invalid(
                "reports.history_weeks must be greater than zero".to_string(),
            ));
        }
        if self.storage.path.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.path is empty".to_string()));
        }
        for (report_type, command) in self.runners.configured() {
            if command.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "runners.{}.command is empty",
                    report_type.slug()
                )));
            }
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                path: storage::MEMORY_PATH.to_string(),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }
}
