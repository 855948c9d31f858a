//! Database bootstrap.
//!
//! One SQLite pool backs both the run ledger and the report data sources.

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::StorageConfig;
use crate::ledger::{RunLedger, SqliteRunLedger};
use crate::sources::SqliteSources;

/// Initialized storage handles.
#[derive(Clone)]
pub struct Storage {
    pub pool: SqlitePool,
    pub ledger: Arc<SqliteRunLedger>,
    pub sources: Arc<SqliteSources>,
}

/// Open the configured database and create any missing tables.
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<Storage, Box<dyn std::error::Error + Send + Sync>> {
    info!(path = %config.path, "Storage: sqlite");

    if !config.is_memory() {
        if let Some(parent) = std::path::Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let opts = if config.is_memory() {
        SqliteConnectOptions::new().filename(":memory:")
    } else {
        SqliteConnectOptions::new()
            .filename(&config.path)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .create_if_missing(true)
    };

    let mut pool_opts = SqlitePoolOptions::new().max_connections(config.pool_size());
    if config.is_memory() {
        // The database lives only as long as its single connection.
        pool_opts = pool_opts
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    let pool = pool_opts.connect_with(opts).await?;

    let ledger = Arc::new(SqliteRunLedger::new(pool.clone()));
    ledger.init_schema().await?;

    let sources = Arc::new(SqliteSources::new(pool.clone()));
    sources.init_schema().await?;

    Ok(Storage {
        pool,
        ledger,
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::ReportType;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_init_storage_creates_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reports.db");
        let config = StorageConfig {
            path: path.to_string_lossy().to_string(),
            max_connections: 2,
            ..StorageConfig::default()
        };

        let storage = init_storage(&config).await.unwrap();
        let period = NaiveDate::from_ymd_opt(2025, 10, 16).unwrap();
        assert!(!storage
            .ledger
            .has_succeeded(ReportType::Daily, period)
            .await
            .unwrap());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_init_storage_memory_connection_never_recycled() {
        let config = StorageConfig {
            path: ":memory:".to_string(),
            ..StorageConfig::default()
        };

        let storage = init_storage(&config).await.unwrap();
        let options = storage.pool.options();
        assert_eq!(options.get_max_connections(), 1);
        assert_eq!(options.get_min_connections(), 1);
        assert!(options.get_idle_timeout().is_none());
        assert!(options.get_max_lifetime().is_none());

        let period = NaiveDate::from_ymd_opt(2025, 10, 16).unwrap();
        assert!(storage.ledger.in_progress().await.unwrap().is_empty());
        assert!(!storage
            .ledger
            .has_succeeded(ReportType::Daily, period)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_init_storage_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            path: dir.path().join("reports.db").to_string_lossy().to_string(),
            max_connections: 1,
            ..StorageConfig::default()
        };

        init_storage(&config).await.unwrap();
        init_storage(&config).await.unwrap();
    }
}
