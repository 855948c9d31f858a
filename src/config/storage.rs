//! Storage configuration types.

use serde::Deserialize;

/// Path value selecting a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// SQLite database holding the run ledger and report sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path, or `:memory:`.
    pub path: String,
    /// Pool size for file databases. In-memory databases always use one connection.
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "oracare-reports.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 30,
        }
    }
}

impl StorageConfig {
    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }

    /// Effective pool size.
    ///
    /// Each connection to `:memory:` opens its own database, so in-memory
    /// storage is pinned to a single connection.
    pub fn pool_size(&self) -> u32 {
        if self.is_memory() {
            1
        } else {
            self.max_connections.max(1)
        }
    }
}
