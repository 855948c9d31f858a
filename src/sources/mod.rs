//! Data sources consumed by the report runners.
//!
//! The coordinator never talks to these directly; each runner owns the
//! sources it needs. Implementations:
//! - `memory`: in-memory sources for tests and local demos
//! - `SqliteSources`: tables living next to the run ledger

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryBilling, InMemoryHistory, InMemoryInventory};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSources;

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors from data sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("database error: {0}")]
    Database(String),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        SourceError::Database(err.to_string())
    }
}

/// Units of one SKU shipped on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippedItem {
    pub sku: String,
    pub ship_date: NaiveDate,
    pub quantity: i64,
}

/// Units of one SKU shipped during one week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkuTotal {
    pub sku: String,
    pub quantity: i64,
}

/// One week of per-SKU totals in the rolling history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyShipment {
    pub week_start: NaiveDate,
    pub totals: Vec<SkuTotal>,
}

/// Shipping charge billed for a single order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingCharge {
    pub order_id: String,
    pub ship_date: NaiveDate,
    pub carrier: String,
    pub service: String,
    pub cost: Decimal,
}

/// Shipped quantities by SKU and date.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Items shipped between `from` and `to`, both inclusive.
    async fn shipped_items(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ShippedItem>>;
}

/// Rolling weekly shipment history.
#[async_trait]
pub trait ShipmentHistoryStore: Send + Sync {
    /// Replace the totals recorded for `week_start`.
    async fn upsert_week(&self, week_start: NaiveDate, totals: &[SkuTotal]) -> Result<()>;

    /// Drop weeks older than the newest `keep` weeks starting on or before
    /// `through`. Weeks after `through` are untouched. Returns the number of
    /// weeks removed.
    async fn prune(&self, keep: usize, through: NaiveDate) -> Result<usize>;

    /// Recorded weeks starting on or before `through`, newest first, at most
    /// `limit`. A week recorded with no totals is still returned.
    async fn recent_weeks(&self, through: NaiveDate, limit: usize)
        -> Result<Vec<WeeklyShipment>>;
}

/// Per-order carrier charges.
#[async_trait]
pub trait BillingSource: Send + Sync {
    /// Charges for orders shipped between `from` and `to`, both inclusive.
    async fn charges(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ShippingCharge>>;
}
