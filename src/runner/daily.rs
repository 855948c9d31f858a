//! End-of-day inventory rollup.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{ensure_report_type, ReportRunner, RunResult, RunnerError};
use crate::ledger::Details;
use crate::period::{PeriodKey, ReportType};
use crate::sources::InventorySource;

/// Sums shipped units per SKU for one day.
pub struct DailyInventoryRunner {
    inventory: Arc<dyn InventorySource>,
}

impl DailyInventoryRunner {
    pub fn new(inventory: Arc<dyn InventorySource>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl ReportRunner for DailyInventoryRunner {
    fn report_type(&self) -> ReportType {
        ReportType::Daily
    }

    async fn run(&self, period: &PeriodKey) -> Result<RunResult, RunnerError> {
        ensure_report_type(ReportType::Daily, period)?;

        let items = self.inventory.shipped_items(period.start, period.end).await?;
        debug!(date = %period.start, rows = items.len(), "Loaded shipped items");

        let mut by_sku: BTreeMap<String, i64> = BTreeMap::new();
        for item in &items {
            *by_sku.entry(item.sku.clone()).or_default() += item.quantity;
        }
        let total_units: i64 = by_sku.values().sum();

        let mut details = Details::new();
        details.insert("date".into(), json!(period.start));
        details.insert("total_units".into(), json!(total_units));
        details.insert("sku_count".into(), json!(by_sku.len()));
        details.insert(
            "skus".into(),
            Value::Object(
                by_sku
                    .iter()
                    .map(|(sku, qty)| (sku.clone(), json!(qty)))
                    .collect(),
            ),
        );

        Ok(RunResult::succeeded(
            format!(
                "Daily inventory for {}: {} units across {} SKUs",
                period.start,
                total_units,
                by_sku.len()
            ),
            details,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodCalculator;
    use crate::sources::InMemoryInventory;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_daily_rollup_sums_per_sku() {
        let inventory = Arc::new(InMemoryInventory::new());
        inventory.record("SKU-A", date(2025, 10, 16), 3).await;
        inventory.record("SKU-A", date(2025, 10, 16), 4).await;
        inventory.record("SKU-B", date(2025, 10, 16), 1).await;
        inventory.record("SKU-B", date(2025, 10, 15), 100).await;

        let runner = DailyInventoryRunner::new(inventory);
        let period = PeriodCalculator::default().covered_period(ReportType::Daily, date(2025, 10, 16));
        let result = runner.run(&period).await.unwrap();

        assert!(result.success);
        assert_eq!(result.details["total_units"], json!(8));
        assert_eq!(result.details["sku_count"], json!(2));
        assert_eq!(result.details["skus"]["SKU-A"], json!(7));
        assert!(result.summary.contains("8 units"));
    }

    #[tokio::test]
    async fn test_daily_rerun_recomputes() {
        let inventory = Arc::new(InMemoryInventory::new());
        inventory.record("SKU-A", date(2025, 10, 16), 5).await;
        let runner = DailyInventoryRunner::new(inventory);
        let period = PeriodCalculator::default().covered_period(ReportType::Daily, date(2025, 10, 16));

        let first = runner.run(&period).await.unwrap();
        let second = runner.run(&period).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_daily_source_unavailable_is_error() {
        let inventory = Arc::new(InMemoryInventory::new());
        inventory.set_unavailable(true).await;
        let runner = DailyInventoryRunner::new(inventory);
        let period = PeriodCalculator::default().covered_period(ReportType::Daily, date(2025, 10, 16));

        let err = runner.run(&period).await.unwrap_err();
        assert!(matches!(err, RunnerError::Source(_)));
    }
}
