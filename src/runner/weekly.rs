//! End-of-week aggregation into the rolling shipment history.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{ensure_report_type, ReportRunner, RunResult, RunnerError};
use crate::ledger::Details;
use crate::period::{PeriodKey, ReportType};
use crate::sources::{InventorySource, ShipmentHistoryStore, SkuTotal, WeeklyShipment};

/// Default rolling window.
pub const DEFAULT_HISTORY_WEEKS: usize = 52;

/// Records the week's per-SKU totals and reports rolling weekly averages.
pub struct WeeklyAggregationRunner {
    inventory: Arc<dyn InventorySource>,
    history: Arc<dyn ShipmentHistoryStore>,
    history_weeks: usize,
}

impl WeeklyAggregationRunner {
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        history: Arc<dyn ShipmentHistoryStore>,
        history_weeks: usize,
    ) -> Self {
        Self {
            inventory,
            history,
            history_weeks: history_weeks.max(1),
        }
    }
}

/// Average units per week for each SKU across `weeks`.
///
/// Weeks where a SKU did not ship count as zero.
pub fn rolling_averages(weeks: &[WeeklyShipment]) -> BTreeMap<String, Decimal> {
    if weeks.is_empty() {
        return BTreeMap::new();
    }

    let mut sums: BTreeMap<String, i64> = BTreeMap::new();
    for week in weeks {
        for total in &week.totals {
            *sums.entry(total.sku.clone()).or_default() += total.quantity;
        }
    }

    let divisor = Decimal::from(weeks.len() as u64);
    sums.into_iter()
        .map(|(sku, sum)| (sku, (Decimal::from(sum) / divisor).round_dp(2)))
        .collect()
}

#[async_trait]
impl ReportRunner for WeeklyAggregationRunner {
    fn report_type(&self) -> ReportType {
        ReportType::Weekly
    }

    async fn run(&self, period: &PeriodKey) -> Result<RunResult, RunnerError> {
        ensure_report_type(ReportType::Weekly, period)?;

        let items = self.inventory.shipped_items(period.start, period.end).await?;

        let mut by_sku: BTreeMap<String, i64> = BTreeMap::new();
        for item in &items {
            *by_sku.entry(item.sku.clone()).or_default() += item.quantity;
        }
        let totals: Vec<SkuTotal> = by_sku
            .into_iter()
            .map(|(sku, quantity)| SkuTotal { sku, quantity })
            .collect();
        let total_units: i64 = totals.iter().map(|t| t.quantity).sum();

        // Replace rather than add so a rerun of the same week is idempotent.
        self.history.upsert_week(period.start, &totals).await?;
        // The window ends at this week, so a backfill never prunes or averages
        // over weeks recorded after it.
        let pruned = self
            .history
            .prune(self.history_weeks, period.start)
            .await?;
        if pruned > 0 {
            info!(pruned, keep = self.history_weeks, "Pruned shipment history");
        }

        let window = self
            .history
            .recent_weeks(period.start, self.history_weeks)
            .await?;
        let averages = rolling_averages(&window);
        debug!(weeks = window.len(), skus = averages.len(), "Computed rolling averages");

        let mut details = Details::new();
        details.insert("week_start".into(), json!(period.start));
        details.insert("week_end".into(), json!(period.end));
        details.insert("total_units".into(), json!(total_units));
        details.insert(
            "skus".into(),
            Value::Object(
                totals
                    .iter()
                    .map(|t| (t.sku.clone(), json!(t.quantity)))
                    .collect(),
            ),
        );
        details.insert("history_weeks".into(), json!(window.len()));
        details.insert("pruned_weeks".into(), json!(pruned));
        details.insert(
            "rolling_average".into(),
            Value::Object(
                averages
                    .iter()
                    .map(|(sku, avg)| (sku.clone(), json!(avg.to_string())))
                    .collect(),
            ),
        );

        Ok(RunResult::succeeded(
            format!(
                "Weekly aggregation for week of {}: {} units across {} SKUs, {} weeks of history",
                period.start,
                total_units,
                totals.len(),
                window.len()
            ),
            details,
        ))
    }
}
