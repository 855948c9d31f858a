//! In-memory data sources.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::{
    BillingSource, InventorySource, Result, ShipmentHistoryStore, ShippedItem, ShippingCharge,
    SkuTotal, SourceError, WeeklyShipment,
};

/// Inventory source backed by a vector of shipments.
#[derive(Default)]
pub struct InMemoryInventory {
    items: RwLock<Vec<ShippedItem>>,
    unavailable: RwLock<bool>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, sku: &str, ship_date: NaiveDate, quantity: i64) {
        self.items.write().await.push(ShippedItem {
            sku: sku.to_string(),
            ship_date,
            quantity,
        });
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }
}

#[async_trait]
impl InventorySource for InMemoryInventory {
    async fn shipped_items(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ShippedItem>> {
        if *self.unavailable.read().await {
            return Err(SourceError::Unavailable("inventory".to_string()));
        }
        Ok(self
            .items
            .read()
            .await
            .iter()
            .filter(|i| i.ship_date >= from && i.ship_date <= to)
            .cloned()
            .collect())
    }
}

/// History store keyed by week start.
#[derive(Default)]
pub struct InMemoryHistory {
    weeks: RwLock<BTreeMap<NaiveDate, Vec<SkuTotal>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn week_count(&self) -> usize {
        self.weeks.read().await.len()
    }
}

#[async_trait]
impl ShipmentHistoryStore for InMemoryHistory {
    async fn upsert_week(&self, week_start: NaiveDate, totals: &[SkuTotal]) -> Result<()> {
        self.weeks
            .write()
            .await
            .insert(week_start, totals.to_vec());
        Ok(())
    }

    async fn prune(&self, keep: usize, through: NaiveDate) -> Result<usize> {
        let mut weeks = self.weeks.write().await;
        let expired: Vec<NaiveDate> = weeks
            .range(..=through)
            .rev()
            .skip(keep)
            .map(|(week_start, _)| *week_start)
            .collect();
        for week in &expired {
            weeks.remove(week);
        }
        Ok(expired.len())
    }

    async fn recent_weeks(
        &self,
        through: NaiveDate,
        limit: usize,
    ) -> Result<Vec<WeeklyShipment>> {
        Ok(self
            .weeks
            .read()
            .await
            .range(..=through)
            .rev()
            .take(limit)
            .map(|(week_start, totals)| WeeklyShipment {
                week_start: *week_start,
                totals: totals.clone(),
            })
            .collect())
    }
}

/// Billing source backed by a vector of charges.
#[derive(Default)]
pub struct InMemoryBilling {
    charges: RwLock<Vec<ShippingCharge>>,
}

impl InMemoryBilling {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, charge: ShippingCharge) {
        self.charges.write().await.push(charge);
    }
}

#[async_trait]
impl BillingSource for InMemoryBilling {
    async fn charges(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ShippingCharge>> {
        Ok(self
            .charges
            .read()
            .await
            .iter()
            .filter(|c| c.ship_date >= from && c.ship_date <= to)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn totals(qty: i64) -> Vec<SkuTotal> {
        vec![SkuTotal {
            sku: "SKU-1".to_string(),
            quantity: qty,
        }]
    }

    #[tokio::test]
    async fn test_history_prune_keeps_newest() {
        let history = InMemoryHistory::new();
        for (i, day) in [6, 13, 20].iter().enumerate() {
            history
                .upsert_week(date(2025, 10, *day), &totals(i as i64))
                .await
                .unwrap();
        }

        let latest = date(2025, 10, 20);
        assert_eq!(history.prune(2, latest).await.unwrap(), 1);
        let weeks = history.recent_weeks(latest, 10).await.unwrap();
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[0].week_start, date(2025, 10, 20));
        assert_eq!(weeks[1].week_start, date(2025, 10, 13));
    }

    #[tokio::test]
    async fn test_history_window_anchored_at_week() {
        let history = InMemoryHistory::new();
        for day in [6, 13, 20, 27] {
            history
                .upsert_week(date(2025, 10, day), &totals(1))
                .await
                .unwrap();
        }

        // Anchored at 10-13: only 10-06 and 10-13 are candidates.
        assert_eq!(history.prune(1, date(2025, 10, 13)).await.unwrap(), 1);
        let weeks = history.recent_weeks(date(2025, 10, 13), 10).await.unwrap();
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].week_start, date(2025, 10, 13));
        assert_eq!(history.week_count().await, 3);
    }

    #[tokio::test]
    async fn test_history_upsert_replaces() {
        let history = InMemoryHistory::new();
        history.upsert_week(date(2025, 10, 13), &totals(5)).await.unwrap();
        history.upsert_week(date(2025, 10, 13), &totals(9)).await.unwrap();

        let weeks = history.recent_weeks(date(2025, 10, 13), 1).await.unwrap();
        assert_eq!(weeks[0].totals[0].quantity, 9);
        assert_eq!(history.week_count().await, 1);
    }
}
