//! SQLite-backed data sources.
//!
//! Reads shipments and charges from tables populated by the dashboard's sync
//! jobs and maintains the rolling weekly history table.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_query::{Expr, Iden, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use super::{
    BillingSource, InventorySource, Result, ShipmentHistoryStore, ShippedItem, ShippingCharge,
    SkuTotal, SourceError, WeeklyShipment,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Iden)]
enum ShippedItems {
    Table,
    #[iden = "sku"]
    Sku,
    #[iden = "ship_date"]
    ShipDate,
    #[iden = "quantity"]
    Quantity,
}

#[derive(Iden)]
enum ShippingCharges {
    Table,
    #[iden = "order_id"]
    OrderId,
    #[iden = "ship_date"]
    ShipDate,
    #[iden = "carrier"]
    Carrier,
    #[iden = "service"]
    Service,
    /// Decimal amount stored as text to keep exact cents.
    #[iden = "cost"]
    Cost,
}

#[derive(Iden)]
enum WeeklyShipmentHistory {
    Table,
    #[iden = "week_start"]
    WeekStart,
    #[iden = "sku"]
    Sku,
    #[iden = "quantity"]
    Quantity,
}

/// Every week ever recorded, including weeks that shipped nothing.
#[derive(Iden)]
enum WeeklyHistoryWeeks {
    Table,
    #[iden = "week_start"]
    WeekStart,
}

/// All three report data sources over one SQLite pool.
#[derive(Clone)]
pub struct SqliteSources {
    pool: SqlitePool,
}

impl SqliteSources {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create source tables if they don't exist.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS shipped_items (
                sku TEXT NOT NULL,
                ship_date TEXT NOT NULL,
                quantity INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_shipped_items_date ON shipped_items(ship_date)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS shipping_charges (
                order_id TEXT PRIMARY KEY,
                ship_date TEXT NOT NULL,
                carrier TEXT NOT NULL,
                service TEXT NOT NULL,
                cost TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_shipping_charges_date ON shipping_charges(ship_date)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS weekly_shipment_history (
                week_start TEXT NOT NULL,
                sku TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                PRIMARY KEY (week_start, sku)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS weekly_history_weeks (
                week_start TEXT PRIMARY KEY
            )",
        )
        .execute(&self.pool)
        .await?;

        // Databases created before the week table existed.
        sqlx::query(
            "INSERT OR IGNORE INTO weekly_history_weeks (week_start)
             SELECT DISTINCT week_start FROM weekly_shipment_history",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a shipment line.
    pub async fn insert_shipped_item(&self, item: &ShippedItem) -> Result<()> {
        let query = Query::insert()
            .into_table(ShippedItems::Table)
            .columns([ShippedItems::Sku, ShippedItems::ShipDate, ShippedItems::Quantity])
            .values_panic([
                item.sku.as_str().into(),
                format_date(item.ship_date).into(),
                item.quantity.into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    /// Record or replace the charge for an order.
    pub async fn upsert_charge(&self, charge: &ShippingCharge) -> Result<()> {
        let query = Query::insert()
            .into_table(ShippingCharges::Table)
            .columns([
                ShippingCharges::OrderId,
                ShippingCharges::ShipDate,
                ShippingCharges::Carrier,
                ShippingCharges::Service,
                ShippingCharges::Cost,
            ])
            .values_panic([
                charge.order_id.as_str().into(),
                format_date(charge.ship_date).into(),
                charge.carrier.as_str().into(),
                charge.service.as_str().into(),
                charge.cost.to_string().into(),
            ])
            .on_conflict(
                OnConflict::column(ShippingCharges::OrderId)
                    .update_columns([
                        ShippingCharges::ShipDate,
                        ShippingCharges::Carrier,
                        ShippingCharges::Service,
                        ShippingCharges::Cost,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl InventorySource for SqliteSources {
    async fn shipped_items(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ShippedItem>> {
        let query = Query::select()
            .columns([ShippedItems::Sku, ShippedItems::ShipDate, ShippedItems::Quantity])
            .from(ShippedItems::Table)
            .and_where(Expr::col(ShippedItems::ShipDate).gte(format_date(from)))
            .and_where(Expr::col(ShippedItems::ShipDate).lte(format_date(to)))
            .order_by(ShippedItems::ShipDate, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                Ok(ShippedItem {
                    sku: row.try_get("sku")?,
                    ship_date: parse_date(&row.try_get::<String, _>("ship_date")?)?,
                    quantity: row.try_get("quantity")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ShipmentHistoryStore for SqliteSources {
    async fn upsert_week(&self, week_start: NaiveDate, totals: &[SkuTotal]) -> Result<()> {
        let week = format_date(week_start);
        let mut tx = self.pool.begin().await?;

        let register = Query::insert()
            .into_table(WeeklyHistoryWeeks::Table)
            .columns([WeeklyHistoryWeeks::WeekStart])
            .values_panic([week.as_str().into()])
            .on_conflict(
                OnConflict::column(WeeklyHistoryWeeks::WeekStart)
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&register).execute(&mut *tx).await?;

        // Replace the whole week so SKUs that dropped to zero disappear.
        let delete = Query::delete()
            .from_table(WeeklyShipmentHistory::Table)
            .and_where(Expr::col(WeeklyShipmentHistory::WeekStart).eq(week.as_str()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&delete).execute(&mut *tx).await?;

        for total in totals {
            let insert = Query::insert()
                .into_table(WeeklyShipmentHistory::Table)
                .columns([
                    WeeklyShipmentHistory::WeekStart,
                    WeeklyShipmentHistory::Sku,
                    WeeklyShipmentHistory::Quantity,
                ])
                .values_panic([
                    week.as_str().into(),
                    total.sku.as_str().into(),
                    total.quantity.into(),
                ])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&insert).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn prune(&self, keep: usize, through: NaiveDate) -> Result<usize> {
        let weeks = self.week_starts(through, None).await?;
        // Newest week that falls outside the retention window.
        let Some(cutoff) = weeks.get(keep) else {
            return Ok(0);
        };
        let cutoff = format_date(*cutoff);

        let mut tx = self.pool.begin().await?;
        let totals = Query::delete()
            .from_table(WeeklyShipmentHistory::Table)
            .and_where(Expr::col(WeeklyShipmentHistory::WeekStart).lte(cutoff.as_str()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&totals).execute(&mut *tx).await?;

        let registered = Query::delete()
            .from_table(WeeklyHistoryWeeks::Table)
            .and_where(Expr::col(WeeklyHistoryWeeks::WeekStart).lte(cutoff.as_str()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&registered).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(weeks.len() - keep)
    }

    async fn recent_weeks(
        &self,
        through: NaiveDate,
        limit: usize,
    ) -> Result<Vec<WeeklyShipment>> {
        let weeks = self.week_starts(through, Some(limit)).await?;
        let (Some(newest), Some(oldest)) = (weeks.first(), weeks.last()) else {
            return Ok(Vec::new());
        };

        let query = Query::select()
            .columns([
                WeeklyShipmentHistory::WeekStart,
                WeeklyShipmentHistory::Sku,
                WeeklyShipmentHistory::Quantity,
            ])
            .from(WeeklyShipmentHistory::Table)
            .and_where(Expr::col(WeeklyShipmentHistory::WeekStart).gte(format_date(*oldest)))
            .and_where(Expr::col(WeeklyShipmentHistory::WeekStart).lte(format_date(*newest)))
            .order_by(WeeklyShipmentHistory::WeekStart, Order::Desc)
            .order_by(WeeklyShipmentHistory::Sku, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut result: Vec<WeeklyShipment> = weeks
            .iter()
            .map(|week_start| WeeklyShipment {
                week_start: *week_start,
                totals: Vec::new(),
            })
            .collect();

        for row in rows {
            let week_start = parse_date(&row.try_get::<String, _>("week_start")?)?;
            if let Some(week) = result.iter_mut().find(|w| w.week_start == week_start) {
                week.totals.push(SkuTotal {
                    sku: row.try_get("sku")?,
                    quantity: row.try_get("quantity")?,
                });
            }
        }

        Ok(result)
    }
}

impl SqliteSources {
    /// Recorded week starts on or before `through`, newest first.
    async fn week_starts(&self, through: NaiveDate, limit: Option<usize>) -> Result<Vec<NaiveDate>> {
        let mut select = Query::select();
        select
            .column(WeeklyHistoryWeeks::WeekStart)
            .from(WeeklyHistoryWeeks::Table)
            .and_where(Expr::col(WeeklyHistoryWeeks::WeekStart).lte(format_date(through)))
            .order_by(WeeklyHistoryWeeks::WeekStart, Order::Desc);
        if let Some(limit) = limit {
            select.limit(limit as u64);
        }
        let query = select.to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| parse_date(&row.try_get::<String, _>("week_start")?))
            .collect()
    }
}

#[async_trait]
impl BillingSource for SqliteSources {
    async fn charges(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ShippingCharge>> {
        // Plain row read; grouping by (carrier, service) happens in the runner.
        let query = Query::select()
            .columns([
                ShippingCharges::OrderId,
                ShippingCharges::ShipDate,
                ShippingCharges::Carrier,
                ShippingCharges::Service,
                ShippingCharges::Cost,
            ])
            .from(ShippingCharges::Table)
            .and_where(Expr::col(ShippingCharges::ShipDate).gte(format_date(from)))
            .and_where(Expr::col(ShippingCharges::ShipDate).lte(format_date(to)))
            .order_by(ShippingCharges::OrderId, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let order_id: String = row.try_get("order_id")?;
                let cost: String = row.try_get("cost")?;
                let cost = cost.parse::<Decimal>().map_err(|e| {
                    SourceError::InvalidRecord(format!("order {order_id}: cost {cost:?}: {e}"))
                })?;
                Ok(ShippingCharge {
                    ship_date: parse_date(&row.try_get::<String, _>("ship_date")?)?,
                    carrier: row.try_get("carrier")?,
                    service: row.try_get("service")?,
                    cost,
                    order_id,
                })
            })
            .collect()
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| SourceError::InvalidRecord(format!("bad date {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn test_sources() -> SqliteSources {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .expect("failed to create in-memory pool");

        let sources = SqliteSources::new(pool);
        sources.init_schema().await.expect("failed to init schema");
        sources
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn total(sku: &str, quantity: i64) -> SkuTotal {
        SkuTotal {
            sku: sku.to_string(),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_shipped_items_date_range_inclusive() {
        let sources = test_sources().await;
        for (sku, day, qty) in [("A", 12, 1), ("A", 13, 2), ("B", 19, 3), ("B", 20, 4)] {
            sources
                .insert_shipped_item(&ShippedItem {
                    sku: sku.to_string(),
                    ship_date: date(2025, 10, day),
                    quantity: qty,
                })
                .await
                .unwrap();
        }

        let items = sources
            .shipped_items(date(2025, 10, 13), date(2025, 10, 19))
            .await
            .unwrap();
        let quantities: Vec<i64> = items.iter().map(|i| i.quantity).collect();
        assert_eq!(quantities, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_charges_roundtrip_exact_decimal() {
        let sources = test_sources().await;
        sources
            .upsert_charge(&ShippingCharge {
                order_id: "1001".to_string(),
                ship_date: date(2025, 10, 2),
                carrier: "FedEx".to_string(),
                service: "Ground".to_string(),
                cost: Decimal::new(1999, 2),
            })
            .await
            .unwrap();

        let charges = sources
            .charges(date(2025, 10, 1), date(2025, 10, 31))
            .await
            .unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].cost, Decimal::new(1999, 2));
    }

    #[tokio::test]
    async fn test_history_upsert_replaces_and_prunes() {
        let sources = test_sources().await;
        sources
            .upsert_week(date(2025, 9, 29), &[total("A", 5)])
            .await
            .unwrap();
        sources
            .upsert_week(date(2025, 10, 6), &[total("A", 1), total("B", 2)])
            .await
            .unwrap();
        sources
            .upsert_week(date(2025, 10, 6), &[total("B", 7)])
            .await
            .unwrap();
        sources
            .upsert_week(date(2025, 10, 13), &[total("A", 3)])
            .await
            .unwrap();

        let latest = date(2025, 10, 13);
        let weeks = sources.recent_weeks(latest, 52).await.unwrap();
        assert_eq!(weeks.len(), 3);
        assert_eq!(weeks[1].week_start, date(2025, 10, 6));
        assert_eq!(weeks[1].totals, vec![total("B", 7)]);

        assert_eq!(sources.prune(2, latest).await.unwrap(), 1);
        let weeks = sources.recent_weeks(latest, 52).await.unwrap();
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[0].week_start, date(2025, 10, 13));
    }

    #[tokio::test]
    async fn test_history_keeps_empty_week() {
        let sources = test_sources().await;
        sources
            .upsert_week(date(2025, 10, 6), &[total("A", 10)])
            .await
            .unwrap();
        sources.upsert_week(date(2025, 10, 13), &[]).await.unwrap();

        let weeks = sources.recent_weeks(date(2025, 10, 13), 52).await.unwrap();
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[0].week_start, date(2025, 10, 13));
        assert!(weeks[0].totals.is_empty());

        let averages = crate::runner::weekly::rolling_averages(&weeks);
        assert_eq!(averages["A"], Decimal::new(5, 0));
    }

    #[tokio::test]
    async fn test_history_window_anchored_at_week() {
        let sources = test_sources().await;
        for day in [6, 13, 20, 27] {
            sources
                .upsert_week(date(2025, 10, day), &[total("A", day as i64)])
                .await
                .unwrap();
        }

        let backfill = date(2025, 10, 13);
        assert_eq!(sources.prune(1, backfill).await.unwrap(), 1);
        let weeks = sources.recent_weeks(backfill, 52).await.unwrap();
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].totals, vec![total("A", 13)]);

        // Later weeks survive a prune anchored before them.
        let all = sources.recent_weeks(date(2025, 10, 27), 52).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
