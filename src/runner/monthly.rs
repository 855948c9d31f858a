//! End-of-month billing reconciliation.
//!
//! Charges are grouped by `(carrier, service)` after they are read, one row
//! per order. A windowed aggregate over the raw rows would repeat the group
//! totals on every order row and inflate the report.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

use super::{ensure_report_type, ReportRunner, RunResult, RunnerError};
use crate::ledger::Details;
use crate::period::{PeriodKey, ReportType};
use crate::sources::{BillingSource, ShippingCharge};

/// Charge totals for one carrier service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeGroup {
    pub carrier: String,
    pub service: String,
    pub count: u64,
    pub total: Decimal,
}

/// Group charges by `(carrier, service)`, ordered by carrier then service.
pub fn group_charges(charges: &[ShippingCharge]) -> Vec<ChargeGroup> {
    let mut groups: BTreeMap<(&str, &str), (u64, Decimal)> = BTreeMap::new();
    for charge in charges {
        let entry = groups
            .entry((charge.carrier.as_str(), charge.service.as_str()))
            .or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 += charge.cost;
    }

    groups
        .into_iter()
        .map(|((carrier, service), (count, total))| ChargeGroup {
            carrier: carrier.to_string(),
            service: service.to_string(),
            count,
            total,
        })
        .collect()
}

/// Reconciles a month of per-order shipping charges.
pub struct MonthlyBillingRunner {
    billing: Arc<dyn BillingSource>,
}

impl MonthlyBillingRunner {
    pub fn new(billing: Arc<dyn BillingSource>) -> Self {
        Self { billing }
    }
}

#[async_trait]
impl ReportRunner for MonthlyBillingRunner {
    fn report_type(&self) -> ReportType {
        ReportType::Monthly
    }

    async fn run(&self, period: &PeriodKey) -> Result<RunResult, RunnerError> {
        ensure_report_type(ReportType::Monthly, period)?;

        let charges = self.billing.charges(period.start, period.end).await?;
        let groups = group_charges(&charges);
        let total: Decimal = groups.iter().map(|g| g.total).sum();

        let mut details = Details::new();
        details.insert("month_start".into(), json!(period.start));
        details.insert("month_end".into(), json!(period.end));
        details.insert("order_count".into(), json!(charges.len()));
        details.insert("total_cost".into(), json!(total.to_string()));
        details.insert("groups".into(), serde_json::to_value(&groups).map_err(|e| {
            RunnerError::InvalidOutput(format!("failed to encode charge groups: {e}"))
        })?);

        Ok(RunResult::succeeded(
            format!(
                "Monthly billing for {}: {} orders, ${} across {} carrier services",
                period.start.format("%Y-%m"),
                charges.len(),
                total.round_dp(2),
                groups.len()
            ),
            details,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodCalculator;
    use crate::sources::InMemoryBilling;
    use chrono::NaiveDate;

    fn charge(order_id: &str, carrier: &str, service: &str, cents: i64) -> ShippingCharge {
        ShippingCharge {
            order_id: order_id.to_string(),
            ship_date: NaiveDate::from_ymd_opt(2025, 10, 7).unwrap(),
            carrier: carrier.to_string(),
            service: service.to_string(),
            cost: Decimal::new(cents, 2),
        }
    }

    #[test]
    fn test_group_charges_by_carrier_service() {
        let charges = vec![
            charge("1", "FedEx", "Ground", 500),
            charge("2", "FedEx", "Ground", 700),
            charge("3", "USPS", "2Day", 1000),
        ];

        let groups = group_charges(&charges);

        assert_eq!(
            groups,
            vec![
                ChargeGroup {
                    carrier: "FedEx".into(),
                    service: "Ground".into(),
                    count: 2,
                    total: Decimal::new(1200, 2),
                },
                ChargeGroup {
                    carrier: "USPS".into(),
                    service: "2Day".into(),
                    count: 1,
                    total: Decimal::new(1000, 2),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_monthly_runner_reports_groups_not_rows() {
        let billing = Arc::new(InMemoryBilling::new());
        billing.record(charge("1", "FedEx", "Ground", 500)).await;
        billing.record(charge("2", "FedEx", "Ground", 700)).await;
        billing.record(charge("3", "USPS", "2Day", 1000)).await;

        let runner = MonthlyBillingRunner::new(billing);
        let period = PeriodCalculator::default().covered_period(
            ReportType::Monthly,
            NaiveDate::from_ymd_opt(2025, 10, 31).unwrap(),
        );
        let result = runner.run(&period).await.unwrap();

        assert!(result.success);
        assert_eq!(result.details["order_count"], json!(3));
        assert_eq!(result.details["total_cost"], json!("22.00"));
        assert_eq!(result.details["groups"].as_array().unwrap().len(), 2);
        assert!(result.summary.contains("2025-10"));
    }
}
