//! Report types and the calendar buckets they cover.
//!
//! Every trigger maps a reference date onto a canonical period: the day itself
//! for daily reports, the first day of the containing week for weekly reports,
//! and the first day of the containing month for monthly reports. The week
//! convention is always supplied explicitly through [`WeekStart`].

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// The three report families the dashboard can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    /// End-of-day inventory rollup.
    Daily,
    /// End-of-week aggregation into the rolling shipment history.
    Weekly,
    /// End-of-month billing reconciliation.
    Monthly,
}

impl ReportType {
    /// All report types, in display order.
    pub const ALL: [ReportType; 3] = [ReportType::Daily, ReportType::Weekly, ReportType::Monthly];

    /// Storage representation (`DAILY`, `WEEKLY`, `MONTHLY`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Daily => "DAILY",
            ReportType::Weekly => "WEEKLY",
            ReportType::Monthly => "MONTHLY",
        }
    }

    /// Lowercase slug used in URLs and CLI arguments.
    pub fn slug(&self) -> &'static str {
        match self {
            ReportType::Daily => "daily",
            ReportType::Weekly => "weekly",
            ReportType::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known report type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown report type: {0}")]
pub struct UnknownReportType(pub String);

impl FromStr for ReportType {
    type Err = UnknownReportType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "eod" => Ok(ReportType::Daily),
            "weekly" | "eow" => Ok(ReportType::Weekly),
            "monthly" | "eom" => Ok(ReportType::Monthly),
            _ => Err(UnknownReportType(s.to_string())),
        }
    }
}

/// First day of the business week.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    /// ISO-8601 weeks.
    #[default]
    Monday,
    Sunday,
}

/// The canonical period a run covers.
///
/// `start` is the stored `covered_period`; `end` is the inclusive last day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PeriodKey {
    pub report_type: ReportType,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodKey {
    /// Number of calendar days covered, inclusive.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Whether `date` falls inside this period.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.report_type, self.start)
    }
}

/// Maps reference dates onto canonical periods.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodCalculator {
    week_start: WeekStart,
}

impl PeriodCalculator {
    pub fn new(week_start: WeekStart) -> Self {
        Self { week_start }
    }

    pub fn week_start(&self) -> WeekStart {
        self.week_start
    }

    /// Canonical period for `report_type` containing `reference`.
    pub fn covered_period(&self, report_type: ReportType, reference: NaiveDate) -> PeriodKey {
        let (start, end) = match report_type {
            ReportType::Daily => (reference, reference),
            ReportType::Weekly => {
                let start = week_start_of(reference, self.week_start);
                (start, add_days(start, 6))
            }
            ReportType::Monthly => {
                let start = month_start_of(reference);
                (start, month_end_of(start))
            }
        };

        PeriodKey {
            report_type,
            start,
            end,
        }
    }
}

/// First day of the week containing `date`.
pub fn week_start_of(date: NaiveDate, week_start: WeekStart) -> NaiveDate {
    let offset = match week_start {
        WeekStart::Monday => date.weekday().num_days_from_monday(),
        WeekStart::Sunday => date.weekday().num_days_from_sunday(),
    };
    date - Days::new(u64::from(offset))
}

/// First day of the calendar month containing `date`.
pub fn month_start_of(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// Last day of the calendar month that starts at `month_start`.
fn month_end_of(month_start: NaiveDate) -> NaiveDate {
    month_start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days))
        .unwrap_or(NaiveDate::MAX)
}
