//! SQLite RunLedger implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use super::schema::{
    ReportRuns, CREATE_CURRENT_SUCCESS_INDEX, CREATE_KEY_INDEX, CREATE_REPORT_RUNS_TABLE,
    CREATE_STATUS_INDEX,
};
use super::{
    Details, LedgerError, ReportRun, Result, RunHandle, RunLedger, RunOutcome, RunStatus,
};
use crate::period::ReportType;

const PERIOD_FORMAT: &str = "%Y-%m-%d";

const COLUMNS: [ReportRuns; 10] = [
    ReportRuns::Id,
    ReportRuns::ReportType,
    ReportRuns::CoveredPeriod,
    ReportRuns::TriggeredAt,
    ReportRuns::CompletedAt,
    ReportRuns::Status,
    ReportRuns::Message,
    ReportRuns::Details,
    ReportRuns::Forced,
    ReportRuns::SupersededAt,
];

/// SQLite-backed run ledger.
///
/// Writes run inside `BEGIN IMMEDIATE` transactions so that separate
/// processes sharing the database file serialize on the write lock; the
/// partial unique index rejects a second current success regardless.
pub struct SqliteRunLedger {
    pool: SqlitePool,
}

impl SqliteRunLedger {
    /// Create a new SQLite run ledger.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn begin_in_tx(
        conn: &mut SqliteConnection,
        report_type: ReportType,
        period: NaiveDate,
        force: bool,
    ) -> Result<i64> {
        if !force && Self::current_success_id(&mut *conn, report_type, period).await?.is_some() {
            return Err(LedgerError::DuplicateRun {
                report_type,
                period,
            });
        }

        let (sql, values) = Query::insert()
            .into_table(ReportRuns::Table)
            .columns([
                ReportRuns::ReportType,
                ReportRuns::CoveredPeriod,
                ReportRuns::TriggeredAt,
                ReportRuns::Status,
                ReportRuns::Message,
                ReportRuns::Details,
                ReportRuns::Forced,
            ])
            .values_panic([
                report_type.as_str().into(),
                format_period(period).into(),
                timestamp(Utc::now()).into(),
                RunStatus::InProgress.as_str().into(),
                "".into(),
                "{}".into(),
                force.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&mut *conn).await?;
        Ok(result.last_insert_rowid())
    }

    async fn complete_in_tx(
        conn: &mut SqliteConnection,
        handle: &RunHandle,
        outcome: RunOutcome,
        message: &str,
        details: &str,
        completed_at: &str,
    ) -> Result<()> {
        let current = Self::fetch_by_id(&mut *conn, handle.run_id())
            .await?
            .ok_or(LedgerError::NotFound(handle.run_id()))?;
        if current.status != RunStatus::InProgress {
            return Err(LedgerError::InvalidTransition {
                run_id: current.id,
                status: current.status,
            });
        }

        if outcome == RunOutcome::Succeeded && handle.forced() {
            let (sql, values) = Query::update()
                .table(ReportRuns::Table)
                .value(ReportRuns::SupersededAt, completed_at)
                .and_where(Expr::col(ReportRuns::ReportType).eq(handle.report_type().as_str()))
                .and_where(Expr::col(ReportRuns::CoveredPeriod).eq(format_period(handle.period())))
                .and_where(Expr::col(ReportRuns::Status).eq(RunStatus::Succeeded.as_str()))
                .and_where(Expr::col(ReportRuns::SupersededAt).is_null())
                .and_where(Expr::col(ReportRuns::Id).ne(handle.run_id()))
                .build_sqlx(SqliteQueryBuilder);

            let superseded = sqlx::query_with(&sql, values)
                .execute(&mut *conn)
                .await?
                .rows_affected();
            debug!(
                run_id = handle.run_id(),
                superseded, "Superseding previous success"
            );
        }

        let status = RunStatus::from(outcome);
        let (sql, values) = Query::update()
            .table(ReportRuns::Table)
            .value(ReportRuns::Status, status.as_str())
            .value(ReportRuns::CompletedAt, completed_at)
            .value(ReportRuns::Message, message)
            .value(ReportRuns::Details, details)
            .and_where(Expr::col(ReportRuns::Id).eq(handle.run_id()))
            .and_where(Expr::col(ReportRuns::Status).eq(RunStatus::InProgress.as_str()))
            .build_sqlx(SqliteQueryBuilder);

        match sqlx::query_with(&sql, values).execute(&mut *conn).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LedgerError::DuplicateRun {
                    report_type: handle.report_type(),
                    period: handle.period(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fail_row(
        conn: &mut SqliteConnection,
        run_id: i64,
        message: &str,
        completed_at: &str,
    ) -> Result<u64> {
        let (sql, values) = Query::update()
            .table(ReportRuns::Table)
            .value(ReportRuns::Status, RunStatus::Failed.as_str())
            .value(ReportRuns::CompletedAt, completed_at)
            .value(ReportRuns::Message, message)
            .and_where(Expr::col(ReportRuns::Id).eq(run_id))
            .and_where(Expr::col(ReportRuns::Status).eq(RunStatus::InProgress.as_str()))
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(&mut *conn)
            .await?
            .rows_affected())
    }

    async fn current_success_id(
        conn: &mut SqliteConnection,
        report_type: ReportType,
        period: NaiveDate,
    ) -> Result<Option<i64>> {
        let (sql, values) = Query::select()
            .column(ReportRuns::Id)
            .from(ReportRuns::Table)
            .and_where(Expr::col(ReportRuns::ReportType).eq(report_type.as_str()))
            .and_where(Expr::col(ReportRuns::CoveredPeriod).eq(format_period(period)))
            .and_where(Expr::col(ReportRuns::Status).eq(RunStatus::Succeeded.as_str()))
            .and_where(Expr::col(ReportRuns::SupersededAt).is_null())
            .limit(1)
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn fetch_by_id(conn: &mut SqliteConnection, run_id: i64) -> Result<Option<ReportRun>> {
        let (sql, values) = Query::select()
            .columns(COLUMNS)
            .from(ReportRuns::Table)
            .and_where(Expr::col(ReportRuns::Id).eq(run_id))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(decode_run).transpose()
    }

    async fn finish(conn: &mut SqliteConnection, commit: bool) {
        let statement = if commit { "COMMIT" } else { "ROLLBACK" };
        if let Err(e) = sqlx::query(statement).execute(&mut *conn).await {
            warn!(error = %e, statement, "Failed to close ledger transaction");
        }
    }
}

#[async_trait]
impl RunLedger for SqliteRunLedger {
    async fn init_schema(&self) -> Result<()> {
        for statement in [
            CREATE_REPORT_RUNS_TABLE,
            CREATE_CURRENT_SUCCESS_INDEX,
            CREATE_KEY_INDEX,
            CREATE_STATUS_INDEX,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn has_succeeded(&self, report_type: ReportType, period: NaiveDate) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(Self::current_success_id(&mut conn, report_type, period)
            .await?
            .is_some())
    }

    async fn begin(
        &self,
        report_type: ReportType,
        period: NaiveDate,
        force: bool,
    ) -> Result<RunHandle> {
        // BEGIN IMMEDIATE takes the write lock upfront so the duplicate check
        // and the insert see the same snapshot.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::begin_in_tx(&mut conn, report_type, period, force).await {
            Ok(run_id) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                debug!(run_id, %report_type, %period, force, "Run begun");
                Ok(RunHandle::new(run_id, report_type, period, force))
            }
            Err(e) => {
                Self::finish(&mut conn, false).await;
                Err(e)
            }
        }
    }

    async fn complete(
        &self,
        handle: RunHandle,
        outcome: RunOutcome,
        message: &str,
        details: &Details,
    ) -> Result<ReportRun> {
        let details = serde_json::to_string(details)?;
        let completed_at = timestamp(Utc::now());

        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result =
            Self::complete_in_tx(&mut conn, &handle, outcome, message, &details, &completed_at)
                .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            Err(LedgerError::DuplicateRun {
                report_type,
                period,
            }) => {
                Self::finish(&mut conn, false).await;
                warn!(
                    run_id = handle.run_id(),
                    %report_type,
                    %period,
                    "Another writer recorded a success for this period first"
                );
                Self::fail_row(
                    &mut conn,
                    handle.run_id(),
                    "discarded: another run already succeeded for this period",
                    &completed_at,
                )
                .await?;
                return Err(LedgerError::DuplicateRun {
                    report_type,
                    period,
                });
            }
            Err(e) => {
                Self::finish(&mut conn, false).await;
                return Err(e);
            }
        }

        Self::fetch_by_id(&mut conn, handle.run_id())
            .await?
            .ok_or(LedgerError::NotFound(handle.run_id()))
    }

    async fn latest(&self, report_type: ReportType) -> Result<Option<ReportRun>> {
        let (sql, values) = Query::select()
            .columns(COLUMNS)
            .from(ReportRuns::Table)
            .and_where(Expr::col(ReportRuns::ReportType).eq(report_type.as_str()))
            .order_by(ReportRuns::Id, Order::Desc)
            .limit(1)
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_run).transpose()
    }

    async fn history(&self, report_type: ReportType, period: NaiveDate) -> Result<Vec<ReportRun>> {
        let (sql, values) = Query::select()
            .columns(COLUMNS)
            .from(ReportRuns::Table)
            .and_where(Expr::col(ReportRuns::ReportType).eq(report_type.as_str()))
            .and_where(Expr::col(ReportRuns::CoveredPeriod).eq(format_period(period)))
            .order_by(ReportRuns::Id, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(decode_run).collect()
    }

    async fn in_progress(&self) -> Result<Vec<ReportRun>> {
        let (sql, values) = Query::select()
            .columns(COLUMNS)
            .from(ReportRuns::Table)
            .and_where(Expr::col(ReportRuns::Status).eq(RunStatus::InProgress.as_str()))
            .order_by(ReportRuns::Id, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(decode_run).collect()
    }

    async fn abandon(&self, run_id: i64, message: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let updated = Self::fail_row(&mut conn, run_id, message, &timestamp(Utc::now())).await?;
        if updated == 1 {
            return Ok(());
        }

        match Self::fetch_by_id(&mut conn, run_id).await? {
            None => Err(LedgerError::NotFound(run_id)),
            Some(run) => Err(LedgerError::InvalidTransition {
                run_id,
                status: run.status,
            }),
        }
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn format_period(period: NaiveDate) -> String {
    period.format(PERIOD_FORMAT).to_string()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn decode_run(row: &SqliteRow) -> Result<ReportRun> {
    let report_type: String = row.try_get("report_type")?;
    let report_type = report_type
        .parse::<ReportType>()
        .map_err(|e| LedgerError::Corrupt(e.to_string()))?;

    let period: String = row.try_get("covered_period")?;
    let covered_period = NaiveDate::parse_from_str(&period, PERIOD_FORMAT)
        .map_err(|e| LedgerError::Corrupt(format!("bad period {period:?}: {e}")))?;

    let triggered_at = parse_timestamp(&row.try_get::<String, _>("triggered_at")?)?;
    let completed_at = row
        .try_get::<Option<String>, _>("completed_at")?
        .map(|raw| parse_timestamp(&raw))
        .transpose()?;
    let superseded_at = row
        .try_get::<Option<String>, _>("superseded_at")?
        .map(|raw| parse_timestamp(&raw))
        .transpose()?;

    let status: String = row.try_get("status")?;
    let details: String = row.try_get("details")?;

    Ok(ReportRun {
        id: row.try_get("id")?,
        report_type,
        covered_period,
        triggered_at,
        completed_at,
        status: status.parse()?,
        message: row.try_get("message")?,
        details: serde_json::from_str(&details)?,
        forced: row.try_get("forced")?,
        superseded_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn test_ledger() -> SqliteRunLedger {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .expect("failed to create in-memory pool");

        let ledger = SqliteRunLedger::new(pool);
        ledger.init_schema().await.expect("failed to init schema");
        ledger
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_timestamp_fixed_width() {
        let a = timestamp(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let b = timestamp(DateTime::from_timestamp(1_700_000_000, 123_456_000).unwrap());
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[tokio::test]
    async fn test_storage_rejects_second_current_success() {
        let ledger = test_ledger().await;
        let period = date(2025, 10, 16);

        for _ in 0..2 {
            sqlx::query(
                "INSERT INTO report_runs (report_type, covered_period, triggered_at, status)
                 VALUES ('DAILY', '2025-10-16', '2025-10-16T00:00:00.000000Z', 'IN_PROGRESS')",
            )
            .execute(&ledger.pool)
            .await
            .unwrap();
        }

        sqlx::query("UPDATE report_runs SET status = 'SUCCEEDED' WHERE id = 1")
            .execute(&ledger.pool)
            .await
            .unwrap();
        let second = sqlx::query("UPDATE report_runs SET status = 'SUCCEEDED' WHERE id = 2")
            .execute(&ledger.pool)
            .await;

        assert!(second.is_err(), "partial unique index must reject a second success");
        assert!(ledger.has_succeeded(ReportType::Daily, period).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_reported() {
        let ledger = test_ledger().await;
        sqlx::query(
            "INSERT INTO report_runs (report_type, covered_period, triggered_at, status)
             VALUES ('DAILY', 'not-a-date', '2025-10-16T00:00:00.000000Z', 'IN_PROGRESS')",
        )
        .execute(&ledger.pool)
        .await
        .unwrap();

        let err = ledger.latest(ReportType::Daily).await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt(_)));
    }
}
