//! Sea-query schema definitions for the run ledger.

use sea_query::Iden;

/// Report runs table schema.
///
/// One row per attempt. The partial unique index on
/// `(report_type, covered_period)` admits a single current success per key.
#[derive(Iden)]
pub enum ReportRuns {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "report_type"]
    ReportType,
    #[iden = "covered_period"]
    CoveredPeriod,
    #[iden = "triggered_at"]
    TriggeredAt,
    #[iden = "completed_at"]
    CompletedAt,
    #[iden = "status"]
    Status,
    #[iden = "message"]
    Message,
    /// JSON object of runner-specific output.
    #[iden = "details"]
    Details,
    #[iden = "forced"]
    Forced,
    #[iden = "superseded_at"]
    SupersededAt,
}

/// SQL for creating the report runs table.
pub const CREATE_REPORT_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS report_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    report_type TEXT NOT NULL CHECK (report_type IN ('DAILY', 'WEEKLY', 'MONTHLY')),
    covered_period TEXT NOT NULL,
    triggered_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL CHECK (status IN ('IN_PROGRESS', 'SUCCEEDED', 'FAILED')),
    message TEXT NOT NULL DEFAULT '',
    details TEXT NOT NULL DEFAULT '{}',
    forced INTEGER NOT NULL DEFAULT 0,
    superseded_at TEXT
)"#;

/// At most one current success per key, across every writer of the file.
pub const CREATE_CURRENT_SUCCESS_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_report_runs_current_success
    ON report_runs(report_type, covered_period)
    WHERE status = 'SUCCEEDED' AND superseded_at IS NULL"#;

pub const CREATE_KEY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_report_runs_key
    ON report_runs(report_type, covered_period)"#;

pub const CREATE_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_report_runs_status
    ON report_runs(status)"#;
