//! RunLedger interface tests.
//!
//! These tests verify the contract of the RunLedger trait.
//! Each test uses its own covered period so they can share one ledger.

use chrono::NaiveDate;
use serde_json::json;

use oracare_reports::ledger::{Details, LedgerError, RunLedger, RunOutcome, RunStatus};
use oracare_reports::ReportType;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// =============================================================================
// Read tests
// =============================================================================

pub async fn test_latest_empty<L: RunLedger>(ledger: &L) {
    let latest = ledger
        .latest(ReportType::Monthly)
        .await
        .expect("latest should succeed");
    assert!(latest.is_none(), "empty ledger has no latest run");
    assert!(ledger.in_progress().await.unwrap().is_empty());
}

// =============================================================================
// begin / complete tests
// =============================================================================

pub async fn test_begin_creates_in_progress<L: RunLedger>(ledger: &L) {
    let period = date(2025, 1, 6);
    let handle = ledger
        .begin(ReportType::Daily, period, false)
        .await
        .expect("begin should succeed");

    let stuck = ledger.in_progress().await.unwrap();
    let row = stuck
        .iter()
        .find(|r| r.id == handle.run_id())
        .expect("new run should be IN_PROGRESS");
    assert_eq!(row.report_type, ReportType::Daily);
    assert_eq!(row.covered_period, period);
    assert!(row.completed_at.is_none());
    assert!(!ledger.has_succeeded(ReportType::Daily, period).await.unwrap());

    ledger
        .complete(handle, RunOutcome::Failed, "cleanup", &Details::new())
        .await
        .unwrap();
}

pub async fn test_complete_success<L: RunLedger>(ledger: &L) {
    let period = date(2025, 1, 7);
    let handle = ledger.begin(ReportType::Daily, period, false).await.unwrap();
    let run_id = handle.run_id();

    let mut details = Details::new();
    details.insert("total_units".into(), json!(42));
    let row = ledger
        .complete(handle, RunOutcome::Succeeded, "42 units", &details)
        .await
        .expect("complete should succeed");

    assert_eq!(row.id, run_id);
    assert_eq!(row.status, RunStatus::Succeeded);
    assert_eq!(row.message, "42 units");
    assert_eq!(row.details["total_units"], json!(42));
    assert!(row.completed_at.is_some());
    assert!(row.is_current_success());
    assert!(ledger.has_succeeded(ReportType::Daily, period).await.unwrap());

    let latest = ledger.latest(ReportType::Daily).await.unwrap().unwrap();
    assert_eq!(latest.id, run_id);
}

pub async fn test_duplicate_begin_rejected<L: RunLedger>(ledger: &L) {
    let period = date(2025, 1, 8);
    let handle = ledger.begin(ReportType::Daily, period, false).await.unwrap();
    ledger
        .complete(handle, RunOutcome::Succeeded, "done", &Details::new())
        .await
        .unwrap();

    let err = ledger
        .begin(ReportType::Daily, period, false)
        .await
        .expect_err("second begin should be rejected");
    assert!(matches!(err, LedgerError::DuplicateRun { .. }));

    let history = ledger.history(ReportType::Daily, period).await.unwrap();
    assert_eq!(history.len(), 1, "rejected begin must not add a row");
}

pub async fn test_failed_run_does_not_block<L: RunLedger>(ledger: &L) {
    let period = date(2025, 1, 9);
    let handle = ledger.begin(ReportType::Monthly, period, false).await.unwrap();
    ledger
        .complete(handle, RunOutcome::Failed, "billing source down", &Details::new())
        .await
        .unwrap();
    assert!(!ledger.has_succeeded(ReportType::Monthly, period).await.unwrap());

    let retry = ledger
        .begin(ReportType::Monthly, period, false)
        .await
        .expect("retry after failure should be allowed");
    ledger
        .complete(retry, RunOutcome::Succeeded, "ok", &Details::new())
        .await
        .unwrap();

    let history = ledger.history(ReportType::Monthly, period).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, RunStatus::Failed);
    assert_eq!(history[1].status, RunStatus::Succeeded);
}

// =============================================================================
// Forced rerun tests
// =============================================================================

pub async fn test_forced_rerun_supersedes<L: RunLedger>(ledger: &L) {
    let period = date(2025, 1, 13);
    let first = ledger.begin(ReportType::Weekly, period, false).await.unwrap();
    let first_id = first.run_id();
    ledger
        .complete(first, RunOutcome::Succeeded, "v1", &Details::new())
        .await
        .unwrap();

    let rerun = ledger
        .begin(ReportType::Weekly, period, true)
        .await
        .expect("forced begin should be allowed");
    assert!(rerun.forced());
    let rerun_id = rerun.run_id();
    ledger
        .complete(rerun, RunOutcome::Succeeded, "v2", &Details::new())
        .await
        .unwrap();

    let history = ledger.history(ReportType::Weekly, period).await.unwrap();
    assert_eq!(history.len(), 2, "rows are never deleted");
    let old = history.iter().find(|r| r.id == first_id).unwrap();
    let new = history.iter().find(|r| r.id == rerun_id).unwrap();
    assert_eq!(old.status, RunStatus::Succeeded);
    assert!(old.superseded_at.is_some());
    assert!(new.is_current_success());
    assert!(new.forced);
    assert_eq!(history.iter().filter(|r| r.is_current_success()).count(), 1);
}

pub async fn test_failed_forced_rerun_keeps_prior<L: RunLedger>(ledger: &L) {
    let period = date(2025, 1, 20);
    let first = ledger.begin(ReportType::Weekly, period, false).await.unwrap();
    let first_id = first.run_id();
    ledger
        .complete(first, RunOutcome::Succeeded, "v1", &Details::new())
        .await
        .unwrap();

    let rerun = ledger.begin(ReportType::Weekly, period, true).await.unwrap();
    ledger
        .complete(rerun, RunOutcome::Failed, "timed out", &Details::new())
        .await
        .unwrap();

    let history = ledger.history(ReportType::Weekly, period).await.unwrap();
    let current: Vec<_> = history.iter().filter(|r| r.is_current_success()).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, first_id);
}

// =============================================================================
// Uniqueness tests
// =============================================================================

pub async fn test_racing_success_is_discarded<L: RunLedger>(ledger: &L) {
    let period = date(2025, 1, 10);
    let a = ledger.begin(ReportType::Daily, period, false).await.unwrap();
    let b = ledger.begin(ReportType::Daily, period, false).await.unwrap();
    let b_id = b.run_id();

    ledger
        .complete(a, RunOutcome::Succeeded, "a", &Details::new())
        .await
        .unwrap();
    let err = ledger
        .complete(b, RunOutcome::Succeeded, "b", &Details::new())
        .await
        .expect_err("second success for the key must be rejected");
    assert!(matches!(err, LedgerError::DuplicateRun { .. }));

    let history = ledger.history(ReportType::Daily, period).await.unwrap();
    assert_eq!(history.iter().filter(|r| r.is_current_success()).count(), 1);
    let loser = history.iter().find(|r| r.id == b_id).unwrap();
    assert_eq!(loser.status, RunStatus::Failed);
    assert!(loser.message.starts_with("discarded"));
}

pub async fn test_complete_twice_rejected<L: RunLedger>(ledger: &L) {
    let period = date(2025, 1, 11);
    let handle = ledger.begin(ReportType::Daily, period, false).await.unwrap();
    let run_id = handle.run_id();
    ledger.abandon(run_id, "operator cancelled").await.unwrap();

    let err = ledger
        .complete(handle, RunOutcome::Succeeded, "late", &Details::new())
        .await
        .expect_err("terminal row cannot be completed");
    assert!(matches!(
        err,
        LedgerError::InvalidTransition {
            status: RunStatus::Failed,
            ..
        }
    ));
}

// =============================================================================
// abandon / history tests
// =============================================================================

pub async fn test_abandon<L: RunLedger>(ledger: &L) {
    let period = date(2025, 2, 1);
    let handle = ledger.begin(ReportType::Monthly, period, false).await.unwrap();
    let run_id = handle.run_id();
    drop(handle);

    ledger
        .abandon(run_id, "abandoned")
        .await
        .expect("abandon should succeed");
    let history = ledger.history(ReportType::Monthly, period).await.unwrap();
    assert_eq!(history[0].status, RunStatus::Failed);
    assert_eq!(history[0].message, "abandoned");
    assert!(!ledger
        .in_progress()
        .await
        .unwrap()
        .iter()
        .any(|r| r.id == run_id));

    let again = ledger.abandon(run_id, "abandoned").await.unwrap_err();
    assert!(matches!(again, LedgerError::InvalidTransition { .. }));
    let missing = ledger.abandon(i64::MAX, "abandoned").await.unwrap_err();
    assert!(matches!(missing, LedgerError::NotFound(_)));
}

pub async fn test_history_isolated_by_type<L: RunLedger>(ledger: &L) {
    let period = date(2025, 3, 3);
    for report_type in [ReportType::Daily, ReportType::Weekly] {
        let handle = ledger.begin(report_type, period, false).await.unwrap();
        ledger
            .complete(handle, RunOutcome::Succeeded, "ok", &Details::new())
            .await
            .unwrap();
    }

    let daily = ledger.history(ReportType::Daily, period).await.unwrap();
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].report_type, ReportType::Daily);
    assert!(ledger
        .history(ReportType::Monthly, period)
        .await
        .unwrap()
        .is_empty());
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all RunLedger interface tests against a fresh ledger.
#[macro_export]
macro_rules! run_ledger_tests {
    ($ledger:expr) => {
        use $crate::ledger::run_ledger_tests::*;

        test_latest_empty($ledger).await;
        println!("  test_latest_empty: PASSED");

        test_begin_creates_in_progress($ledger).await;
        println!("  test_begin_creates_in_progress: PASSED");

        test_complete_success($ledger).await;
        println!("  test_complete_success: PASSED");

        test_duplicate_begin_rejected($ledger).await;
        println!("  test_duplicate_begin_rejected: PASSED");

        test_failed_run_does_not_block($ledger).await;
        println!("  test_failed_run_does_not_block: PASSED");

        test_forced_rerun_supersedes($ledger).await;
        println!("  test_forced_rerun_supersedes: PASSED");

        test_failed_forced_rerun_keeps_prior($ledger).await;
        println!("  test_failed_forced_rerun_keeps_prior: PASSED");

        test_racing_success_is_discarded($ledger).await;
        println!("  test_racing_success_is_discarded: PASSED");

        test_complete_twice_rejected($ledger).await;
        println!("  test_complete_twice_rejected: PASSED");

        test_abandon($ledger).await;
        println!("  test_abandon: PASSED");

        test_history_isolated_by_type($ledger).await;
        println!("  test_history_isolated_by_type: PASSED");
    };
}
