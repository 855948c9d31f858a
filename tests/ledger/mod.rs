//! Shared run ledger integration tests.
//!
//! Tests the RunLedger interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod run_ledger_tests;
