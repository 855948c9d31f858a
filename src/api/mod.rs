//! REST API for the dashboard's report buttons.
//!
//! Endpoints:
//! - `POST /api/reports/{daily|weekly|monthly}?date=YYYY-MM-DD&force=true`
//! - `GET /api/reports/status`
//! - `GET /api/reports/{type}/history?date=YYYY-MM-DD`
//! - `GET /api/health`
//!
//! Every trigger reply carries `success`. Failures add `error` and `kind` and
//! use 409 when the report is already running, 424 when a prerequisite
//! failed, 500 otherwise.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::coordinator::{Disposition, ReportCoordinator, TriggerOutcome};
use crate::error::CoordinatorError;
use crate::period::ReportType;


/// Shared state for axum handlers.
type AppState = Arc<ReportCoordinator>;

/// Start the REST server on `addr` and run until Ctrl-C.
///
/// When the port is 0, the OS assigns an ephemeral port. The actual bound
/// address is always logged so it can be discovered.
pub async fn serve(
    coordinator: Arc<ReportCoordinator>,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(coordinator);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(%local, "report API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Build the axum router (separated for testing).
pub fn router(coordinator: Arc<ReportCoordinator>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/reports/status", get(status))
        .route("/api/reports/:report_type", post(trigger))
        .route("/api/reports/:report_type/history", get(history))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct TriggerParams {
    date: Option<NaiveDate>,
    #[serde(default)]
    force: bool,
}

async fn trigger(
    State(coordinator): State<AppState>,
    Path(report_type): Path<String>,
    Query(params): Query<TriggerParams>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let report_type = parse_report_type(&report_type)?;
    let reference = params.date.unwrap_or_else(today);

    // Run detached so a client disconnect cannot cancel a half-finished run.
    let task = tokio::spawn(async move {
        coordinator
            .trigger(report_type, reference, params.force)
            .await
    });

    match task.await {
        Ok(Ok(outcome)) => Ok(Json(TriggerResponse::from(outcome))),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => {
            error!(%report_type, error = %e, "trigger task failed");
            Err(ApiError::internal(format!("trigger task failed: {e}")))
        }
    }
}

async fn status(State(coordinator): State<AppState>) -> Result<Response, ApiError> {
    let report = coordinator.status().await?;
    Ok(Json(report).into_response())
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    date: Option<NaiveDate>,
}

async fn history(
    State(coordinator): State<AppState>,
    Path(report_type): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let report_type = parse_report_type(&report_type)?;
    let reference = params.date.unwrap_or_else(today);
    let period = coordinator.periods().covered_period(report_type, reference);
    let runs = coordinator.history(report_type, reference).await?;

    Ok(Json(json!({
        "report_type": report_type,
        "period": period,
        "runs": runs,
    }))
    .into_response())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn parse_report_type(raw: &str) -> Result<ReportType, ApiError> {
    raw.parse::<ReportType>().map_err(|e| ApiError {
        status: StatusCode::NOT_FOUND,
        kind: "unknown_report_type",
        error: e.to_string(),
    })
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct TriggerResponse {
    success: bool,
    message: String,
    already_done: bool,
    result: TriggerOutcome,
}

impl From<TriggerOutcome> for TriggerResponse {
    fn from(outcome: TriggerOutcome) -> Self {
        Self {
            success: true,
            message: outcome.message.clone(),
            already_done: outcome.disposition == Disposition::AlreadyDone,
            result: outcome,
        }
    }
}

/// Error reply: `{"success": false, "error": ..., "kind": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    error: String,
}

impl ApiError {
    fn internal(error: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            error,
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let status = match &err {
            CoordinatorError::AlreadyRunning(_) => StatusCode::CONFLICT,
            CoordinatorError::DependencyFailure { .. } => StatusCode::FAILED_DEPENDENCY,
            CoordinatorError::RunnerFailure { .. } | CoordinatorError::Ledger(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.error,
            "kind": self.kind,
        }));
        (self.status, body).into_response()
    }
}
