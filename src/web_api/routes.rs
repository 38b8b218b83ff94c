//! API Routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::ApiResponse;
use crate::run_coordinator::TriggerEvent;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::device_status))
        // Runs
        .route("/api/run/current", get(current_run))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/:id", get(get_run))
        // Ledger
        .route("/api/transactions", get(list_transactions))
        .route("/api/violations", get(list_violations))
        // Manual trigger (same drop-if-active semantics as the watcher)
        .route("/api/trigger", post(inject_trigger))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<u32>,
}

/// Snapshot of the run in flight, null when idle
async fn current_run(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.coordinator.current_run().await;
    Json(ApiResponse::success(snapshot))
}

/// Completed run summaries, newest first
async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).min(500) as usize;
    let runs = state.run_log.latest(limit).await;
    Json(ApiResponse::success(runs))
}

/// One completed run by id
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse> {
    match state.run_log.get(&run_id).await {
        Some(summary) => Ok(Json(ApiResponse::success(summary))),
        None => Err(Error::NotFound(format!("run {} not found", run_id))),
    }
}

/// Recent settlement transactions
async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse> {
    let limit = query.limit.unwrap_or(50).min(500);
    let transactions = state.ledger.recent_transactions(limit).await?;
    Ok(Json(ApiResponse::success(transactions)))
}

/// Recent violations
async fn list_violations(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse> {
    let limit = query.limit.unwrap_or(50).min(500);
    let violations = state.ledger.recent_violations(limit).await?;
    Ok(Json(ApiResponse::success(violations)))
}

/// Inject a manual trigger; dropped if a run is active
async fn inject_trigger(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.try_start(TriggerEvent::manual("api")) {
        Some(run_id) => Json(ApiResponse::success(json!({
            "run_id": run_id,
            "accepted": true
        }))),
        None => Json(ApiResponse::success(json!({
            "accepted": false,
            "reason": "run already active"
        }))),
    }
}
