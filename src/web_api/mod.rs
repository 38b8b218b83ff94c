//! WebAPI - Health and Status Endpoints
//!
//! ## Responsibilities
//!
//! - Expose current run state and completed run summaries
//! - Read-only ledger queries
//! - Manual trigger injection

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let recognizer_ok = state.recognition.health_check().await.unwrap_or(false);
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        recognizer_connected: recognizer_ok,
        db_connected: db_ok,
        run_active: state.coordinator.is_active(),
    };

    Json(response)
}

/// Status endpoint
pub async fn device_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "device_type": "tollgate",
        "firmware_version": env!("CARGO_PKG_VERSION"),
        "location": state.config.location,
        "status": "running"
    }))
}
