use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Absent with the in-memory store backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    db_healthy: Option<bool>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = match &state.pool {
        Some(pool) => Some(waypoint_db::health_check(pool).await.is_ok()),
        None => None,
    };
    let status = if db_healthy == Some(false) { "degraded" } else { "ok" };
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
