//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the database is unreachable
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub uptime_seconds: u64,
    /// Last scheduler tick, if it has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_last_tick: Option<DateTime<Utc>>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let (status, scheduler_last_tick) = match db::settings::get_scheduler_last_tick(&state.db).await {
        Ok(tick) => ("ok", tick),
        Err(e) => {
            tracing::warn!(error = %e, "Health check database read failed");
            ("degraded", None)
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "mdash-sync".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        scheduler_last_tick,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
