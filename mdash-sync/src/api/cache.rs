//! Cache inspection and invalidation

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::services::CacheStats;
use crate::AppState;

/// GET /cache
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.orchestrator.cache().stats().await)
}

/// DELETE /cache
pub async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    let cache = state.orchestrator.cache();
    let cleared = cache.len().await;
    cache.clear_all().await;
    tracing::info!(cleared, "Cache cleared via API");
    Json(json!({ "cleared": cleared }))
}

pub fn cache_routes() -> Router<AppState> {
    Router::new().route("/cache", get(cache_stats).delete(clear_cache))
}
