//! mdash-sync library interface
//!
//! Source adapters, normalization, the sync orchestrator and storage-mode
//! migration, plus the HTTP surface that drives them.

pub mod adapters;
pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult, SyncError};

use axum::Router;
use chrono::{DateTime, Utc};
use mdash_common::events::EventBus;
use services::{ModeMigrationManager, SyncOrchestrator};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub migrations: Arc<ModeMigrationManager>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        orchestrator: Arc<SyncOrchestrator>,
        migrations: Arc<ModeMigrationManager>,
    ) -> Self {
        Self {
            db,
            event_bus,
            orchestrator,
            migrations,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/events", get(api::event_stream))
        .merge(api::source_routes())
        .merge(api::sync_routes())
        .merge(api::data_routes())
        .merge(api::mode_routes())
        .merge(api::cache_routes())
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
