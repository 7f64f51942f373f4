//! Sync trigger and status endpoints

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::db::status::SourceStatus;
use crate::error::ApiResult;
use crate::models::{SourceKind, SyncReport, SyncTrigger};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Limit the run to these sources; all active sources when absent
    #[serde(default)]
    pub sources: Option<Vec<SourceKind>>,
}

#[derive(Debug, Serialize)]
pub struct ProjectSyncStatus {
    pub project_id: Uuid,
    pub running: bool,
    pub sources: Vec<SourceStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

/// POST /projects/:project_id/sync
///
/// Runs to completion and returns the report. Partial failures are reported
/// per source; only request-level problems become error responses.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Json<SyncReport>> {
    let report = state
        .orchestrator
        .sync_sources(
            project_id,
            request.start,
            request.end,
            SyncTrigger::Manual,
            request.sources.as_deref(),
        )
        .await?;
    Ok(Json(report))
}

/// GET /projects/:project_id/sync/status
pub async fn sync_status(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<ProjectSyncStatus>> {
    let sources = db::status::project_status(&state.db, project_id).await?;
    Ok(Json(ProjectSyncStatus {
        project_id,
        running: state.orchestrator.is_running(project_id),
        sources,
    }))
}

/// GET /projects/:project_id/sync/runs
pub async fn sync_runs(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<SyncReport>>> {
    let runs = db::runs::recent_runs(&state.db, project_id, query.limit.clamp(1, 200)).await?;
    Ok(Json(runs))
}

pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/projects/:project_id/sync", post(trigger_sync))
        .route("/projects/:project_id/sync/status", get(sync_status))
        .route("/projects/:project_id/sync/runs", get(sync_runs))
}
