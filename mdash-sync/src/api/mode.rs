//! Storage mode switching and backups

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{BackupSnapshot, StorageMode};
use crate::services::{ModeValidation, SwitchOptions};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ValidateModeRequest {
    pub target_mode: StorageMode,
}

#[derive(Debug, Deserialize)]
pub struct SwitchModeRequest {
    pub target_mode: StorageMode,
    #[serde(default)]
    pub options: SwitchOptions,
}

/// POST /projects/:project_id/mode/validate
pub async fn validate_mode(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<ValidateModeRequest>,
) -> ApiResult<Json<ModeValidation>> {
    let validation = state
        .migrations
        .validate_mode_switch(project_id, request.target_mode)
        .await?;
    Ok(Json(validation))
}

/// POST /projects/:project_id/mode
///
/// A failed switch is returned as a 500 carrying the full result, so the
/// caller still sees the backup id and warnings.
pub async fn switch_mode(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<SwitchModeRequest>,
) -> Response {
    let result = state
        .migrations
        .switch_mode(project_id, request.target_mode, &request.options)
        .await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result)).into_response()
}

/// GET /projects/:project_id/backups
pub async fn list_backups(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<BackupSnapshot>>> {
    Ok(Json(state.migrations.list_backups(project_id).await?))
}

/// POST /backups/:backup_id/restore
pub async fn restore_backup(
    State(state): State<AppState>,
    Path(backup_id): Path<Uuid>,
) -> ApiResult<Json<BackupSnapshot>> {
    Ok(Json(state.migrations.restore_backup(backup_id).await?))
}

pub fn mode_routes() -> Router<AppState> {
    Router::new()
        .route("/projects/:project_id/mode", post(switch_mode))
        .route("/projects/:project_id/mode/validate", post(validate_mode))
        .route("/projects/:project_id/backups", get(list_backups))
        .route("/backups/:backup_id/restore", post(restore_backup))
}
