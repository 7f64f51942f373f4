//! Source connection endpoints
//!
//! A PUT replaces the project's active config for that source; earlier
//! configs stay in the history list.

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::adapters::Credentials;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{FieldMapping, SourceBase, SourceConfig, SourceKind, SyncCadence, SyncConfig};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SaveSourceRequest {
    pub credentials_ref: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub cadence: SyncCadence,
    pub source: SourceConfig,
    #[serde(default)]
    pub mapping: FieldMapping,
    /// Stored under `credentials_ref` when present
    #[serde(default)]
    pub credentials: Option<CredentialsBody>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSourcesQuery {
    #[serde(default)]
    pub history: bool,
}

/// PUT /projects/:project_id/sources/:kind
pub async fn save_source(
    State(state): State<AppState>,
    Path((project_id, kind)): Path<(Uuid, SourceKind)>,
    Json(request): Json<SaveSourceRequest>,
) -> ApiResult<Json<SyncConfig>> {
    if request.source.kind() != kind {
        return Err(ApiError::BadRequest(format!(
            "source kind {} does not match path {}",
            request.source.kind(),
            kind
        )));
    }
    if request.credentials_ref.trim().is_empty() {
        return Err(ApiError::BadRequest("credentials_ref is required".to_string()));
    }
    request.source.validate()?;

    let config = SyncConfig::new(
        project_id,
        SourceBase {
            credentials_ref: request.credentials_ref.trim().to_string(),
            active: request.active,
            cadence: request.cadence,
        },
        request.source,
        request.mapping,
    );
    db::configs::save_config(&state.db, &config).await?;

    if let Some(creds) = request.credentials {
        let credentials = Credentials {
            access_token: creds.access_token,
            refresh_token: creds.refresh_token,
            expires_at: creds.expires_at,
        };
        db::credentials::store_credentials(&state.db, &config.base.credentials_ref, &credentials).await?;
    }

    info!(
        project_id = %project_id,
        source = %kind,
        config_id = %config.config_id,
        "Saved source config"
    );
    Ok(Json(config))
}

/// GET /projects/:project_id/sources
pub async fn list_sources(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<ListSourcesQuery>,
) -> ApiResult<Json<Vec<SyncConfig>>> {
    let configs = if query.history {
        db::configs::config_history(&state.db, project_id).await?
    } else {
        db::configs::active_configs(&state.db, project_id).await?
    };
    Ok(Json(configs))
}

pub fn source_routes() -> Router<AppState> {
    Router::new()
        .route("/projects/:project_id/sources", get(list_sources))
        .route("/projects/:project_id/sources/:kind", put(save_source))
}
