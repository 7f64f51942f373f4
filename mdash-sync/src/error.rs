//! Error types for mdash-sync
//!
//! [`SyncError`] is the engine taxonomy recorded against a source during a
//! sync. [`ApiError`] is what HTTP handlers return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mdash_common::redaction;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid mapping, account id or credentials. Not retryable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Expired or invalid token (after one refresh attempt)
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Source reported throttling
    #[error("Rate limited by source{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Connectivity failure, timeout or 5xx. Retried on the next trigger.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// Normalization-time data problems, with every offending row index
    #[error("Validation failed: {message} (rows: {rows:?})")]
    Validation { message: String, rows: Vec<usize> },

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] mdash_common::Error),

    /// A sync for the project is already in flight
    #[error("Sync already running for project {project_id}")]
    AlreadyRunning { project_id: Uuid },
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Storage(mdash_common::Error::Database(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Storage(mdash_common::Error::from(err))
    }
}

impl SyncError {
    /// Machine-checkable error code persisted in `sync_status.error_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Config(_) => "config_error",
            SyncError::Auth(_) => "auth_error",
            SyncError::RateLimited { .. } => "rate_limit_error",
            SyncError::TransientNetwork(_) => "transient_network_error",
            SyncError::Validation { .. } => "validation_error",
            SyncError::Storage(_) => "storage_error",
            SyncError::AlreadyRunning { .. } => "sync_in_progress",
        }
    }

    /// Whether a later trigger may succeed without user action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimited { .. } | SyncError::TransientNetwork(_)
        )
    }

    /// Short, redacted message safe for persisted status fields
    pub fn user_message(&self) -> String {
        redaction::status_message(&self.to_string())
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., sync already running for the project
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Engine error
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// mdash-common error
    #[error("Common error: {0}")]
    Common(#[from] mdash_common::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Common(mdash_common::Error::Database(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                redaction::status_message(&msg),
            ),
            ApiError::Sync(SyncError::Storage(mdash_common::Error::NotFound(msg))) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Sync(ref err) => {
                let status = match err {
                    SyncError::Config(_) => StatusCode::BAD_REQUEST,
                    SyncError::Auth(_) | SyncError::TransientNetwork(_) => StatusCode::BAD_GATEWAY,
                    SyncError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                    SyncError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    SyncError::AlreadyRunning { .. } => StatusCode::CONFLICT,
                };
                (status, err.kind(), err.user_message())
            }
            ApiError::Common(ref err) => {
                let (status, code) = match err {
                    mdash_common::Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    mdash_common::Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
                };
                (status, code, redaction::status_message(&err.to_string()))
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
