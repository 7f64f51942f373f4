//! Live per-source sync status
//!
//! One row per (project, source). `last_success_at` only moves when a
//! source finishes with `success`.

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, timestamp_text};
use crate::models::{SourceKind, SyncPhase};
use chrono::{DateTime, Utc};
use mdash_common::events::SyncStatus;
use mdash_common::{Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub project_id: Uuid,
    pub source: SourceKind,
    pub status: SyncStatus,
    pub phase: String,
    /// Redacted before it is stored
    pub message: Option<String>,
    pub error_kind: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Persist the phase of one source; `message` must already be redacted
pub async fn record_phase(
    pool: &SqlitePool,
    project_id: Uuid,
    source: SourceKind,
    phase: SyncPhase,
    message: Option<&str>,
    error_kind: Option<&str>,
) -> Result<()> {
    let status = phase.status();
    sqlx::query(
        r#"
        INSERT INTO sync_status (project_id, source, status, phase, message, error_kind, last_success_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, CASE WHEN ?3 = 'success' THEN ?7 END, ?7)
        ON CONFLICT(project_id, source) DO UPDATE SET
            status = excluded.status,
            phase = excluded.phase,
            message = excluded.message,
            error_kind = excluded.error_kind,
            last_success_at = CASE
                WHEN excluded.status = 'success' THEN excluded.updated_at
                ELSE sync_status.last_success_at
            END,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(project_id.to_string())
    .bind(source.as_str())
    .bind(status.as_str())
    .bind(phase.as_str())
    .bind(message)
    .bind(error_kind)
    .bind(timestamp_text(Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

fn row_to_status(row: &SqliteRow) -> Result<SourceStatus> {
    let project_id: String = row.try_get("project_id")?;
    let source: String = row.try_get("source")?;
    let status: String = row.try_get("status")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(SourceStatus {
        project_id: parse_uuid(&project_id)?,
        source: source.parse().map_err(Error::Internal)?,
        status: SyncStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown sync status '{}'", status)))?,
        phase: row.try_get("phase")?,
        message: row.try_get("message")?,
        error_kind: row.try_get("error_kind")?,
        last_success_at: parse_optional_timestamp(row.try_get("last_success_at")?)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn project_status(pool: &SqlitePool, project_id: Uuid) -> Result<Vec<SourceStatus>> {
    let rows = sqlx::query(
        "SELECT project_id, source, status, phase, message, error_kind, last_success_at, updated_at
         FROM sync_status WHERE project_id = ? ORDER BY source",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_status).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdash_common::db::init_memory_database;

    #[tokio::test]
    async fn test_last_success_survives_error() {
        let pool = init_memory_database().await.unwrap();
        let project = Uuid::new_v4();

        record_phase(&pool, project, SourceKind::Ads, SyncPhase::Fetching, None, None).await.unwrap();
        let status = project_status(&pool, project).await.unwrap();
        assert_eq!(status[0].status, SyncStatus::InProgress);
        assert!(status[0].last_success_at.is_none());

        record_phase(&pool, project, SourceKind::Ads, SyncPhase::Success, None, None).await.unwrap();
        let success_at = project_status(&pool, project).await.unwrap()[0].last_success_at;
        assert!(success_at.is_some());

        record_phase(
            &pool,
            project,
            SourceKind::Ads,
            SyncPhase::Error,
            Some("Authentication failed"),
            Some("auth_error"),
        )
        .await
        .unwrap();
        let status = project_status(&pool, project).await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].status, SyncStatus::Error);
        assert_eq!(status[0].error_kind.as_deref(), Some("auth_error"));
        assert_eq!(status[0].last_success_at, success_at);
    }
}
