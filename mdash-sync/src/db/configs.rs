//! Sync configurations
//!
//! At most one active config per (project, source). Saving an active config
//! deactivates the previous one in the same transaction; inactive rows are
//! kept as history.

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, timestamp_text};
use crate::models::{FieldMapping, SourceBase, SourceConfig, SourceKind, SyncCadence, SyncConfig};
use chrono::{DateTime, Utc};
use mdash_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT config_id, project_id, source, credentials_ref, source_settings, mapping,
        active, cadence, last_synced_at, created_at, updated_at FROM sync_configs";

/// Insert or replace `config`, deactivating any other active config for the pair
pub async fn save_config(pool: &SqlitePool, config: &SyncConfig) -> Result<()> {
    let mut tx = pool.begin().await?;

    if config.base.active {
        let replaced = sqlx::query(
            "UPDATE sync_configs SET active = 0, updated_at = ?
             WHERE project_id = ? AND source = ? AND active = 1 AND config_id != ?",
        )
        .bind(timestamp_text(config.updated_at))
        .bind(config.project_id.to_string())
        .bind(config.kind().as_str())
        .bind(config.config_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if replaced > 0 {
            tracing::info!(
                project_id = %config.project_id,
                source = %config.kind(),
                "Replaced active sync config"
            );
        }
    }

    sqlx::query(
        r#"
        INSERT INTO sync_configs
            (config_id, project_id, source, credentials_ref, source_settings, mapping,
             active, cadence, last_synced_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(config_id) DO UPDATE SET
            credentials_ref = excluded.credentials_ref,
            source_settings = excluded.source_settings,
            mapping = excluded.mapping,
            active = excluded.active,
            cadence = excluded.cadence,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(config.config_id.to_string())
    .bind(config.project_id.to_string())
    .bind(config.kind().as_str())
    .bind(&config.base.credentials_ref)
    .bind(serde_json::to_string(&config.source)?)
    .bind(serde_json::to_string(&config.mapping)?)
    .bind(config.base.active)
    .bind(config.base.cadence.as_str())
    .bind(config.last_synced_at.map(timestamp_text))
    .bind(timestamp_text(config.created_at))
    .bind(timestamp_text(config.updated_at))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

fn row_to_config(row: &SqliteRow) -> Result<SyncConfig> {
    let config_id: String = row.try_get("config_id")?;
    let project_id: String = row.try_get("project_id")?;
    let settings: String = row.try_get("source_settings")?;
    let mapping: String = row.try_get("mapping")?;
    let cadence: String = row.try_get("cadence")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let source: SourceConfig = serde_json::from_str(&settings)?;
    let mapping: FieldMapping = serde_json::from_str(&mapping)?;
    let cadence = SyncCadence::parse(&cadence)
        .ok_or_else(|| Error::Internal(format!("Unknown cadence '{}'", cadence)))?;

    Ok(SyncConfig {
        config_id: parse_uuid(&config_id)?,
        project_id: parse_uuid(&project_id)?,
        base: SourceBase {
            credentials_ref: row.try_get("credentials_ref")?,
            active: row.try_get("active")?,
            cadence,
        },
        source,
        mapping,
        last_synced_at: parse_optional_timestamp(row.try_get("last_synced_at")?)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Active configs for a project, ordered by source
pub async fn active_configs(pool: &SqlitePool, project_id: Uuid) -> Result<Vec<SyncConfig>> {
    let sql = format!("{} WHERE project_id = ? AND active = 1 ORDER BY source", SELECT_COLUMNS);
    let rows = sqlx::query(&sql)
        .bind(project_id.to_string())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_config).collect()
}

pub async fn active_config(pool: &SqlitePool, project_id: Uuid, source: SourceKind) -> Result<Option<SyncConfig>> {
    let sql = format!("{} WHERE project_id = ? AND source = ? AND active = 1", SELECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(project_id.to_string())
        .bind(source.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_config).transpose()
}

/// Every active config across projects (scheduler input)
pub async fn all_active_configs(pool: &SqlitePool) -> Result<Vec<SyncConfig>> {
    let sql = format!("{} WHERE active = 1 ORDER BY project_id, source", SELECT_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(row_to_config).collect()
}

/// Every config of a project including replaced ones, newest first
pub async fn config_history(pool: &SqlitePool, project_id: Uuid) -> Result<Vec<SyncConfig>> {
    let sql = format!(
        "{} WHERE project_id = ? ORDER BY source, active DESC, updated_at DESC",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(project_id.to_string())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_config).collect()
}

pub async fn mark_synced(pool: &SqlitePool, config_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE sync_configs SET last_synced_at = ? WHERE config_id = ?")
        .bind(timestamp_text(at))
        .bind(config_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}
