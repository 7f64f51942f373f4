//! Backup snapshots
//!
//! Rows are written once and never updated.

use super::{parse_timestamp, parse_uuid, timestamp_text};
use crate::models::{BackupPayload, BackupSnapshot};
use mdash_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

pub async fn insert_backup<'e, E>(executor: E, snapshot: &BackupSnapshot, payload: &BackupPayload) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO backup_snapshots
            (backup_id, project_id, name, reason, storage_mode, row_count, payload, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(snapshot.backup_id.to_string())
    .bind(snapshot.project_id.to_string())
    .bind(&snapshot.name)
    .bind(&snapshot.reason)
    .bind(snapshot.storage_mode.as_str())
    .bind(snapshot.row_count as i64)
    .bind(serde_json::to_string(payload)?)
    .bind(timestamp_text(snapshot.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

fn row_to_snapshot(row: &SqliteRow) -> Result<BackupSnapshot> {
    let backup_id: String = row.try_get("backup_id")?;
    let project_id: String = row.try_get("project_id")?;
    let storage_mode: String = row.try_get("storage_mode")?;
    let row_count: i64 = row.try_get("row_count")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(BackupSnapshot {
        backup_id: parse_uuid(&backup_id)?,
        project_id: parse_uuid(&project_id)?,
        name: row.try_get("name")?,
        reason: row.try_get("reason")?,
        storage_mode: storage_mode.parse().map_err(Error::Internal)?,
        row_count: row_count.max(0) as usize,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Snapshots for a project, newest first (payloads not loaded)
pub async fn list_backups(pool: &SqlitePool, project_id: Uuid) -> Result<Vec<BackupSnapshot>> {
    let rows = sqlx::query(
        "SELECT backup_id, project_id, name, reason, storage_mode, row_count, created_at
         FROM backup_snapshots WHERE project_id = ? ORDER BY created_at DESC",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_snapshot).collect()
}

/// Snapshot with its rows
pub async fn get_backup(pool: &SqlitePool, backup_id: Uuid) -> Result<Option<(BackupSnapshot, BackupPayload)>> {
    let row = sqlx::query(
        "SELECT backup_id, project_id, name, reason, storage_mode, row_count, payload, created_at
         FROM backup_snapshots WHERE backup_id = ?",
    )
    .bind(backup_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let payload: String = row.try_get("payload")?;
            let payload: BackupPayload = serde_json::from_str(&payload)?;
            Ok(Some((row_to_snapshot(&row)?, payload)))
        }
        None => Ok(None),
    }
}
