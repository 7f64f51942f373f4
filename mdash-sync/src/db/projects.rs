//! Per-project storage mode

use crate::models::StorageMode;
use mdash_common::{Error, Result};
use sqlx::{Executor, Sqlite};
use uuid::Uuid;

/// Stored mode, `DailyAggregate` for unknown projects
pub async fn get_storage_mode<'e, E>(executor: E, project_id: Uuid) -> Result<StorageMode>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mode: Option<String> = sqlx::query_scalar("SELECT storage_mode FROM projects WHERE project_id = ?")
        .bind(project_id.to_string())
        .fetch_optional(executor)
        .await?;

    match mode {
        Some(mode) => mode.parse().map_err(Error::Internal),
        None => Ok(StorageMode::default()),
    }
}

pub async fn set_storage_mode<'e, E>(executor: E, project_id: Uuid, mode: StorageMode) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO projects (project_id, storage_mode, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(project_id) DO UPDATE SET
            storage_mode = excluded.storage_mode,
            updated_at = excluded.updated_at",
    )
    .bind(project_id.to_string())
    .bind(mode.as_str())
    .execute(executor)
    .await?;
    Ok(())
}
