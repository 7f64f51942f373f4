//! Key-value settings

use chrono::{DateTime, Utc};
use mdash_common::{Error, Result};
use sqlx::SqlitePool;

const SCHEDULER_LAST_TICK: &str = "scheduler_last_tick_at";

/// When the scheduler last ran a tick
pub async fn get_scheduler_last_tick(db: &SqlitePool) -> Result<Option<DateTime<Utc>>> {
    get_setting::<String>(db, SCHEDULER_LAST_TICK)
        .await?
        .map(|v| super::parse_timestamp(&v))
        .transpose()
}

pub async fn set_scheduler_last_tick(db: &SqlitePool, at: DateTime<Utc>) -> Result<()> {
    set_setting(db, SCHEDULER_LAST_TICK, super::timestamp_text(at)).await
}

pub async fn get_setting<T>(db: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((value,)) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e))),
        None => Ok(None),
    }
}

pub async fn set_setting<T>(db: &SqlitePool, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdash_common::db::init_memory_database;

    async fn setup() -> SqlitePool {
        init_memory_database().await.unwrap()
    }

    #[tokio::test]
    async fn test_setting_roundtrip_and_overwrite() {
        let pool = setup().await;
        assert_eq!(get_setting::<u32>(&pool, "k").await.unwrap(), None);
        set_setting(&pool, "k", 5).await.unwrap();
        set_setting(&pool, "k", 6).await.unwrap();
        assert_eq!(get_setting::<u32>(&pool, "k").await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_unparseable_setting_errors() {
        let pool = setup().await;
        set_setting(&pool, "k", "abc").await.unwrap();
        assert!(get_setting::<u32>(&pool, "k").await.is_err());
    }

    #[tokio::test]
    async fn test_scheduler_tick() {
        let pool = setup().await;
        let at = Utc::now();
        set_scheduler_last_tick(&pool, at).await.unwrap();
        let back = get_scheduler_last_tick(&pool).await.unwrap().unwrap();
        assert_eq!(back.timestamp_millis(), at.timestamp_millis());
    }
}
