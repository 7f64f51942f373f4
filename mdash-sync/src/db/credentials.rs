//! SQLite-backed credential store

use super::{parse_optional_timestamp, timestamp_text};
use crate::adapters::auth::{CredentialStore, Credentials};
use crate::error::SyncError;
use async_trait::async_trait;
use chrono::Utc;
use mdash_common::Result;
use sqlx::SqlitePool;

pub async fn load_credentials(pool: &SqlitePool, credentials_ref: &str) -> Result<Option<Credentials>> {
    let row: Option<(String, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT access_token, refresh_token, expires_at FROM source_credentials WHERE credentials_ref = ?",
    )
    .bind(credentials_ref)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((access_token, refresh_token, expires_at)) => Ok(Some(Credentials {
            access_token,
            refresh_token,
            expires_at: parse_optional_timestamp(expires_at)?,
        })),
        None => Ok(None),
    }
}

pub async fn store_credentials(pool: &SqlitePool, credentials_ref: &str, credentials: &Credentials) -> Result<()> {
    sqlx::query(
        "INSERT INTO source_credentials (credentials_ref, access_token, refresh_token, expires_at, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(credentials_ref) DO UPDATE SET
            access_token = excluded.access_token,
            refresh_token = excluded.refresh_token,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at",
    )
    .bind(credentials_ref)
    .bind(&credentials.access_token)
    .bind(&credentials.refresh_token)
    .bind(credentials.expires_at.map(timestamp_text))
    .bind(timestamp_text(Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self, credentials_ref: &str) -> std::result::Result<Option<Credentials>, SyncError> {
        Ok(load_credentials(&self.pool, credentials_ref).await?)
    }

    async fn save(&self, credentials_ref: &str, credentials: &Credentials) -> std::result::Result<(), SyncError> {
        store_credentials(&self.pool, credentials_ref, credentials).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mdash_common::db::init_memory_database;

    #[tokio::test]
    async fn test_store_save_and_load() {
        let pool = init_memory_database().await.unwrap();
        let store = SqliteCredentialStore::new(pool);
        assert!(store.load("crm").await.unwrap().is_none());

        let creds = Credentials {
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        };
        store.save("crm", &creds).await.unwrap();

        let mut rotated = creds.clone();
        rotated.access_token = "at-2".to_string();
        store.save("crm", &rotated).await.unwrap();

        let loaded = store.load("crm").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "at-2");
        assert_eq!(loaded.refresh_token.as_deref(), Some("rt-1"));
    }
}
