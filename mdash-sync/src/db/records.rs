//! Individual record rows
//!
//! Upsert key: `(project_id, unique_id)`. A record with a known unique id
//! overwrites the stored row.

use super::metrics::RangeFilter;
use super::{date_text, parse_date, parse_timestamp, parse_uuid, retry::retry_on_lock, timestamp_text, LOCK_WAIT_MS};
use crate::models::IndividualRecord;
use mdash_common::{Error, Result};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

pub async fn upsert_individual<'e, E>(executor: E, record: &IndividualRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO individual_records
            (project_id, date, unique_id, source, record_type, amount, status, extra, user_id, synced_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, unique_id) DO UPDATE SET
            date = excluded.date,
            source = excluded.source,
            record_type = excluded.record_type,
            amount = excluded.amount,
            status = excluded.status,
            extra = excluded.extra,
            user_id = excluded.user_id,
            synced_at = excluded.synced_at
        "#,
    )
    .bind(record.project_id.to_string())
    .bind(date_text(record.date))
    .bind(&record.unique_id)
    .bind(record.source.as_str())
    .bind(&record.record_type)
    .bind(record.amount)
    .bind(&record.status)
    .bind(serde_json::to_string(&record.extra)?)
    .bind(&record.user_id)
    .bind(timestamp_text(record.synced_at))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn upsert_individual_batch(pool: &SqlitePool, records: &[IndividualRecord]) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    retry_on_lock("individual records upsert", LOCK_WAIT_MS, || async move {
        let mut tx = pool.begin().await?;
        for record in records {
            upsert_individual(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(records.len())
    })
    .await
}

fn row_to_record(row: &SqliteRow) -> Result<IndividualRecord> {
    let project_id: String = row.try_get("project_id")?;
    let date: String = row.try_get("date")?;
    let source: String = row.try_get("source")?;
    let extra: String = row.try_get("extra")?;
    let synced_at: String = row.try_get("synced_at")?;
    let extra: Map<String, Value> = serde_json::from_str(&extra)?;

    Ok(IndividualRecord {
        project_id: parse_uuid(&project_id)?,
        date: parse_date(&date)?,
        unique_id: row.try_get("unique_id")?,
        source: source.parse().map_err(Error::Internal)?,
        record_type: row.try_get("record_type")?,
        amount: row.try_get("amount")?,
        status: row.try_get("status")?,
        extra,
        user_id: row.try_get("user_id")?,
        synced_at: parse_timestamp(&synced_at)?,
    })
}

const SELECT_COLUMNS: &str =
    "SELECT project_id, date, unique_id, source, record_type, amount, status, extra, user_id, synced_at";

/// Records for a project in (date, unique_id) order
pub async fn query_individual(pool: &SqlitePool, project_id: Uuid, filter: &RangeFilter) -> Result<Vec<IndividualRecord>> {
    let sql = format!(
        "{} FROM individual_records
         WHERE project_id = ?1
           AND (?2 IS NULL OR date >= ?2)
           AND (?3 IS NULL OR date <= ?3)
           AND (?4 IS NULL OR source = ?4)
         ORDER BY date, unique_id",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(project_id.to_string())
        .bind(filter.start.map(date_text))
        .bind(filter.end.map(date_text))
        .bind(filter.source.map(|s| s.as_str()))
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_record).collect()
}

pub async fn all_individual(conn: &mut SqliteConnection, project_id: Uuid) -> Result<Vec<IndividualRecord>> {
    let sql = format!(
        "{} FROM individual_records WHERE project_id = ? ORDER BY date, unique_id",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(project_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(row_to_record).collect()
}

pub async fn count_individual<'e, E>(executor: E, project_id: Uuid) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM individual_records WHERE project_id = ?")
        .bind(project_id.to_string())
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// Distinct record types present for a project, sorted
pub async fn record_types<'e, E>(executor: E, project_id: Uuid) -> Result<Vec<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let types: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT record_type FROM individual_records WHERE project_id = ? ORDER BY record_type",
    )
    .bind(project_id.to_string())
    .fetch_all(executor)
    .await?;
    Ok(types)
}

pub async fn delete_individual<'e, E>(executor: E, project_id: Uuid) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM individual_records WHERE project_id = ?")
        .bind(project_id.to_string())
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use chrono::{NaiveDate, Utc};
    use mdash_common::db::init_memory_database;

    fn record(project_id: Uuid, unique_id: &str, amount: f64, record_type: &str) -> IndividualRecord {
        IndividualRecord {
            project_id,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            unique_id: unique_id.to_string(),
            source: SourceKind::Sheet,
            record_type: record_type.to_string(),
            amount: Some(amount),
            status: None,
            extra: Map::new(),
            user_id: None,
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_same_unique_id_overwrites() {
        let pool = init_memory_database().await.unwrap();
        let project = Uuid::new_v4();
        upsert_individual_batch(&pool, &[record(project, "A", 10.0, "sale")]).await.unwrap();
        upsert_individual_batch(&pool, &[record(project, "A", 12.0, "sale")]).await.unwrap();

        let rows = query_individual(&pool, project, &RangeFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, Some(12.0));
    }

    #[tokio::test]
    async fn test_record_types_and_delete() {
        let pool = init_memory_database().await.unwrap();
        let project = Uuid::new_v4();
        upsert_individual_batch(
            &pool,
            &[
                record(project, "A", 1.0, "sale"),
                record(project, "B", 2.0, "lead"),
                record(project, "C", 3.0, "sale"),
            ],
        )
        .await
        .unwrap();

        assert_eq!(record_types(&pool, project).await.unwrap(), vec!["lead", "sale"]);
        assert_eq!(count_individual(&pool, project).await.unwrap(), 3);
        assert_eq!(delete_individual(&pool, project).await.unwrap(), 3);
    }
}
