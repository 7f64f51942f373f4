//! Daily aggregate rows
//!
//! Upsert key: `(project_id, date, source)`. Replaying a sync overwrites the
//! row in place.

use super::{date_text, parse_date, parse_timestamp, parse_uuid, retry::retry_on_lock, timestamp_text, LOCK_WAIT_MS};
use crate::models::{DailyMetricRecord, MetricSet, SourceKind};
use chrono::NaiveDate;
use mdash_common::{Error, Result};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Date and source filters for metric queries (all optional)
#[derive(Debug, Clone, Default)]
pub struct RangeFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub source: Option<SourceKind>,
}

impl RangeFilter {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            source: None,
        }
    }

    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.source = Some(source);
        self
    }
}

pub async fn upsert_daily<'e, E>(executor: E, record: &DailyMetricRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let metrics: BTreeMap<String, f64> = record.metrics.values().clone();
    sqlx::query(
        r#"
        INSERT INTO daily_metrics (project_id, date, source, metrics, extra, user_id, synced_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, date, source) DO UPDATE SET
            metrics = excluded.metrics,
            extra = excluded.extra,
            user_id = excluded.user_id,
            synced_at = excluded.synced_at
        "#,
    )
    .bind(record.project_id.to_string())
    .bind(date_text(record.date))
    .bind(record.source.as_str())
    .bind(serde_json::to_string(&metrics)?)
    .bind(serde_json::to_string(&record.extra)?)
    .bind(&record.user_id)
    .bind(timestamp_text(record.synced_at))
    .execute(executor)
    .await?;
    Ok(())
}

/// Upsert a batch in one transaction, retrying on lock contention
pub async fn upsert_daily_batch(pool: &SqlitePool, records: &[DailyMetricRecord]) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    retry_on_lock("daily metrics upsert", LOCK_WAIT_MS, || async move {
        let mut tx = pool.begin().await?;
        for record in records {
            upsert_daily(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(records.len())
    })
    .await
}

fn row_to_record(row: &SqliteRow) -> Result<DailyMetricRecord> {
    let project_id: String = row.try_get("project_id")?;
    let date: String = row.try_get("date")?;
    let source: String = row.try_get("source")?;
    let metrics: String = row.try_get("metrics")?;
    let extra: String = row.try_get("extra")?;
    let synced_at: String = row.try_get("synced_at")?;

    let values: BTreeMap<String, f64> = serde_json::from_str(&metrics)?;
    let extra: Map<String, Value> = serde_json::from_str(&extra)?;

    Ok(DailyMetricRecord {
        project_id: parse_uuid(&project_id)?,
        date: parse_date(&date)?,
        source: source.parse().map_err(Error::Internal)?,
        metrics: MetricSet::from(values),
        extra,
        user_id: row.try_get("user_id")?,
        synced_at: parse_timestamp(&synced_at)?,
    })
}

/// Rows for a project in (date, source) order
pub async fn query_daily(pool: &SqlitePool, project_id: Uuid, filter: &RangeFilter) -> Result<Vec<DailyMetricRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT project_id, date, source, metrics, extra, user_id, synced_at
        FROM daily_metrics
        WHERE project_id = ?1
          AND (?2 IS NULL OR date >= ?2)
          AND (?3 IS NULL OR date <= ?3)
          AND (?4 IS NULL OR source = ?4)
        ORDER BY date, source
        "#,
    )
    .bind(project_id.to_string())
    .bind(filter.start.map(date_text))
    .bind(filter.end.map(date_text))
    .bind(filter.source.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

/// All rows for a project, on an open connection
pub async fn all_daily(conn: &mut SqliteConnection, project_id: Uuid) -> Result<Vec<DailyMetricRecord>> {
    let rows = sqlx::query(
        "SELECT project_id, date, source, metrics, extra, user_id, synced_at
         FROM daily_metrics WHERE project_id = ? ORDER BY date, source",
    )
    .bind(project_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(row_to_record).collect()
}

pub async fn count_daily<'e, E>(executor: E, project_id: Uuid) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_metrics WHERE project_id = ?")
        .bind(project_id.to_string())
        .fetch_one(executor)
        .await?;
    Ok(count)
}

pub async fn delete_daily<'e, E>(executor: E, project_id: Uuid) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM daily_metrics WHERE project_id = ?")
        .bind(project_id.to_string())
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
