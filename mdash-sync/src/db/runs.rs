//! Sync run history

use super::{date_text, parse_date, parse_optional_timestamp, parse_timestamp, parse_uuid, timestamp_text};
use crate::models::{SourceOutcome, SyncReport, SyncTrigger};
use mdash_common::events::SyncStatus;
use mdash_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert or update a run row (written at start and again at finish)
pub async fn save_run(pool: &SqlitePool, report: &SyncReport) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_runs
            (run_id, project_id, trigger, range_start, range_end, status, outcomes, rows_written, started_at, finished_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id) DO UPDATE SET
            status = excluded.status,
            outcomes = excluded.outcomes,
            rows_written = excluded.rows_written,
            finished_at = excluded.finished_at
        "#,
    )
    .bind(report.run_id.to_string())
    .bind(report.project_id.to_string())
    .bind(report.trigger.as_str())
    .bind(date_text(report.range_start))
    .bind(date_text(report.range_end))
    .bind(report.status.as_str())
    .bind(serde_json::to_string(&report.outcomes)?)
    .bind(report.rows_written as i64)
    .bind(timestamp_text(report.started_at))
    .bind(report.finished_at.map(timestamp_text))
    .execute(pool)
    .await?;
    Ok(())
}

fn row_to_report(row: &SqliteRow) -> Result<SyncReport> {
    let run_id: String = row.try_get("run_id")?;
    let project_id: String = row.try_get("project_id")?;
    let trigger: String = row.try_get("trigger")?;
    let range_start: String = row.try_get("range_start")?;
    let range_end: String = row.try_get("range_end")?;
    let status: String = row.try_get("status")?;
    let outcomes: String = row.try_get("outcomes")?;
    let rows_written: i64 = row.try_get("rows_written")?;
    let started_at: String = row.try_get("started_at")?;

    let trigger = match trigger.as_str() {
        "manual" => SyncTrigger::Manual,
        "scheduled" => SyncTrigger::Scheduled,
        other => return Err(Error::Internal(format!("Unknown sync trigger '{}'", other))),
    };
    let outcomes: Vec<SourceOutcome> = serde_json::from_str(&outcomes)?;

    Ok(SyncReport {
        run_id: parse_uuid(&run_id)?,
        project_id: parse_uuid(&project_id)?,
        trigger,
        range_start: parse_date(&range_start)?,
        range_end: parse_date(&range_end)?,
        status: SyncStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown sync status '{}'", status)))?,
        outcomes,
        rows_written: rows_written.max(0) as usize,
        started_at: parse_timestamp(&started_at)?,
        finished_at: parse_optional_timestamp(row.try_get("finished_at")?)?,
    })
}

/// Most recent runs first
pub async fn recent_runs(pool: &SqlitePool, project_id: Uuid, limit: u32) -> Result<Vec<SyncReport>> {
    let rows = sqlx::query(
        "SELECT run_id, project_id, trigger, range_start, range_end, status, outcomes, rows_written,
                started_at, finished_at
         FROM sync_runs WHERE project_id = ? ORDER BY started_at DESC LIMIT ?",
    )
    .bind(project_id.to_string())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_report).collect()
}
