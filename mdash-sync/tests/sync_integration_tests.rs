//! End-to-end sync runs against scripted adapters and a file-backed database

mod helpers;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use helpers::*;
use mdash_common::config::SyncConfigSection;
use mdash_common::events::SyncStatus;
use mdash_sync::adapters::SourceAdapter;
use mdash_sync::db;
use mdash_sync::db::metrics::RangeFilter;
use mdash_sync::error::SyncError;
use mdash_sync::models::{FieldMapping, RawRecord, SourceKind, StorageMode, SyncTrigger};
use mdash_sync::services::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_source_is_part_of_daily_key() {
    let (_dir, pool) = test_db().await;
    let project = Uuid::new_v4();
    configure(&pool, project, SourceKind::Sheet, FieldMapping::default()).await;
    configure(&pool, project, SourceKind::Ads, FieldMapping::default()).await;

    let sheet = Arc::new(ScriptedAdapter::fixed(
        SourceKind::Sheet,
        vec![row(day(1), 0, &[("amount_spent", 100.0)])],
    ));
    let ads = Arc::new(ScriptedAdapter::fixed(
        SourceKind::Ads,
        vec![row(day(1), 0, &[("spend", 50.0)]), row(day(1), 1, &[("spend", 30.0)])],
    ));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![sheet.clone(), ads.clone()];
    let harness = Harness::new(pool.clone(), adapters, fast_settings(30));

    let report = harness
        .orchestrator
        .sync_project(project, day(1), day(1), SyncTrigger::Manual)
        .await
        .expect("sync");
    assert_eq!(report.status, SyncStatus::Success);

    let rows = db::metrics::query_daily(&pool, project, &RangeFilter::between(day(1), day(1)))
        .await
        .expect("query");
    assert_eq!(rows.len(), 2);

    let sheet_row = rows.iter().find(|r| r.source == SourceKind::Sheet).expect("sheet row");
    let ads_row = rows.iter().find(|r| r.source == SourceKind::Ads).expect("ads row");
    assert_eq!(sheet_row.metric("amount_spent"), Some(100.0));
    assert_eq!(ads_row.metric("spend"), Some(80.0));
    assert_eq!(ads_row.user_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn test_replaying_sync_overwrites_rows() {
    let (_dir, pool) = test_db().await;
    let project = Uuid::new_v4();
    configure(&pool, project, SourceKind::Ads, FieldMapping::default()).await;

    let ads = Arc::new(ScriptedAdapter::fixed(
        SourceKind::Ads,
        (1..=5).map(|d| row(day(d), 0, &[("spend", d as f64)])).collect(),
    ));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![ads.clone()];
    let harness = Harness::new(pool.clone(), adapters, fast_settings(30));

    for _ in 0..2 {
        harness
            .orchestrator
            .sync_project(project, day(1), day(5), SyncTrigger::Manual)
            .await
            .expect("sync");
    }

    assert_eq!(db::metrics::count_daily(&pool, project).await.expect("count"), 5);
    let rows = db::metrics::query_daily(&pool, project, &RangeFilter::between(day(1), day(5)))
        .await
        .expect("query");
    let total: f64 = rows.iter().filter_map(|r| r.metric("spend")).sum();
    assert_eq!(total, 15.0);

    let runs = db::runs::recent_runs(&pool, project, 10).await.expect("runs");
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.trigger == SyncTrigger::Manual));
}

#[tokio::test]
async fn test_long_range_is_fetched_in_three_chunks() {
    let (_dir, pool) = test_db().await;
    let project = Uuid::new_v4();
    configure(&pool, project, SourceKind::Ads, FieldMapping::default()).await;

    let start = day(1);
    let end = start + ChronoDuration::days(64);
    let ads = Arc::new(ScriptedAdapter::new(SourceKind::Ads, |from: NaiveDate, to: NaiveDate| {
        from.iter_days()
            .take_while(|d| *d <= to)
            .map(|d| row(d, 0, &[("spend", d.ordinal() as f64 * 1.25)]))
            .collect()
    }));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![ads.clone()];
    let harness = Harness::new(pool.clone(), adapters, fast_settings(30));

    let report = harness
        .orchestrator
        .sync_project(project, start, end, SyncTrigger::Manual)
        .await
        .expect("sync");

    assert_eq!(ads.calls(), 3);
    let spans: Vec<i64> = ads
        .ranges()
        .iter()
        .map(|(from, to)| (*to - *from).num_days() + 1)
        .collect();
    assert_eq!(spans, vec![30, 30, 5]);
    assert_eq!(report.outcome(SourceKind::Ads).map(|o| o.chunks), Some(3));

    let expected: f64 = start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|d| d.ordinal() as f64 * 1.25)
        .sum();
    let rows = db::metrics::query_daily(&pool, project, &RangeFilter::between(start, end))
        .await
        .expect("query");
    assert_eq!(rows.len(), 65);
    let stored: f64 = rows.iter().filter_map(|r| r.metric("spend")).sum();
    assert_eq!(stored, expected);
}

#[tokio::test]
async fn test_failed_source_does_not_discard_others() {
    let (_dir, pool) = test_db().await;
    let project = Uuid::new_v4();
    for kind in SourceKind::ALL {
        configure(&pool, project, kind, FieldMapping::default()).await;
    }

    let sheet = Arc::new(ScriptedAdapter::fixed(
        SourceKind::Sheet,
        vec![row(day(2), 0, &[("leads", 4.0)])],
    ));
    let ads = Arc::new(ScriptedAdapter::fixed(
        SourceKind::Ads,
        vec![row(day(2), 0, &[("clicks", 12.0)])],
    ));
    let crm = Arc::new(ScriptedAdapter::failing(SourceKind::Crm, || {
        SyncError::Auth("refresh token revoked".to_string())
    }));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![sheet, ads, crm];
    let harness = Harness::new(pool.clone(), adapters, fast_settings(30));

    let report = harness
        .orchestrator
        .sync_project(project, day(1), day(3), SyncTrigger::Manual)
        .await
        .expect("sync");

    assert_eq!(report.status, SyncStatus::PartialSuccess);
    assert_eq!(report.failed_sources(), vec![SourceKind::Crm]);
    let crm_outcome = report.outcome(SourceKind::Crm).expect("crm outcome");
    assert_eq!(crm_outcome.error_kind.as_deref(), Some("auth_error"));
    assert_eq!(db::metrics::count_daily(&pool, project).await.expect("count"), 2);

    let statuses = db::status::project_status(&pool, project).await.expect("status");
    assert_eq!(statuses.len(), 3);
    let crm_status = statuses
        .iter()
        .find(|s| s.source == SourceKind::Crm)
        .expect("crm status");
    assert_eq!(crm_status.status, SyncStatus::Error);
    assert!(crm_status.message.as_deref().unwrap_or_default().contains("revoked"));
    assert!(crm_status.last_success_at.is_none());
    let sheet_status = statuses
        .iter()
        .find(|s| s.source == SourceKind::Sheet)
        .expect("sheet status");
    assert_eq!(sheet_status.status, SyncStatus::Success);
    assert!(sheet_status.last_success_at.is_some());
}

#[tokio::test]
async fn test_second_concurrent_sync_is_rejected() {
    let (_dir, pool) = test_db().await;
    let project = Uuid::new_v4();
    configure(&pool, project, SourceKind::Ads, FieldMapping::default()).await;

    let ads = Arc::new(
        ScriptedAdapter::fixed(SourceKind::Ads, vec![row(day(1), 0, &[("spend", 1.0)])])
            .with_delay(Duration::from_millis(200)),
    );
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![ads];
    let harness = Harness::new(pool.clone(), adapters, fast_settings(30));

    let first = harness
        .orchestrator
        .sync_project(project, day(1), day(1), SyncTrigger::Manual);
    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness
            .orchestrator
            .sync_project(project, day(1), day(1), SyncTrigger::Manual)
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::AlreadyRunning { .. })));
    assert!(!harness.orchestrator.is_running(project));
}

#[tokio::test]
async fn test_individual_mode_reports_rows_without_id() {
    let (_dir, pool) = test_db().await;
    let project = Uuid::new_v4();
    db::projects::set_storage_mode(&pool, project, StorageMode::IndividualRecords)
        .await
        .expect("mode");
    let mapping = FieldMapping {
        unique_id_field: Some("id".to_string()),
        amount_field: Some("value".to_string()),
        record_type: Some("lead".to_string()),
        ..Default::default()
    };
    configure(&pool, project, SourceKind::Sheet, mapping).await;

    let rows = vec![
        RawRecord::new(day(1), 0).with_field("id", "L-1").with_field("value", 10.0),
        RawRecord::new(day(1), 1).with_field("value", 5.0),
        RawRecord::new(day(2), 2).with_field("id", "L-2").with_field("value", 7.5),
    ];
    let sheet = Arc::new(ScriptedAdapter::fixed(SourceKind::Sheet, rows));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![sheet];
    let harness = Harness::new(pool.clone(), adapters, fast_settings(30));

    let report = harness
        .orchestrator
        .sync_project(project, day(1), day(2), SyncTrigger::Manual)
        .await
        .expect("sync");

    let outcome = report.outcome(SourceKind::Sheet).expect("outcome");
    assert_eq!(outcome.status, SyncStatus::Success);
    assert_eq!(outcome.invalid_rows, vec![1]);
    assert_eq!(outcome.rows_written, 2);
    assert!(outcome.message.is_some());

    let records = db::records::query_individual(&pool, project, &RangeFilter::between(day(1), day(2)))
        .await
        .expect("records");
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.record_type == "lead"));
    assert_eq!(db::metrics::count_daily(&pool, project).await.expect("count"), 0);
}

#[tokio::test]
async fn test_scheduled_syncs_reuse_cache_and_manual_clears_it() {
    let (_dir, pool) = test_db().await;
    let project = Uuid::new_v4();
    configure(&pool, project, SourceKind::Ads, FieldMapping::default()).await;

    let ads = Arc::new(ScriptedAdapter::fixed(
        SourceKind::Ads,
        vec![row(day(1), 0, &[("spend", 3.0)])],
    ));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![ads.clone()];
    let harness = Harness::new(pool.clone(), adapters, fast_settings(30));

    for _ in 0..3 {
        harness
            .orchestrator
            .sync_project(project, day(1), day(1), SyncTrigger::Scheduled)
            .await
            .expect("scheduled sync");
    }
    assert_eq!(ads.calls(), 1);
    let stats = harness.orchestrator.cache().stats().await;
    assert_eq!((stats.hits, stats.misses), (2, 1));

    harness
        .orchestrator
        .sync_project(project, day(1), day(1), SyncTrigger::Manual)
        .await
        .expect("manual sync");
    assert_eq!(ads.calls(), 2);
}

#[tokio::test]
async fn test_scheduler_runs_only_due_sources() {
    let (_dir, pool) = test_db().await;
    let project = Uuid::new_v4();
    configure(&pool, project, SourceKind::Ads, FieldMapping::default()).await;
    let mut manual = configure(&pool, project, SourceKind::Sheet, FieldMapping::default()).await;
    manual.config_id = Uuid::new_v4();
    manual.base.cadence = mdash_sync::models::SyncCadence::Manual;
    db::configs::save_config(&pool, &manual).await.expect("save");

    let today = Utc::now().date_naive();
    let ads = Arc::new(ScriptedAdapter::fixed(
        SourceKind::Ads,
        vec![row(today, 0, &[("spend", 9.0)])],
    ));
    let sheet = Arc::new(ScriptedAdapter::fixed(SourceKind::Sheet, Vec::new()));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![ads.clone(), sheet.clone()];
    let harness = Harness::new(pool.clone(), adapters, fast_settings(30));
    let scheduler = Scheduler::new(pool.clone(), harness.orchestrator.clone(), &SyncConfigSection::default());

    let now = Utc::now();
    let reports = scheduler.run_once(now).await.expect("tick");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].trigger, SyncTrigger::Scheduled);
    assert_eq!(ads.calls(), 1);
    assert_eq!(sheet.calls(), 0);

    // Ads was just synced and is not due again within the day
    let reports = scheduler.run_once(now + ChronoDuration::minutes(5)).await.expect("tick");
    assert!(reports.is_empty());
    assert!(db::settings::get_scheduler_last_tick(&pool).await.expect("tick").is_some());
}
