//! Shared fixtures for mdash-sync integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use mdash_common::events::EventBus;
use mdash_sync::adapters::{AdapterRegistry, RawCache, SourceAdapter};
use mdash_sync::error::SyncError;
use mdash_sync::models::{
    AdsSourceConfig, CrmSourceConfig, FieldMapping, RawRecord, SheetSourceConfig, SourceBase,
    SourceConfig, SourceKind, SyncCadence, SyncConfig,
};
use mdash_sync::services::{
    CacheSettings, ModeMigrationManager, StaticIdentity, SyncOrchestrator, SyncSettings,
};
use mdash_sync::AppState;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).expect("valid day")
}

/// File-backed database in a temp dir; keep the dir alive for the test
pub async fn test_db() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("temp dir");
    let pool = mdash_common::db::init_database(&dir.path().join("mdash.db"))
        .await
        .expect("init database");
    (dir, pool)
}

type RowFn = dyn Fn(NaiveDate, NaiveDate) -> Vec<RawRecord> + Send + Sync;

/// In-process adapter returning scripted rows and recording each call
pub struct ScriptedAdapter {
    kind: SourceKind,
    rows: Box<RowFn>,
    failure: Mutex<Option<fn() -> SyncError>>,
    delay: Duration,
    calls: AtomicUsize,
    ranges: Mutex<Vec<(NaiveDate, NaiveDate)>>,
}

impl ScriptedAdapter {
    pub fn new<F>(kind: SourceKind, rows: F) -> Self
    where
        F: Fn(NaiveDate, NaiveDate) -> Vec<RawRecord> + Send + Sync + 'static,
    {
        Self {
            kind,
            rows: Box::new(rows),
            failure: Mutex::new(None),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
        }
    }

    /// Fixed rows, filtered to the requested range
    pub fn fixed(kind: SourceKind, rows: Vec<RawRecord>) -> Self {
        Self::new(kind, move |start, end| {
            rows.iter()
                .filter(|r| r.date >= start && r.date <= end)
                .cloned()
                .collect()
        })
    }

    pub fn failing(kind: SourceKind, failure: fn() -> SyncError) -> Self {
        let adapter = Self::new(kind, |_, _| Vec::new());
        *adapter.failure.lock().expect("lock") = Some(failure);
        adapter
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn ranges(&self) -> Vec<(NaiveDate, NaiveDate)> {
        let mut ranges = self.ranges.lock().expect("lock").clone();
        ranges.sort();
        ranges
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_range(
        &self,
        _config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ranges.lock().expect("lock").push((start, end));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = *self.failure.lock().expect("lock");
        if let Some(failure) = failure {
            return Err(failure());
        }
        Ok((self.rows)(start, end))
    }
}

/// One raw row with numeric fields
pub fn row(date: NaiveDate, index: usize, fields: &[(&str, f64)]) -> RawRecord {
    fields
        .iter()
        .fold(RawRecord::new(date, index), |r, (name, value)| r.with_field(*name, *value))
}

pub fn source_config(kind: SourceKind) -> SourceConfig {
    match kind {
        SourceKind::Sheet => SourceConfig::Sheet(SheetSourceConfig {
            spreadsheet_id: "sheet-1".to_string(),
            sheet_name: "Daily".to_string(),
            range: None,
            date_column: "date".to_string(),
        }),
        SourceKind::Ads => SourceConfig::Ads(AdsSourceConfig {
            account_id: "1234567".to_string(),
            level: "account".to_string(),
            fields: Vec::new(),
        }),
        SourceKind::Crm => SourceConfig::Crm(CrmSourceConfig {
            location_id: "loc-1".to_string(),
            calendar_id: None,
            pipeline_id: None,
            include_appointments: true,
            include_opportunities: true,
        }),
    }
}

pub async fn configure(pool: &SqlitePool, project_id: Uuid, kind: SourceKind, mapping: FieldMapping) -> SyncConfig {
    let config = SyncConfig::new(
        project_id,
        SourceBase {
            credentials_ref: format!("{}-creds", kind),
            active: true,
            cadence: SyncCadence::Daily,
        },
        source_config(kind),
        mapping,
    );
    mdash_sync::db::configs::save_config(pool, &config)
        .await
        .expect("save config");
    config
}

pub struct Harness {
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub migrations: Arc<ModeMigrationManager>,
}

impl Harness {
    pub fn new(pool: SqlitePool, adapters: Vec<Arc<dyn SourceAdapter>>, settings: SyncSettings) -> Self {
        let event_bus = EventBus::new(256);
        let registry = adapters
            .into_iter()
            .fold(AdapterRegistry::new(), |registry, adapter| registry.with(adapter));
        let cache = Arc::new(RawCache::new(CacheSettings::default()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            pool.clone(),
            registry,
            cache,
            event_bus.clone(),
            Arc::new(StaticIdentity::new(Some("user-1".to_string()))),
            settings,
        ));
        let migrations = Arc::new(ModeMigrationManager::new(pool.clone(), event_bus.clone()));
        Self {
            pool,
            event_bus,
            orchestrator,
            migrations,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.pool.clone(),
            self.event_bus.clone(),
            self.orchestrator.clone(),
            self.migrations.clone(),
        )
    }
}

pub fn fast_settings(max_chunk_days: u32) -> SyncSettings {
    SyncSettings {
        max_chunk_days,
        chunk_stagger: Duration::ZERO,
    }
}
