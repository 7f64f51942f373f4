//! Sync orchestrator
//!
//! Runs every active source of a project through
//! `Idle -> Fetching -> Normalizing -> Upserting -> {Success | Error}`.
//! Each phase is persisted to `sync_status` and emitted on the EventBus.
//! Sources run concurrently and fail independently: one source's error is
//! recorded against that source and never discards another source's rows.
//! Manual and scheduled triggers share this path.

use crate::adapters::{AdapterRegistry, RawCache};
use crate::db;
use crate::error::SyncError;
use crate::models::{
    SourceKind, SourceOutcome, StorageMode, SyncConfig, SyncPhase, SyncReport, SyncTrigger,
};
use crate::services::chunker::RangeFetcher;
use crate::services::identity::IdentityProvider;
use crate::services::normalizer::{missing_id_error, Normalizer};
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use mdash_common::config::SyncConfigSection;
use mdash_common::events::{EventBus, SyncEvent, SyncStatus};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Chunking parameters applied to every source fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub max_chunk_days: u32,
    pub chunk_stagger: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_chunk_days: 30,
            chunk_stagger: Duration::from_millis(250),
        }
    }
}

impl From<&SyncConfigSection> for SyncSettings {
    fn from(section: &SyncConfigSection) -> Self {
        Self {
            max_chunk_days: section.max_chunk_days.max(1),
            chunk_stagger: Duration::from_millis(section.chunk_stagger_ms),
        }
    }
}

/// Marks a project busy for the lifetime of one run
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<Uuid>>,
    project_id: Uuid,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.project_id);
    }
}

pub struct SyncOrchestrator {
    db: SqlitePool,
    registry: AdapterRegistry,
    cache: Arc<RawCache>,
    event_bus: EventBus,
    identity: Arc<dyn IdentityProvider>,
    settings: SyncSettings,
    running: Mutex<HashSet<Uuid>>,
}

impl SyncOrchestrator {
    /// `registry` holds the raw adapters; they are put behind `cache` here
    pub fn new(
        db: SqlitePool,
        registry: AdapterRegistry,
        cache: Arc<RawCache>,
        event_bus: EventBus,
        identity: Arc<dyn IdentityProvider>,
        settings: SyncSettings,
    ) -> Self {
        let registry = registry.cached(cache.clone());
        Self {
            db,
            registry,
            cache,
            event_bus,
            identity,
            settings,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    pub fn cache(&self) -> &Arc<RawCache> {
        &self.cache
    }

    /// Whether a run for `project_id` is in flight
    pub fn is_running(&self, project_id: Uuid) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.contains(&project_id)
    }

    fn claim(&self, project_id: Uuid) -> Result<RunGuard<'_>, SyncError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(project_id) {
            return Err(SyncError::AlreadyRunning { project_id });
        }
        Ok(RunGuard {
            running: &self.running,
            project_id,
        })
    }

    /// Sync every active source of a project over `[start, end]`
    pub async fn sync_project(
        &self,
        project_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        trigger: SyncTrigger,
    ) -> Result<SyncReport, SyncError> {
        self.sync_sources(project_id, start, end, trigger, None).await
    }

    /// Sync the active sources of a project, optionally only `only`
    pub async fn sync_sources(
        &self,
        project_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        trigger: SyncTrigger,
        only: Option<&[SourceKind]>,
    ) -> Result<SyncReport, SyncError> {
        if end < start {
            return Err(SyncError::Config(format!(
                "invalid date range: {} is after {}",
                start, end
            )));
        }
        let _guard = self.claim(project_id)?;

        let configs: Vec<SyncConfig> = db::configs::active_configs(&self.db, project_id)
            .await?
            .into_iter()
            .filter(|c| only.map_or(true, |kinds| kinds.contains(&c.kind())))
            .collect();
        if configs.is_empty() {
            return Err(SyncError::Config(
                "no active sources configured for project".to_string(),
            ));
        }

        let mode = db::projects::get_storage_mode(&self.db, project_id).await?;
        if trigger == SyncTrigger::Manual {
            self.cache.clear_all().await;
        }

        let started = Instant::now();
        let mut report = SyncReport {
            run_id: Uuid::new_v4(),
            project_id,
            trigger,
            range_start: start,
            range_end: end,
            status: SyncStatus::InProgress,
            outcomes: Vec::new(),
            rows_written: 0,
            started_at: Utc::now(),
            finished_at: None,
        };
        db::runs::save_run(&self.db, &report).await?;

        info!(
            project_id = %project_id,
            run_id = %report.run_id,
            trigger = trigger.as_str(),
            sources = configs.len(),
            mode = %mode,
            %start,
            %end,
            "Sync started"
        );

        let user_id = self.identity.current_user_id();
        let outcomes = join_all(
            configs
                .iter()
                .map(|config| self.sync_source(config, start, end, mode, user_id.clone())),
        )
        .await;

        report.status = SyncReport::overall_status(&outcomes);
        report.rows_written = outcomes.iter().map(|o| o.rows_written).sum();
        report.outcomes = outcomes;
        report.finished_at = Some(Utc::now());
        db::runs::save_run(&self.db, &report).await?;

        let failed: Vec<String> = report
            .failed_sources()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        info!(
            project_id = %project_id,
            run_id = %report.run_id,
            status = report.status.as_str(),
            rows_written = report.rows_written,
            failed = ?failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync finished"
        );

        self.event_bus.emit_lossy(SyncEvent::SyncFinished {
            project_id,
            run_id: report.run_id,
            status: report.status,
            trigger: trigger.as_str().to_string(),
            rows_written: report.rows_written,
            failed_sources: failed,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Persist and broadcast a phase change
    async fn enter_phase(
        &self,
        config: &SyncConfig,
        current: &mut SyncPhase,
        next: SyncPhase,
        message: Option<String>,
        error_kind: Option<&str>,
    ) -> Result<(), SyncError> {
        if !current.can_transition_to(next) {
            warn!(
                source = %config.kind(),
                from = current.as_str(),
                to = next.as_str(),
                "Unexpected sync phase transition"
            );
        }
        *current = next;

        db::status::record_phase(
            &self.db,
            config.project_id,
            config.kind(),
            next,
            message.as_deref(),
            error_kind,
        )
        .await?;

        self.event_bus.emit_lossy(SyncEvent::SourceStatusChanged {
            project_id: config.project_id,
            source: config.kind().as_str().to_string(),
            status: next.status(),
            phase: next.as_str().to_string(),
            message,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn sync_source(
        &self,
        config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
        mode: StorageMode,
        user_id: Option<String>,
    ) -> SourceOutcome {
        let mut outcome = SourceOutcome {
            source: config.kind(),
            status: SyncStatus::InProgress,
            records_fetched: 0,
            rows_written: 0,
            chunks: 0,
            invalid_rows: Vec::new(),
            error_kind: None,
            message: None,
        };
        let mut phase = SyncPhase::Idle;

        match self
            .run_source(config, start, end, mode, user_id, &mut phase, &mut outcome)
            .await
        {
            Ok(()) => {
                outcome.status = SyncStatus::Success;
                let message = outcome.message.clone();
                if let Err(e) = self
                    .enter_phase(config, &mut phase, SyncPhase::Success, message, None)
                    .await
                {
                    warn!(source = %config.kind(), error = %e, "Failed to persist success status");
                }
                if let Err(e) = db::configs::mark_synced(&self.db, config.config_id, Utc::now()).await {
                    warn!(source = %config.kind(), error = %e, "Failed to update last_synced_at");
                }
            }
            Err(err) => {
                let message = err.user_message();
                warn!(
                    project_id = %config.project_id,
                    source = %config.kind(),
                    phase = phase.as_str(),
                    error_kind = err.kind(),
                    error = %message,
                    "Source sync failed"
                );
                outcome.status = SyncStatus::Error;
                outcome.error_kind = Some(err.kind().to_string());
                outcome.message = Some(message.clone());
                if let Err(e) = self
                    .enter_phase(config, &mut phase, SyncPhase::Error, Some(message), Some(err.kind()))
                    .await
                {
                    warn!(source = %config.kind(), error = %e, "Failed to persist error status");
                }
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_source(
        &self,
        config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
        mode: StorageMode,
        user_id: Option<String>,
        phase: &mut SyncPhase,
        outcome: &mut SourceOutcome,
    ) -> Result<(), SyncError> {
        let source = config.kind();
        let adapter = self.registry.get(source).ok_or_else(|| {
            SyncError::Config(format!("no adapter registered for source '{}'", source))
        })?;

        self.enter_phase(config, phase, SyncPhase::Fetching, None, None).await?;
        let fetcher = RangeFetcher::new(adapter, self.settings.chunk_stagger).with_user(user_id.clone());
        let aggregate = fetcher
            .fetch_chunked(config, start, end, self.settings.max_chunk_days)
            .await?;
        outcome.records_fetched = aggregate.raw.len();
        outcome.chunks = aggregate.chunk_count();
        debug!(
            source = %source,
            records = outcome.records_fetched,
            chunks = outcome.chunks,
            "Fetch complete"
        );

        self.enter_phase(config, phase, SyncPhase::Normalizing, None, None).await?;
        let written = match mode {
            StorageMode::DailyAggregate => {
                let records = aggregate.records;
                self.enter_phase(config, phase, SyncPhase::Upserting, None, None).await?;
                db::metrics::upsert_daily_batch(&self.db, &records).await?
            }
            StorageMode::IndividualRecords => {
                let normalizer =
                    Normalizer::new(config.project_id, source, &config.mapping).with_user(user_id);
                let batch = normalizer.partition_individual(&aggregate.raw)?;
                if !batch.invalid_rows.is_empty() {
                    let field = config.mapping.unique_id_field.as_deref().unwrap_or_default();
                    let report = missing_id_error(field, batch.invalid_rows.clone());
                    warn!(
                        source = %source,
                        rows = ?batch.invalid_rows,
                        "Rows without unique id skipped"
                    );
                    outcome.message = Some(report.user_message());
                    outcome.invalid_rows = batch.invalid_rows;
                }
                if batch.duplicates > 0 {
                    debug!(source = %source, duplicates = batch.duplicates, "Duplicate unique ids collapsed");
                }
                self.enter_phase(config, phase, SyncPhase::Upserting, None, None).await?;
                db::records::upsert_individual_batch(&self.db, &batch.records).await?
            }
        };
        outcome.rows_written = written;
        Ok(())
    }
}
