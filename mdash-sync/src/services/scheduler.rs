//! Cadence-driven sync scheduler
//!
//! Each tick selects active configs whose cadence is due and runs one
//! scheduled sync per project over the trailing lookback window, limited to
//! the due sources.

use crate::db;
use crate::error::SyncError;
use crate::models::{SourceKind, SyncReport, SyncTrigger};
use crate::services::orchestrator::SyncOrchestrator;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mdash_common::config::SyncConfigSection;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Scheduler {
    db: SqlitePool,
    orchestrator: Arc<SyncOrchestrator>,
    tick: Duration,
    lookback_days: u32,
}

impl Scheduler {
    pub fn new(db: SqlitePool, orchestrator: Arc<SyncOrchestrator>, section: &SyncConfigSection) -> Self {
        Self {
            db,
            orchestrator,
            tick: Duration::from_secs(section.scheduler_tick_seconds.max(1)),
            lookback_days: section.scheduled_lookback_days.max(1),
        }
    }

    /// Due sources grouped by project
    async fn due_sources(&self, now: DateTime<Utc>) -> Result<BTreeMap<Uuid, Vec<SourceKind>>, SyncError> {
        let mut due: BTreeMap<Uuid, Vec<SourceKind>> = BTreeMap::new();
        for config in db::configs::all_active_configs(&self.db).await? {
            if config.base.cadence.is_due(config.last_synced_at, now) {
                due.entry(config.project_id).or_default().push(config.kind());
            }
        }
        Ok(due)
    }

    /// Run every due sync once; returns the finished reports
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Vec<SyncReport>, SyncError> {
        let end = now.date_naive();
        let start = end - ChronoDuration::days(self.lookback_days as i64 - 1);
        let due = self.due_sources(now).await?;
        if due.is_empty() {
            debug!("No scheduled syncs due");
        }

        let mut reports = Vec::new();
        for (project_id, kinds) in due {
            match self
                .orchestrator
                .sync_sources(project_id, start, end, SyncTrigger::Scheduled, Some(&kinds))
                .await
            {
                Ok(report) => reports.push(report),
                Err(SyncError::AlreadyRunning { .. }) => {
                    debug!(project_id = %project_id, "Sync already running, skipping scheduled run");
                }
                Err(e) => {
                    warn!(project_id = %project_id, error = %e.user_message(), "Scheduled sync failed");
                }
            }
        }

        if let Err(e) = db::settings::set_scheduler_last_tick(&self.db, now).await {
            warn!(error = %e, "Failed to record scheduler tick");
        }
        Ok(reports)
    }

    /// Start the interval loop in the background
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                tick_secs = self.tick.as_secs(),
                lookback_days = self.lookback_days,
                "Scheduler started"
            );
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match self.run_once(Utc::now()).await {
                    Ok(reports) if !reports.is_empty() => {
                        info!(runs = reports.len(), "Scheduled syncs completed");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e.user_message(), "Scheduler tick failed"),
                }
            }
        })
    }
}
