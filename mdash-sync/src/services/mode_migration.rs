//! Storage mode migration
//!
//! Converts a project's stored metrics between daily aggregates and
//! individual records. A backup, when requested, is written before any
//! mutation and a failed backup aborts the switch. Delete, insert and the
//! mode update then run in one transaction, so a failure after the backup
//! leaves the previous rows and the backup intact.

use crate::db;
use crate::error::SyncError;
use crate::models::{
    BackupPayload, BackupSnapshot, DailyMetricRecord, IndividualRecord, MetricSet, RuleTable,
    SourceKind, StorageMode,
};
use crate::services::normalizer::canonical_field_name;
use chrono::{NaiveDate, Utc};
use mdash_common::events::{EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};
use uuid::Uuid;

/// Row count above which validation warns about switch duration
pub const LARGE_ROW_COUNT: i64 = 10_000;

/// Key in `extra` carrying the metric map of a converted aggregate
const METRICS_KEY: &str = "metrics";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchOptions {
    pub preserve_existing_data: bool,
    pub create_backup: bool,
    /// `record_type` given to records converted from aggregates
    pub default_record_type: String,
    pub backup_name: Option<String>,
}

impl Default for SwitchOptions {
    fn default() -> Self {
        Self {
            preserve_existing_data: true,
            create_backup: true,
            default_record_type: "daily_summary".to_string(),
            backup_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationResult {
    pub success: bool,
    pub previous_mode: StorageMode,
    pub new_mode: StorageMode,
    pub backup_id: Option<Uuid>,
    pub records_converted: usize,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

/// Read-only pre-switch report; warnings never block the switch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeValidation {
    pub current_mode: StorageMode,
    pub target_mode: StorageMode,
    pub rows_to_convert: i64,
    pub existing_target_rows: i64,
    pub record_types: Vec<String>,
    pub warnings: Vec<String>,
}

/// Deterministic id for the record converted from one aggregate row
pub fn derived_unique_id(project_id: Uuid, date: NaiveDate, source: SourceKind) -> String {
    let digest = Sha256::digest(format!("{}|{}|{}", project_id, date, source).as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("daily-{}", hex)
}

/// One aggregate row → one individual record carrying its metric map
pub fn aggregate_to_record(record: &DailyMetricRecord, record_type: &str) -> IndividualRecord {
    let mut extra = record.extra.clone();
    let metrics: Map<String, Value> = record
        .metrics
        .values()
        .iter()
        .filter_map(|(k, v)| serde_json::Number::from_f64(*v).map(|n| (k.clone(), Value::Number(n))))
        .collect();
    extra.insert(METRICS_KEY.to_string(), Value::Object(metrics));

    IndividualRecord {
        project_id: record.project_id,
        date: record.date,
        unique_id: derived_unique_id(record.project_id, record.date, record.source),
        source: record.source,
        record_type: record_type.to_string(),
        amount: record.metric("revenue"),
        status: None,
        extra,
        user_id: record.user_id.clone(),
        synced_at: Utc::now(),
    }
}

/// Metric contribution of one individual record
///
/// Records converted from aggregates carry their original metric map; other
/// records count as one `record_count` plus `amount` and a per-status count.
fn record_metrics(record: &IndividualRecord, rules: &RuleTable) -> MetricSet {
    if let Some(Value::Object(embedded)) = record.extra.get(METRICS_KEY) {
        let values: BTreeMap<String, f64> = embedded
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|v| (k.clone(), v)))
            .collect();
        return MetricSet::from(values);
    }

    let mut set = MetricSet::new();
    set.observe("record_count", 1.0, rules);
    if let Some(amount) = record.amount {
        set.observe("amount", amount, rules);
    }
    if let Some(status) = record.status.as_deref() {
        let name = canonical_field_name(status);
        if !name.is_empty() {
            set.observe(&format!("status_{}", name), 1.0, rules);
        }
    }
    set
}

/// Individual records → one aggregate per (date, source), merged in date order
pub fn records_to_aggregates(project_id: Uuid, records: &[IndividualRecord]) -> Vec<DailyMetricRecord> {
    let rules = RuleTable::builtin();
    let mut groups: BTreeMap<(NaiveDate, SourceKind), (MetricSet, Map<String, Value>, Option<String>)> =
        BTreeMap::new();

    for record in records {
        let entry = groups.entry((record.date, record.source)).or_default();
        entry.0.merge(&record_metrics(record, &rules), &rules);
        for (k, v) in &record.extra {
            if k != METRICS_KEY {
                entry.1.insert(k.clone(), v.clone());
            }
        }
        if record.user_id.is_some() {
            entry.2 = record.user_id.clone();
        }
    }

    let synced_at = Utc::now();
    groups
        .into_iter()
        .map(|((date, source), (metrics, extra, user_id))| DailyMetricRecord {
            project_id,
            date,
            source,
            metrics,
            extra,
            user_id,
            synced_at,
        })
        .collect()
}

pub struct ModeMigrationManager {
    db: SqlitePool,
    event_bus: EventBus,
}

impl ModeMigrationManager {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    pub async fn validate_mode_switch(
        &self,
        project_id: Uuid,
        target: StorageMode,
    ) -> Result<ModeValidation, SyncError> {
        let current = db::projects::get_storage_mode(&self.db, project_id).await?;
        let daily = db::metrics::count_daily(&self.db, project_id).await?;
        let individual = db::records::count_individual(&self.db, project_id).await?;
        let record_types = db::records::record_types(&self.db, project_id).await?;

        let (rows_to_convert, existing_target_rows) = match target {
            StorageMode::IndividualRecords => (daily, individual),
            StorageMode::DailyAggregate => (individual, daily),
        };

        let mut warnings = Vec::new();
        if current == target {
            warnings.push(format!("project is already in {} mode", target));
        }
        if rows_to_convert > LARGE_ROW_COUNT {
            warnings.push(format!(
                "{} rows will be converted; the switch may take a while",
                rows_to_convert
            ));
        }
        if target == StorageMode::DailyAggregate && record_types.len() > 1 {
            warnings.push(format!(
                "multiple record types ({}) will be merged into daily totals",
                record_types.join(", ")
            ));
        }
        if existing_target_rows > 0 {
            warnings.push(format!(
                "target table already holds {} rows; they are deleted unless existing data is preserved",
                existing_target_rows
            ));
        }

        Ok(ModeValidation {
            current_mode: current,
            target_mode: target,
            rows_to_convert,
            existing_target_rows,
            record_types,
            warnings,
        })
    }

    pub async fn switch_mode(&self, project_id: Uuid, target: StorageMode, options: &SwitchOptions) -> MigrationResult {
        let mut result = MigrationResult {
            success: false,
            previous_mode: target,
            new_mode: target,
            backup_id: None,
            records_converted: 0,
            warnings: Vec::new(),
            error: None,
        };

        let previous = match db::projects::get_storage_mode(&self.db, project_id).await {
            Ok(mode) => mode,
            Err(e) => {
                result.error = Some(SyncError::from(e).user_message());
                return result;
            }
        };
        result.previous_mode = previous;
        result.new_mode = previous;

        if previous == target {
            result.success = true;
            result.new_mode = target;
            result.warnings.push(format!("project is already in {} mode", target));
            return result;
        }

        if options.create_backup {
            match self.create_backup(project_id, previous, options).await {
                Ok(snapshot) => result.backup_id = Some(snapshot.backup_id),
                Err(e) => {
                    warn!(project_id = %project_id, error = %e, "Backup failed, mode switch aborted");
                    result.error = Some(format!("backup failed: {}", e.user_message()));
                    return result;
                }
            }
        }

        match self.convert(project_id, target, options, &mut result.warnings).await {
            Ok(converted) => {
                result.success = true;
                result.new_mode = target;
                result.records_converted = converted;
                info!(
                    project_id = %project_id,
                    from = %previous,
                    to = %target,
                    converted,
                    backup_id = ?result.backup_id,
                    "Storage mode switched"
                );
                self.event_bus.emit_lossy(SyncEvent::ModeSwitched {
                    project_id,
                    previous_mode: previous.as_str().to_string(),
                    new_mode: target.as_str().to_string(),
                    records_converted: converted,
                    backup_id: result.backup_id,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(
                    project_id = %project_id,
                    backup_id = ?result.backup_id,
                    error = %e,
                    "Mode switch failed, previous rows kept"
                );
                result.error = Some(e.user_message());
            }
        }
        result
    }

    async fn create_backup(
        &self,
        project_id: Uuid,
        mode: StorageMode,
        options: &SwitchOptions,
    ) -> Result<BackupSnapshot, SyncError> {
        let mut conn = self.db.acquire().await?;
        let payload = BackupPayload {
            daily: db::metrics::all_daily(&mut conn, project_id).await?,
            individual: db::records::all_individual(&mut conn, project_id).await?,
        };
        drop(conn);

        let created_at = Utc::now();
        let snapshot = BackupSnapshot {
            backup_id: Uuid::new_v4(),
            project_id,
            name: options
                .backup_name
                .clone()
                .unwrap_or_else(|| format!("{} backup {}", mode, created_at.format("%Y-%m-%d %H:%M:%S"))),
            reason: "mode_switch".to_string(),
            storage_mode: mode,
            row_count: payload.row_count(),
            created_at,
        };
        db::backups::insert_backup(&self.db, &snapshot, &payload).await?;
        info!(
            project_id = %project_id,
            backup_id = %snapshot.backup_id,
            rows = snapshot.row_count,
            "Backup snapshot created"
        );
        Ok(snapshot)
    }

    async fn convert(
        &self,
        project_id: Uuid,
        target: StorageMode,
        options: &SwitchOptions,
        warnings: &mut Vec<String>,
    ) -> Result<usize, SyncError> {
        let mut tx = self.db.begin().await?;

        let converted = match target {
            StorageMode::IndividualRecords => {
                let daily = db::metrics::all_daily(&mut tx, project_id).await?;
                if !options.preserve_existing_data {
                    db::records::delete_individual(&mut *tx, project_id).await?;
                }
                for row in &daily {
                    let record = aggregate_to_record(row, &options.default_record_type);
                    db::records::upsert_individual(&mut *tx, &record).await?;
                }
                daily.len()
            }
            StorageMode::DailyAggregate => {
                let records = db::records::all_individual(&mut tx, project_id).await?;
                let types: BTreeSet<&str> = records.iter().map(|r| r.record_type.as_str()).collect();
                if types.len() > 1 {
                    warnings.push(format!(
                        "merged {} record types into daily totals: {}",
                        types.len(),
                        types.into_iter().collect::<Vec<_>>().join(", ")
                    ));
                }
                let aggregates = records_to_aggregates(project_id, &records);
                if !options.preserve_existing_data {
                    db::metrics::delete_daily(&mut *tx, project_id).await?;
                }
                for row in &aggregates {
                    db::metrics::upsert_daily(&mut *tx, row).await?;
                }
                aggregates.len()
            }
        };

        db::projects::set_storage_mode(&mut *tx, project_id, target).await?;
        tx.commit().await?;
        Ok(converted)
    }

    /// Replace both tables with a snapshot's rows and restore its mode
    pub async fn restore_backup(&self, backup_id: Uuid) -> Result<BackupSnapshot, SyncError> {
        let (snapshot, payload) = db::backups::get_backup(&self.db, backup_id)
            .await?
            .ok_or_else(|| mdash_common::Error::NotFound(format!("backup {}", backup_id)))?;
        let project_id = snapshot.project_id;
        let previous = db::projects::get_storage_mode(&self.db, project_id).await?;

        let mut tx = self.db.begin().await?;
        db::metrics::delete_daily(&mut *tx, project_id).await?;
        db::records::delete_individual(&mut *tx, project_id).await?;
        for row in &payload.daily {
            db::metrics::upsert_daily(&mut *tx, row).await?;
        }
        for row in &payload.individual {
            db::records::upsert_individual(&mut *tx, row).await?;
        }
        db::projects::set_storage_mode(&mut *tx, project_id, snapshot.storage_mode).await?;
        tx.commit().await?;

        info!(
            project_id = %project_id,
            backup_id = %backup_id,
            rows = payload.row_count(),
            "Backup restored"
        );
        self.event_bus.emit_lossy(SyncEvent::ModeSwitched {
            project_id,
            previous_mode: previous.as_str().to_string(),
            new_mode: snapshot.storage_mode.as_str().to_string(),
            records_converted: payload.row_count(),
            backup_id: Some(backup_id),
            timestamp: Utc::now(),
        });
        Ok(snapshot)
    }

    pub async fn list_backups(&self, project_id: Uuid) -> Result<Vec<BackupSnapshot>, SyncError> {
        Ok(db::backups::list_backups(&self.db, project_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn aggregate(project_id: Uuid, d: u32, source: SourceKind, metrics: &[(&str, f64)]) -> DailyMetricRecord {
        DailyMetricRecord {
            project_id,
            date: day(d),
            source,
            metrics: MetricSet::from(
                metrics
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect::<BTreeMap<_, _>>(),
            ),
            extra: Map::new(),
            user_id: None,
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn test_derived_unique_id_is_deterministic() {
        let project = Uuid::new_v4();
        let a = derived_unique_id(project, day(1), SourceKind::Ads);
        assert_eq!(a, derived_unique_id(project, day(1), SourceKind::Ads));
        assert_ne!(a, derived_unique_id(project, day(1), SourceKind::Sheet));
        assert!(a.starts_with("daily-"));
        assert_eq!(a.len(), "daily-".len() + 16);
    }

    #[test]
    fn test_aggregate_roundtrip_through_records() {
        let project = Uuid::new_v4();
        let originals = vec![
            aggregate(project, 1, SourceKind::Ads, &[("spend", 80.0), ("clicks", 4.0), ("impressions", 100.0), ("ctr", 4.0)]),
            aggregate(project, 1, SourceKind::Sheet, &[("amount_spent", 100.0)]),
            aggregate(project, 2, SourceKind::Crm, &[("revenue", 1500.0), ("deals_won", 1.0)]),
        ];
        let records: Vec<IndividualRecord> =
            originals.iter().map(|a| aggregate_to_record(a, "daily_summary")).collect();
        assert_eq!(records[2].amount, Some(1500.0));

        let back = records_to_aggregates(project, &records);
        assert_eq!(back.len(), originals.len());
        for (orig, restored) in originals.iter().zip(&back) {
            assert_eq!(orig.date, restored.date);
            assert_eq!(orig.source, restored.source);
            assert_eq!(orig.metrics.values(), restored.metrics.values());
        }
    }

    #[test]
    fn test_plain_records_aggregate_counts() {
        let project = Uuid::new_v4();
        let record = |id: &str, amount: f64, status: &str| IndividualRecord {
            project_id: project,
            date: day(3),
            unique_id: id.to_string(),
            source: SourceKind::Sheet,
            record_type: "sale".to_string(),
            amount: Some(amount),
            status: Some(status.to_string()),
            extra: Map::new(),
            user_id: None,
            synced_at: Utc::now(),
        };
        let back = records_to_aggregates(
            project,
            &[record("a", 10.0, "Paid"), record("b", 5.5, "paid"), record("c", 1.0, "refunded")],
        );
        assert_eq!(back.len(), 1);
        let m = &back[0];
        assert_eq!(m.metric("record_count"), Some(3.0));
        assert_eq!(m.metric("amount"), Some(16.5));
        assert_eq!(m.metric("status_paid"), Some(2.0));
        assert_eq!(m.metric("status_refunded"), Some(1.0));
    }
}
