//! Mode-switch backups

use crate::models::records::{DailyMetricRecord, IndividualRecord, StorageMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable, named copy of a project's metric rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub backup_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub reason: String,
    /// Mode the project was in when the snapshot was taken
    pub storage_mode: StorageMode,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Rows captured by a snapshot, both tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupPayload {
    pub daily: Vec<DailyMetricRecord>,
    pub individual: Vec<IndividualRecord>,
}

impl BackupPayload {
    pub fn row_count(&self) -> usize {
        self.daily.len() + self.individual.len()
    }
}
