//! Raw and canonical metric records

use crate::models::{metrics::MetricSet, source::SourceKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One row as returned by a source adapter, before mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub date: NaiveDate,
    /// Position in the adapter's output (sheet row number for sheets)
    pub row_index: usize,
    pub fields: BTreeMap<String, Value>,
}

impl RawRecord {
    pub fn new(date: NaiveDate, row_index: usize) -> Self {
        Self {
            date,
            row_index,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Field value rendered as text (numbers included)
    pub fn text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::Null => None,
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            other => Some(other.to_string()),
        }
    }
}

/// Per-project storage representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    #[default]
    DailyAggregate,
    IndividualRecords,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::DailyAggregate => "daily_aggregate",
            StorageMode::IndividualRecords => "individual_records",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily_aggregate" => Ok(StorageMode::DailyAggregate),
            "individual_records" => Ok(StorageMode::IndividualRecords),
            other => Err(format!("unknown storage mode: {}", other)),
        }
    }
}

/// One summarized row per (project, date, source)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricRecord {
    pub project_id: Uuid,
    pub date: NaiveDate,
    pub source: SourceKind,
    pub metrics: MetricSet,
    #[serde(default)]
    pub extra: Map<String, Value>,
    pub user_id: Option<String>,
    pub synced_at: DateTime<Utc>,
}

impl DailyMetricRecord {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name)
    }
}

/// One row per externally unique business event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualRecord {
    pub project_id: Uuid,
    pub date: NaiveDate,
    pub unique_id: String,
    pub source: SourceKind,
    pub record_type: String,
    pub amount: Option<f64>,
    pub status: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
    pub user_id: Option<String>,
    pub synced_at: DateTime<Utc>,
}
