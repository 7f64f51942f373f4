//! Raw record → canonical record mapping
//!
//! Daily mode merges rows sharing a date through the aggregation rule table.
//! Individual mode turns each raw row into exactly one record and requires the
//! configured unique id field on every row.

use crate::error::SyncError;
use crate::models::{
    DailyMetricRecord, FieldCondition, FieldMap, FieldMapping, IndividualRecord, MetricSet,
    RawRecord, RuleTable, SourceKind,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

const DEFAULT_RECORD_TYPE: &str = "record";

/// Parse numbers as they appear in spreadsheets and API payloads
///
/// Accepts JSON numbers and strings such as `"1,234.50"`, `"$80"`, `"12%"`
/// and accounting negatives `"(12.5)"`. Blank cells yield `None`.
pub fn parse_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let mut text = s.trim().to_string();
            if text.is_empty() || text == "-" {
                return None;
            }
            let negative = text.starts_with('(') && text.ends_with(')');
            if negative {
                text = text[1..text.len() - 1].to_string();
            }
            let cleaned: String = text
                .chars()
                .filter(|c| !matches!(c, ',' | '$' | '€' | '£' | '%' | ' '))
                .collect();
            let parsed = cleaned.parse::<f64>().ok().filter(|v| v.is_finite())?;
            Some(if negative { -parsed } else { parsed })
        }
        _ => None,
    }
}

/// `"Amount Spent ($)"` → `"amount_spent"`
pub fn canonical_field_name(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    for ch in header.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

fn condition_holds(raw: &RawRecord, condition: &FieldCondition) -> bool {
    let Some(actual) = raw.text(&condition.field) else {
        return false;
    };
    condition
        .equals
        .iter()
        .any(|expected| expected.eq_ignore_ascii_case(&actual))
}

/// Individual-mode output with the rows that could not be converted
#[derive(Debug, Clone, Default)]
pub struct IndividualBatch {
    pub records: Vec<IndividualRecord>,
    /// `row_index` of rows missing the unique id
    pub invalid_rows: Vec<usize>,
    /// Rows replaced by a later row with the same unique id
    pub duplicates: usize,
}

/// Normalizer bound to one project, source and mapping
pub struct Normalizer<'a> {
    project_id: Uuid,
    source: SourceKind,
    mapping: &'a FieldMapping,
    field_maps: Vec<FieldMap>,
    rules: RuleTable,
    user_id: Option<String>,
    synced_at: DateTime<Utc>,
}

impl<'a> Normalizer<'a> {
    pub fn new(project_id: Uuid, source: SourceKind, mapping: &'a FieldMapping) -> Self {
        let field_maps = mapping.effective_fields(source);
        let rules = RuleTable::from_field_maps(&field_maps);
        Self {
            project_id,
            source,
            mapping,
            field_maps,
            rules,
            user_id: None,
            synced_at: Utc::now(),
        }
    }

    /// Stamp written rows with the acting user
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Observe one raw row into `set`
    fn observe_row(&self, raw: &RawRecord, set: &mut MetricSet) {
        // Sheets without an explicit mapping: every numeric column
        if self.field_maps.is_empty() {
            for (name, value) in &raw.fields {
                if let Some(v) = parse_numeric(value) {
                    set.observe(&canonical_field_name(name), v, &self.rules);
                }
            }
            return;
        }

        for map in &self.field_maps {
            if !map.when.iter().all(|c| condition_holds(raw, c)) {
                continue;
            }
            match &map.source_field {
                None => set.observe(&map.target, 1.0, &self.rules),
                Some(field) => {
                    if let Some(v) = raw.fields.get(field).and_then(parse_numeric) {
                        set.observe(&map.target, v, &self.rules);
                    }
                }
            }
        }
    }

    /// Per-date metric sets in date order; rows of one date merge in input order
    pub fn daily_sets(&self, raw: &[RawRecord]) -> BTreeMap<NaiveDate, (MetricSet, Map<String, Value>)> {
        let mut days: BTreeMap<NaiveDate, (MetricSet, Map<String, Value>)> = BTreeMap::new();

        for row in raw {
            let (set, extra) = days.entry(row.date).or_default();
            self.observe_row(row, set);
            for name in &self.mapping.extra_fields {
                if let Some(value) = row.fields.get(name) {
                    extra.insert(name.clone(), value.clone());
                }
            }
        }

        days.retain(|date, entry| {
            let keep = !entry.0.is_empty() || !entry.1.is_empty();
            if !keep {
                debug!(source = %self.source, %date, "No mapped metrics for day, skipping");
            }
            keep
        });
        days
    }

    /// One [`DailyMetricRecord`] per date present in `raw`
    pub fn normalize_daily(&self, raw: &[RawRecord]) -> Vec<DailyMetricRecord> {
        self.daily_sets(raw)
            .into_iter()
            .map(|(date, (metrics, extra))| DailyMetricRecord {
                project_id: self.project_id,
                date,
                source: self.source,
                metrics,
                extra,
                user_id: self.user_id.clone(),
                synced_at: self.synced_at,
            })
            .collect()
    }

    fn unique_id_field(&self) -> Result<&str, SyncError> {
        self.mapping
            .unique_id_field
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| {
                SyncError::Config("individual records mode requires a unique id field mapping".into())
            })
    }

    /// Convert valid rows and collect every row missing its unique id
    ///
    /// Fails only when no unique id field is configured.
    pub fn partition_individual(&self, raw: &[RawRecord]) -> Result<IndividualBatch, SyncError> {
        let id_field = self.unique_id_field()?;
        let record_type = self
            .mapping
            .record_type
            .clone()
            .unwrap_or_else(|| DEFAULT_RECORD_TYPE.to_string());

        let mut batch = IndividualBatch::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for row in raw {
            let Some(unique_id) = row.text(id_field) else {
                batch.invalid_rows.push(row.row_index);
                continue;
            };

            let amount = self
                .mapping
                .amount_field
                .as_deref()
                .and_then(|f| row.fields.get(f))
                .and_then(parse_numeric);
            let status = self.mapping.status_field.as_deref().and_then(|f| row.text(f));

            let extra: Map<String, Value> = if self.mapping.extra_fields.is_empty() {
                let consumed = [
                    Some(id_field),
                    self.mapping.amount_field.as_deref(),
                    self.mapping.status_field.as_deref(),
                ];
                row.fields
                    .iter()
                    .filter(|(k, _)| !consumed.contains(&Some(k.as_str())))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            } else {
                self.mapping
                    .extra_fields
                    .iter()
                    .filter_map(|k| row.fields.get(k).map(|v| (k.clone(), v.clone())))
                    .collect()
            };

            let record = IndividualRecord {
                project_id: self.project_id,
                date: row.date,
                unique_id: unique_id.clone(),
                source: self.source,
                record_type: record_type.clone(),
                amount,
                status,
                extra,
                user_id: self.user_id.clone(),
                synced_at: self.synced_at,
            };

            match positions.get(&unique_id) {
                Some(&pos) => {
                    batch.records[pos] = record;
                    batch.duplicates += 1;
                }
                None => {
                    positions.insert(unique_id, batch.records.len());
                    batch.records.push(record);
                }
            }
        }

        Ok(batch)
    }

    /// Strict conversion: any row missing the unique id fails the batch
    pub fn normalize_individual(&self, raw: &[RawRecord]) -> Result<Vec<IndividualRecord>, SyncError> {
        let batch = self.partition_individual(raw)?;
        if !batch.invalid_rows.is_empty() {
            return Err(missing_id_error(self.unique_id_field()?, batch.invalid_rows));
        }
        Ok(batch.records)
    }
}

/// Validation error listing every row missing `field`
pub fn missing_id_error(field: &str, rows: Vec<usize>) -> SyncError {
    SyncError::Validation {
        message: format!("{} row(s) missing unique id field '{}'", rows.len(), field),
        rows,
    }
}
