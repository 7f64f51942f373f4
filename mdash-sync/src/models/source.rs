//! Source connection configuration
//!
//! Each external source has its own tagged config variant sharing a common
//! [`SourceBase`]. The orchestrator dispatches on [`SourceKind`].

use crate::error::SyncError;
use crate::models::metrics::AggregationRule;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// External source type; part of the daily upsert key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Sheet,
    Ads,
    Crm,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Sheet, SourceKind::Ads, SourceKind::Crm];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Sheet => "sheet",
            SourceKind::Ads => "ads",
            SourceKind::Crm => "crm",
        }
    }

    /// Field maps applied when a config has no explicit mapping
    ///
    /// Sheets have no fixed columns; an empty list makes the normalizer map
    /// every numeric column to its snake_cased header.
    pub fn default_field_maps(&self) -> Vec<FieldMap> {
        match self {
            SourceKind::Sheet => Vec::new(),
            SourceKind::Ads => vec![
                FieldMap::direct("impressions", "impressions"),
                FieldMap::direct("clicks", "clicks"),
                FieldMap::direct("spend", "spend"),
                FieldMap::direct("reach", "reach"),
                FieldMap::direct("leads", "action:lead"),
                FieldMap::direct("conversions", "action:offsite_conversion"),
                FieldMap::direct("link_clicks", "action:link_click"),
            ],
            SourceKind::Crm => vec![
                FieldMap::count("appointments_total", &[("kind", &["appointment"])]),
                FieldMap::count(
                    "appointments_booked",
                    &[("kind", &["appointment"]), ("status", &["booked", "confirmed"])],
                ),
                FieldMap::count(
                    "appointments_showed",
                    &[("kind", &["appointment"]), ("status", &["showed"])],
                ),
                FieldMap::count(
                    "appointments_no_show",
                    &[("kind", &["appointment"]), ("status", &["noshow", "no_show"])],
                ),
                FieldMap::count(
                    "appointments_cancelled",
                    &[("kind", &["appointment"]), ("status", &["cancelled"])],
                ),
                FieldMap::count("deals_total", &[("kind", &["opportunity"])]),
                FieldMap::count(
                    "deals_open",
                    &[("kind", &["opportunity"]), ("status", &["open"])],
                ),
                FieldMap::count(
                    "deals_won",
                    &[("kind", &["opportunity"]), ("status", &["won"])],
                ),
                FieldMap::count(
                    "deals_lost",
                    &[("kind", &["opportunity"]), ("status", &["lost", "abandoned"])],
                ),
                FieldMap {
                    target: "revenue".to_string(),
                    source_field: Some("monetary_value".to_string()),
                    when: vec![
                        FieldCondition::new("kind", &["opportunity"]),
                        FieldCondition::new("status", &["won"]),
                    ],
                    aggregation: None,
                },
            ],
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sheet" => Ok(SourceKind::Sheet),
            "ads" => Ok(SourceKind::Ads),
            "crm" => Ok(SourceKind::Crm),
            other => Err(format!("unknown source kind: {}", other)),
        }
    }
}

/// How often the scheduler syncs a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCadence {
    #[default]
    Manual,
    Hourly,
    Daily,
}

impl SyncCadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncCadence::Manual => "manual",
            SyncCadence::Hourly => "hourly",
            SyncCadence::Daily => "daily",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(SyncCadence::Manual),
            "hourly" => Some(SyncCadence::Hourly),
            "daily" => Some(SyncCadence::Daily),
            _ => None,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            SyncCadence::Manual => None,
            SyncCadence::Hourly => Some(Duration::hours(1)),
            SyncCadence::Daily => Some(Duration::days(1)),
        }
    }

    /// Whether a scheduled sync is due at `now`
    pub fn is_due(&self, last_synced_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match (self.interval(), last_synced_at) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(interval), Some(last)) => now - last >= interval,
        }
    }
}

/// Fields shared by every source config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBase {
    /// Key into the credentials store
    pub credentials_ref: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub cadence: SyncCadence,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSourceConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// Column span in A1 notation, e.g. `A:H`
    #[serde(default)]
    pub range: Option<String>,
    /// Header of the column holding the row date
    #[serde(default = "default_date_column")]
    pub date_column: String,
}

fn default_date_column() -> String {
    "date".to_string()
}

impl SheetSourceConfig {
    /// A1 range sent to the values API (`Sheet1!A:H`, or the whole sheet)
    pub fn a1_range(&self) -> String {
        match &self.range {
            Some(range) if !range.trim().is_empty() => format!("{}!{}", self.sheet_name, range.trim()),
            _ => self.sheet_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdsSourceConfig {
    /// Ad account id without the `act_` prefix
    pub account_id: String,
    #[serde(default = "default_ads_level")]
    pub level: String,
    /// Extra insight fields requested beyond the defaults
    #[serde(default)]
    pub fields: Vec<String>,
}

fn default_ads_level() -> String {
    "account".to_string()
}

impl AdsSourceConfig {
    pub fn normalized_account_id(&self) -> &str {
        self.account_id
            .trim()
            .strip_prefix("act_")
            .unwrap_or(self.account_id.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmSourceConfig {
    pub location_id: String,
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default = "default_true")]
    pub include_appointments: bool,
    #[serde(default = "default_true")]
    pub include_opportunities: bool,
}

/// Source-specific connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Sheet(SheetSourceConfig),
    Ads(AdsSourceConfig),
    Crm(CrmSourceConfig),
}

impl SourceConfig {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceConfig::Sheet(_) => SourceKind::Sheet,
            SourceConfig::Ads(_) => SourceKind::Ads,
            SourceConfig::Crm(_) => SourceKind::Crm,
        }
    }

    /// Account/location identity used in cache keys and rate-limit cooldowns
    pub fn account_key(&self) -> String {
        match self {
            SourceConfig::Sheet(c) => format!("{}/{}", c.spreadsheet_id, c.sheet_name),
            SourceConfig::Ads(c) => format!("act_{}", c.normalized_account_id()),
            SourceConfig::Crm(c) => c.location_id.clone(),
        }
    }

    /// Reject configs that can never sync
    pub fn validate(&self) -> Result<(), SyncError> {
        match self {
            SourceConfig::Sheet(c) => {
                if c.spreadsheet_id.trim().is_empty() {
                    return Err(SyncError::Config("spreadsheet id is required".into()));
                }
                if c.sheet_name.trim().is_empty() {
                    return Err(SyncError::Config("sheet name is required".into()));
                }
                if c.date_column.trim().is_empty() {
                    return Err(SyncError::Config("date column is required".into()));
                }
            }
            SourceConfig::Ads(c) => {
                let id = c.normalized_account_id();
                if id.is_empty() || !id.chars().all(|ch| ch.is_ascii_digit()) {
                    return Err(SyncError::Config(format!(
                        "invalid ad account id: {:?}",
                        c.account_id
                    )));
                }
            }
            SourceConfig::Crm(c) => {
                if c.location_id.trim().is_empty() {
                    return Err(SyncError::Config("location id is required".into()));
                }
                if !c.include_appointments && !c.include_opportunities {
                    return Err(SyncError::Config(
                        "at least one of appointments/opportunities must be enabled".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// All rows must match for a [`FieldMap`] to apply (case-insensitive, any-of)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub equals: Vec<String>,
}

impl FieldCondition {
    pub fn new(field: &str, equals: &[&str]) -> Self {
        Self {
            field: field.to_string(),
            equals: equals.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One canonical metric produced from a raw field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    /// Canonical metric name
    pub target: String,
    /// Raw column/API field holding the value; `None` counts matching rows
    #[serde(default)]
    pub source_field: Option<String>,
    #[serde(default)]
    pub when: Vec<FieldCondition>,
    /// Overrides the built-in rule for `target`
    #[serde(default)]
    pub aggregation: Option<AggregationRule>,
}

impl FieldMap {
    pub fn direct(target: &str, source_field: &str) -> Self {
        Self {
            target: target.to_string(),
            source_field: Some(source_field.to_string()),
            when: Vec::new(),
            aggregation: None,
        }
    }

    pub fn count(target: &str, conditions: &[(&str, &[&str])]) -> Self {
        Self {
            target: target.to_string(),
            source_field: None,
            when: conditions
                .iter()
                .map(|(field, equals)| FieldCondition::new(field, equals))
                .collect(),
            aggregation: None,
        }
    }
}

/// Per-project field mapping for one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Empty means the source's default maps
    #[serde(default)]
    pub fields: Vec<FieldMap>,
    /// Mandatory in individual-records mode
    #[serde(default)]
    pub unique_id_field: Option<String>,
    #[serde(default)]
    pub amount_field: Option<String>,
    #[serde(default)]
    pub status_field: Option<String>,
    /// `record_type` stamped on individual records
    #[serde(default)]
    pub record_type: Option<String>,
    /// Raw fields copied into `extra`
    #[serde(default)]
    pub extra_fields: Vec<String>,
}

impl FieldMapping {
    pub fn effective_fields(&self, kind: SourceKind) -> Vec<FieldMap> {
        if self.fields.is_empty() {
            kind.default_field_maps()
        } else {
            self.fields.clone()
        }
    }
}

/// Persisted connection of one project to one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub config_id: Uuid,
    pub project_id: Uuid,
    pub base: SourceBase,
    pub source: SourceConfig,
    #[serde(default)]
    pub mapping: FieldMapping,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncConfig {
    pub fn new(project_id: Uuid, base: SourceBase, source: SourceConfig, mapping: FieldMapping) -> Self {
        let now = Utc::now();
        Self {
            config_id: Uuid::new_v4(),
            project_id,
            base,
            source,
            mapping,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_config_tagged_serialization() {
        let config = SourceConfig::Ads(AdsSourceConfig {
            account_id: "act_12345".to_string(),
            level: "account".to_string(),
            fields: vec![],
        });
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["kind"], "ads");
        assert_eq!(json["account_id"], "act_12345");

        let back: SourceConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), SourceKind::Ads);
        assert_eq!(back.account_key(), "act_12345");
    }

    #[test]
    fn test_sheet_defaults() {
        let config: SourceConfig = serde_json::from_str(
            r#"{"kind":"sheet","spreadsheet_id":"abc","sheet_name":"Leads"}"#,
        )
        .unwrap();
        match config {
            SourceConfig::Sheet(sheet) => {
                assert_eq!(sheet.date_column, "date");
                assert_eq!(sheet.a1_range(), "Leads");
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_account() {
        let config = SourceConfig::Ads(AdsSourceConfig {
            account_id: "act_abc".to_string(),
            level: "account".to_string(),
            fields: vec![],
        });
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_cadence_due() {
        let now = Utc::now();
        assert!(!SyncCadence::Manual.is_due(None, now));
        assert!(SyncCadence::Hourly.is_due(None, now));
        assert!(!SyncCadence::Hourly.is_due(Some(now - Duration::minutes(30)), now));
        assert!(SyncCadence::Hourly.is_due(Some(now - Duration::minutes(61)), now));
        assert!(!SyncCadence::Daily.is_due(Some(now - Duration::hours(23)), now));
    }

    #[test]
    fn test_kind_parse() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("tiktok".parse::<SourceKind>().is_err());
    }
}
