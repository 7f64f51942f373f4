//! Database access for mdash-sync
//!
//! Tables are created by `mdash_common::db::init_database`; this module holds
//! the row-level operations. Metric rows are only ever written through
//! `INSERT ... ON CONFLICT DO UPDATE` on their upsert key.

pub mod backups;
pub mod configs;
pub mod credentials;
pub mod metrics;
pub mod projects;
pub mod records;
pub mod retry;
pub mod runs;
pub mod settings;
pub mod status;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use mdash_common::{Error, Result};
use uuid::Uuid;

/// Default lock-wait budget for batch writes
pub const LOCK_WAIT_MS: u64 = 5000;

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID '{}': {}", value, e)))
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| Error::Internal(format!("Invalid date '{}': {}", value, e)))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn date_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
pub(crate) fn timestamp_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
