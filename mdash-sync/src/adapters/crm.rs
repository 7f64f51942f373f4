//! CRM adapter: calendar appointments and pipeline opportunities
//!
//! Appointments come from `GET {base}/calendars/events` (native time window),
//! opportunities from `GET {base}/opportunities/search` (page-based, filtered
//! client-side by creation date). Each event becomes one raw record with
//! `kind`, `id`, `status` and `monetary_value` fields.

use crate::adapters::auth::TokenRefresher;
use crate::adapters::http::HttpClient;
use crate::adapters::{retain_in_range, SourceAdapter};
use crate::error::SyncError;
use crate::models::{CrmSourceConfig, RawRecord, SourceConfig, SourceKind, SyncConfig};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use mdash_common::time::{parse_flexible_date, parse_iso_date};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

const API_VERSION_HEADER: (&str, &str) = ("Version", "2021-07-28");
const PAGE_LIMIT: u32 = 100;
const MAX_PAGES: u32 = 100;

pub struct CrmAdapter {
    http: Arc<HttpClient>,
    auth: Arc<TokenRefresher>,
    base_url: String,
}

/// Calendar date as written in the payload (local to the CRM account)
fn event_date(value: Option<&Value>) -> Option<NaiveDate> {
    let text = value?.as_str()?.trim();
    if text.len() >= 10 && text.is_char_boundary(10) {
        if let Some(date) = parse_iso_date(&text[..10]) {
            return Some(date);
        }
    }
    parse_flexible_date(text)
}

fn start_of_day_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::default()).and_utc().timestamp_millis()
}

pub fn appointment_to_record(event: &Value, row_index: usize) -> Option<RawRecord> {
    let date = event_date(event.get("startTime"))?;
    let mut record = RawRecord::new(date, row_index).with_field("kind", "appointment");
    for (source, target) in [
        ("id", "id"),
        ("appointmentStatus", "status"),
        ("calendarId", "calendar_id"),
        ("contactId", "contact_id"),
        ("title", "title"),
    ] {
        if let Some(v) = event.get(source).filter(|v| !v.is_null()) {
            record.fields.insert(target.to_string(), v.clone());
        }
    }
    Some(record)
}

pub fn opportunity_to_record(opportunity: &Value, row_index: usize) -> Option<RawRecord> {
    let date = event_date(opportunity.get("createdAt"))?;
    let mut record = RawRecord::new(date, row_index).with_field("kind", "opportunity");
    for (source, target) in [
        ("id", "id"),
        ("status", "status"),
        ("monetaryValue", "monetary_value"),
        ("name", "name"),
        ("pipelineId", "pipeline_id"),
        ("pipelineStageId", "stage_id"),
        ("source", "lead_source"),
    ] {
        if let Some(v) = opportunity.get(source).filter(|v| !v.is_null()) {
            record.fields.insert(target.to_string(), v.clone());
        }
    }
    Some(record)
}

impl CrmAdapter {
    pub fn new(http: Arc<HttpClient>, auth: Arc<TokenRefresher>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            auth,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_appointments(
        &self,
        crm: &CrmSourceConfig,
        start: NaiveDate,
        end: NaiveDate,
        token: &str,
    ) -> Result<Vec<Value>, SyncError> {
        let mut query = vec![
            ("locationId", crm.location_id.clone()),
            ("startTime", start_of_day_millis(start).to_string()),
            // Inclusive end: last millisecond of the end date
            ("endTime", (start_of_day_millis(end) + 86_400_000 - 1).to_string()),
        ];
        if let Some(calendar_id) = &crm.calendar_id {
            query.push(("calendarId", calendar_id.clone()));
        }

        let body = self
            .http
            .get_json(&self.url("calendars/events"), &query, &[API_VERSION_HEADER], token)
            .await?;
        Ok(body
            .get("events")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_opportunities(
        &self,
        crm: &CrmSourceConfig,
        start: NaiveDate,
        end: NaiveDate,
        token: &str,
    ) -> Result<Vec<Value>, SyncError> {
        let url = self.url("opportunities/search");
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let mut query = vec![
                ("location_id", crm.location_id.clone()),
                ("date", start.format("%m-%d-%Y").to_string()),
                ("endDate", end.format("%m-%d-%Y").to_string()),
                ("limit", PAGE_LIMIT.to_string()),
                ("page", page.to_string()),
            ];
            if let Some(pipeline_id) = &crm.pipeline_id {
                query.push(("pipeline_id", pipeline_id.clone()));
            }

            let body = self
                .http
                .get_json(&url, &query, &[API_VERSION_HEADER], token)
                .await?;
            let batch = body
                .get("opportunities")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let batch_len = batch.len();
            all.extend(batch);

            let next_page = body
                .pointer("/meta/nextPage")
                .and_then(Value::as_u64)
                .map(|p| p as u32);
            match next_page {
                Some(next) if batch_len > 0 && next > page => {
                    if next > MAX_PAGES {
                        warn!(pages = MAX_PAGES, "Opportunity pagination limit reached, truncating");
                        break;
                    }
                    page = next;
                }
                _ => break,
            }
        }
        Ok(all)
    }
}

#[async_trait]
impl SourceAdapter for CrmAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Crm
    }

    async fn fetch_range(
        &self,
        config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, SyncError> {
        let SourceConfig::Crm(crm) = &config.source else {
            return Err(SyncError::Config("crm adapter given a non-crm config".to_string()));
        };
        config.source.validate()?;

        let (appointments, opportunities) = self
            .auth
            .authorized(&config.base.credentials_ref, move |token| async move {
                let appointments = if crm.include_appointments {
                    self.fetch_appointments(crm, start, end, &token).await?
                } else {
                    Vec::new()
                };
                let opportunities = if crm.include_opportunities {
                    self.fetch_opportunities(crm, start, end, &token).await?
                } else {
                    Vec::new()
                };
                Ok::<_, SyncError>((appointments, opportunities))
            })
            .await?;

        let mut records: Vec<RawRecord> = appointments
            .iter()
            .enumerate()
            .filter_map(|(i, e)| appointment_to_record(e, i))
            .collect();
        let offset = appointments.len();
        records.extend(
            opportunities
                .iter()
                .enumerate()
                .filter_map(|(i, o)| opportunity_to_record(o, offset + i)),
        );
        retain_in_range(&mut records, start, end);

        debug!(
            location = %crm.location_id,
            appointments = appointments.len(),
            opportunities = opportunities.len(),
            kept = records.len(),
            "Fetched CRM events"
        );
        Ok(records)
    }
}
