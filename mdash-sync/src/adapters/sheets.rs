//! Spreadsheet values API adapter
//!
//! Reads `GET {base}/v4/spreadsheets/{id}/values/{range}`. The first row is
//! the header; each later row becomes one [`RawRecord`] keyed by header name.
//! The API has no date filter, so rows are filtered client-side.

use crate::adapters::auth::TokenRefresher;
use crate::adapters::http::HttpClient;
use crate::adapters::{retain_in_range, SourceAdapter};
use crate::error::SyncError;
use crate::models::{RawRecord, SheetSourceConfig, SourceConfig, SourceKind, SyncConfig};
use async_trait::async_trait;
use chrono::NaiveDate;
use mdash_common::time::parse_flexible_date;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SheetAdapter {
    http: Arc<HttpClient>,
    auth: Arc<TokenRefresher>,
    base_url: String,
}

impl SheetAdapter {
    pub fn new(http: Arc<HttpClient>, auth: Arc<TokenRefresher>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            auth,
            base_url: base_url.into(),
        }
    }

    fn values_url(&self, sheet: &SheetSourceConfig) -> Result<String, SyncError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SyncError::Config(format!("invalid sheets base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Config("sheets base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", sheet.spreadsheet_id.trim(), "values"])
            .push(&sheet.a1_range());
        Ok(url.to_string())
    }
}

/// Header row plus data rows → raw records (sheet row numbers, 1-based)
pub fn rows_to_records(values: &[Value], date_column: &str) -> Result<Vec<RawRecord>, SyncError> {
    let Some(header_row) = values.first().and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row
        .iter()
        .map(|h| h.as_str().map(str::trim).unwrap_or_default().to_string())
        .collect();

    let date_idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(date_column.trim()))
        .ok_or_else(|| {
            SyncError::Config(format!("date column '{}' not found in sheet header", date_column))
        })?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (i, row) in values.iter().enumerate().skip(1) {
        let Some(cells) = row.as_array() else { continue };
        let row_number = i + 1;

        let date_text = match cells.get(date_idx) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        if date_text.trim().is_empty() && cells.iter().all(is_blank) {
            continue;
        }
        let Some(date) = parse_flexible_date(&date_text) else {
            skipped += 1;
            debug!(row = row_number, value = %date_text, "Unparseable sheet date, skipping row");
            continue;
        };

        let mut record = RawRecord::new(date, row_number);
        for (idx, header) in headers.iter().enumerate() {
            if idx == date_idx || header.is_empty() {
                continue;
            }
            if let Some(cell) = cells.get(idx).filter(|c| !is_blank(c)) {
                record.fields.insert(header.clone(), cell.clone());
            }
        }
        records.push(record);
    }

    if skipped > 0 {
        warn!(skipped, "Sheet rows skipped due to unparseable dates");
    }
    Ok(records)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[async_trait]
impl SourceAdapter for SheetAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Sheet
    }

    async fn fetch_range(
        &self,
        config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, SyncError> {
        let SourceConfig::Sheet(sheet) = &config.source else {
            return Err(SyncError::Config("sheet adapter given a non-sheet config".to_string()));
        };
        config.source.validate()?;

        let url = self.values_url(sheet)?;
        let url = url.as_str();
        let query = [("valueRenderOption", "FORMATTED_VALUE".to_string())];
        let query = &query;
        let http = &self.http;

        let body = self
            .auth
            .authorized(&config.base.credentials_ref, move |token| async move {
                http.get_json(url, query, &[], &token).await
            })
            .await?;

        let values = body
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut records = rows_to_records(&values, &sheet.date_column)?;
        retain_in_range(&mut records, start, end);
        debug!(
            spreadsheet = %sheet.spreadsheet_id,
            rows = records.len(),
            "Fetched sheet rows"
        );
        Ok(records)
    }
}
