//! Ads insights API adapter
//!
//! Calls `GET {base}/{version}/act_{account}/insights` with a daily
//! `time_increment` and follows `paging.next` cursors. `actions` and
//! `action_values` arrays are flattened to `action:<type>` and
//! `action_value:<type>` fields.

use crate::adapters::auth::TokenRefresher;
use crate::adapters::http::HttpClient;
use crate::adapters::{retain_in_range, SourceAdapter};
use crate::error::SyncError;
use crate::models::{AdsSourceConfig, RawRecord, SourceConfig, SourceKind, SyncConfig};
use async_trait::async_trait;
use chrono::NaiveDate;
use mdash_common::time::parse_iso_date;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_FIELDS: &[&str] = &[
    "impressions",
    "clicks",
    "spend",
    "reach",
    "actions",
    "action_values",
];
const PAGE_LIMIT: u32 = 500;
/// Guard against cursor loops
const MAX_PAGES: usize = 200;

pub struct AdsAdapter {
    http: Arc<HttpClient>,
    auth: Arc<TokenRefresher>,
    base_url: String,
    api_version: String,
}

impl AdsAdapter {
    pub fn new(
        http: Arc<HttpClient>,
        auth: Arc<TokenRefresher>,
        base_url: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            http,
            auth,
            base_url: base_url.into(),
            api_version: api_version.into(),
        }
    }

    fn insights_url(&self, ads: &AdsSourceConfig) -> String {
        format!(
            "{}/{}/act_{}/insights",
            self.base_url.trim_end_matches('/'),
            self.api_version.trim_matches('/'),
            ads.normalized_account_id()
        )
    }

    fn first_page_query(ads: &AdsSourceConfig, start: NaiveDate, end: NaiveDate) -> Vec<(&'static str, String)> {
        let mut fields: Vec<String> = DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect();
        for extra in &ads.fields {
            if !fields.contains(extra) {
                fields.push(extra.clone());
            }
        }
        vec![
            ("level", ads.level.clone()),
            ("fields", fields.join(",")),
            (
                "time_range",
                json!({ "since": start.to_string(), "until": end.to_string() }).to_string(),
            ),
            ("time_increment", "1".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ]
    }

    async fn fetch_pages(
        &self,
        first_url: &str,
        first_query: &[(&'static str, String)],
        token: &str,
    ) -> Result<Vec<Value>, SyncError> {
        let mut rows = Vec::new();
        let mut body = self.http.get_json(first_url, first_query, &[], token).await?;

        for page in 1..=MAX_PAGES {
            if let Some(data) = body.get("data").and_then(Value::as_array) {
                rows.extend(data.iter().cloned());
            }
            let next = body
                .pointer("/paging/next")
                .and_then(Value::as_str)
                .map(str::to_string);
            match next {
                Some(next_url) if page < MAX_PAGES => {
                    // Cursor URLs carry every query parameter already
                    body = self.http.get_json(&next_url, &[], &[], token).await?;
                }
                Some(_) => {
                    warn!(pages = MAX_PAGES, "Ads pagination limit reached, truncating");
                    break;
                }
                None => break,
            }
        }
        Ok(rows)
    }
}

/// One insights row → raw record, `None` if it has no usable date
pub fn insight_to_record(row: &Value, row_index: usize) -> Option<RawRecord> {
    let obj = row.as_object()?;
    let date = obj
        .get("date_start")
        .and_then(Value::as_str)
        .and_then(parse_iso_date)?;

    let mut record = RawRecord::new(date, row_index);
    for (key, value) in obj {
        match key.as_str() {
            "date_start" | "date_stop" => {}
            "actions" | "action_values" => {
                let prefix = if key == "actions" { "action" } else { "action_value" };
                for action in value.as_array().into_iter().flatten() {
                    let (Some(kind), Some(v)) = (
                        action.get("action_type").and_then(Value::as_str),
                        action.get("value"),
                    ) else {
                        continue;
                    };
                    record.fields.insert(format!("{}:{}", prefix, kind), v.clone());
                }
            }
            _ => {
                record.fields.insert(key.clone(), value.clone());
            }
        }
    }
    Some(record)
}

#[async_trait]
impl SourceAdapter for AdsAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Ads
    }

    async fn fetch_range(
        &self,
        config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, SyncError> {
        let SourceConfig::Ads(ads) = &config.source else {
            return Err(SyncError::Config("ads adapter given a non-ads config".to_string()));
        };
        config.source.validate()?;

        let url = self.insights_url(ads);
        let url = url.as_str();
        let query = Self::first_page_query(ads, start, end);
        let query = query.as_slice();

        let rows = self
            .auth
            .authorized(&config.base.credentials_ref, move |token| async move {
                self.fetch_pages(url, query, &token).await
            })
            .await?;

        let mut records: Vec<RawRecord> = rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| insight_to_record(row, i))
            .collect();
        retain_in_range(&mut records, start, end);

        debug!(
            account = %ads.normalized_account_id(),
            rows = records.len(),
            "Fetched ads insights"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insight_flattens_actions() {
        let row = json!({
            "date_start": "2024-01-01",
            "date_stop": "2024-01-01",
            "spend": "50.25",
            "impressions": "1000",
            "actions": [
                {"action_type": "lead", "value": "3"},
                {"action_type": "link_click", "value": "12"}
            ],
            "action_values": [{"action_type": "purchase", "value": "99.5"}]
        });
        let record = insight_to_record(&row, 0).unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(record.fields["spend"], json!("50.25"));
        assert_eq!(record.fields["action:lead"], json!("3"));
        assert_eq!(record.fields["action:link_click"], json!("12"));
        assert_eq!(record.fields["action_value:purchase"], json!("99.5"));
        assert!(!record.fields.contains_key("date_stop"));
    }

    #[test]
    fn test_insight_without_date_is_skipped() {
        assert!(insight_to_record(&json!({"spend": "1"}), 0).is_none());
    }

    #[test]
    fn test_first_page_query() {
        let ads = AdsSourceConfig {
            account_id: "act_42".to_string(),
            level: "campaign".to_string(),
            fields: vec!["spend".to_string(), "cpc".to_string()],
        };
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let query = AdsAdapter::first_page_query(&ads, start, end);
        let get = |k: &str| query.iter().find(|(n, _)| *n == k).map(|(_, v)| v.clone());

        assert_eq!(get("level").as_deref(), Some("campaign"));
        assert_eq!(get("time_increment").as_deref(), Some("1"));
        assert!(get("fields").unwrap().ends_with(",cpc"));
        let range: Value = serde_json::from_str(&get("time_range").unwrap()).unwrap();
        assert_eq!(range["since"], "2024-02-01");
        assert_eq!(range["until"], "2024-02-29");
    }
}
