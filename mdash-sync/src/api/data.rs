//! Stored metric queries

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::db;
use crate::db::metrics::RangeFilter;
use crate::error::{ApiError, ApiResult};
use crate::models::{DailyMetricRecord, IndividualRecord, MetricSet, RuleTable, SourceKind, StorageMode};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub source: Option<SourceKind>,
}

impl RangeQuery {
    fn filter(&self) -> ApiResult<RangeFilter> {
        if self.end < self.start {
            return Err(ApiError::BadRequest(format!(
                "invalid date range: {} is after {}",
                self.start, self.end
            )));
        }
        let filter = RangeFilter::between(self.start, self.end);
        Ok(match self.source {
            Some(source) => filter.with_source(source),
            None => filter,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub storage_mode: StorageMode,
    pub records: Vec<DailyMetricRecord>,
    /// Range totals per source
    pub totals: BTreeMap<SourceKind, BTreeMap<String, f64>>,
}

/// Range totals per source; ratios are derived over the whole range
///
/// Sources without an entry in `rules` fold with the built-in table.
pub fn source_totals(
    records: &[DailyMetricRecord],
    rules: &BTreeMap<SourceKind, RuleTable>,
) -> BTreeMap<SourceKind, BTreeMap<String, f64>> {
    let builtin = RuleTable::builtin();
    let mut by_source: BTreeMap<SourceKind, Vec<&MetricSet>> = BTreeMap::new();
    for record in records {
        by_source.entry(record.source).or_default().push(&record.metrics);
    }
    by_source
        .into_iter()
        .map(|(source, sets)| {
            let table = rules.get(&source).unwrap_or(&builtin);
            (source, MetricSet::merge_all(sets, table).into_values())
        })
        .collect()
}

/// Aggregation rules from each source's active mapping
async fn project_rules(
    state: &AppState,
    project_id: Uuid,
    records: &[DailyMetricRecord],
) -> ApiResult<BTreeMap<SourceKind, RuleTable>> {
    let sources: BTreeSet<SourceKind> = records.iter().map(|r| r.source).collect();
    let mut rules = BTreeMap::new();
    for source in sources {
        if let Some(config) = db::configs::active_config(&state.db, project_id, source).await? {
            let maps = config.mapping.effective_fields(source);
            rules.insert(source, RuleTable::from_field_maps(&maps));
        }
    }
    Ok(rules)
}

/// GET /projects/:project_id/metrics
pub async fn get_metrics(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<MetricsResponse>> {
    let filter = query.filter()?;
    let storage_mode = db::projects::get_storage_mode(&state.db, project_id).await?;
    let records = db::metrics::query_daily(&state.db, project_id, &filter).await?;
    let rules = project_rules(&state, project_id, &records).await?;
    let totals = source_totals(&records, &rules);
    Ok(Json(MetricsResponse {
        storage_mode,
        records,
        totals,
    }))
}

/// GET /projects/:project_id/records
pub async fn get_records(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<IndividualRecord>>> {
    let filter = query.filter()?;
    let records = db::records::query_individual(&state.db, project_id, &filter).await?;
    Ok(Json(records))
}

pub fn data_routes() -> Router<AppState> {
    Router::new()
        .route("/projects/:project_id/metrics", get(get_metrics))
        .route("/projects/:project_id/records", get(get_records))
}
