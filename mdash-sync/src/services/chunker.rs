//! Date-range chunking, concurrent chunk fetch and ordered merge
//!
//! Ranges longer than `max_chunk_days` are split into contiguous chunks.
//! Chunk fetches start `stagger` apart and run concurrently; results are
//! sorted by chunk start before merging so `Last` rules do not depend on
//! network completion order.

use crate::adapters::SourceAdapter;
use crate::error::SyncError;
use crate::models::{DailyMetricRecord, MetricSet, RawRecord, SyncConfig};
use crate::services::normalizer::Normalizer;
use chrono::{Duration as ChronoDuration, NaiveDate};
use futures::future::join_all;
use mdash_common::time::days_inclusive;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Inclusive sub-range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateChunk {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateChunk {
    pub fn days(&self) -> u32 {
        days_inclusive(self.start, self.end)
    }
}

/// Split `[start, end]` into contiguous chunks of at most `max_days`
///
/// `start == end` is one single-day chunk. A reversed range or zero
/// `max_days` is a configuration error.
pub fn plan_chunks(start: NaiveDate, end: NaiveDate, max_days: u32) -> Result<Vec<DateChunk>, SyncError> {
    if end < start {
        return Err(SyncError::Config(format!(
            "invalid date range: {} is after {}",
            start, end
        )));
    }
    if max_days == 0 {
        return Err(SyncError::Config("max chunk days must be at least 1".to_string()));
    }

    let mut chunks = Vec::new();
    let mut chunk_start = start;
    while chunk_start <= end {
        let candidate = chunk_start + ChronoDuration::days(max_days as i64 - 1);
        let chunk_end = candidate.min(end);
        chunks.push(DateChunk {
            start: chunk_start,
            end: chunk_end,
        });
        chunk_start = chunk_end + ChronoDuration::days(1);
    }
    Ok(chunks)
}

/// Aggregate of one chunk
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk: DateChunk,
    pub raw_count: usize,
    pub totals: MetricSet,
}

/// Merged result of a ranged fetch
#[derive(Debug, Clone)]
pub struct AggregateMetrics {
    /// Chunk aggregates in date order
    pub chunks: Vec<ChunkResult>,
    /// One record per date with data
    pub records: Vec<DailyMetricRecord>,
    /// Whole-range totals
    pub totals: MetricSet,
    /// Raw rows in date order (individual-records mode)
    pub raw: Vec<RawRecord>,
}

impl AggregateMetrics {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Fetch + normalize + aggregate over arbitrary ranges
pub struct RangeFetcher {
    adapter: Arc<dyn SourceAdapter>,
    stagger: Duration,
    user_id: Option<String>,
}

impl RangeFetcher {
    pub fn new(adapter: Arc<dyn SourceAdapter>, stagger: Duration) -> Self {
        Self {
            adapter,
            stagger,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub async fn fetch_chunked(
        &self,
        config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
        max_chunk_days: u32,
    ) -> Result<AggregateMetrics, SyncError> {
        let chunks = plan_chunks(start, end, max_chunk_days)?;
        let started = Instant::now();

        let mut fetched: Vec<(DateChunk, Vec<RawRecord>)> = if chunks.len() == 1 {
            let chunk = chunks[0];
            let raw = self.adapter.fetch_range(config, chunk.start, chunk.end).await?;
            vec![(chunk, raw)]
        } else {
            info!(
                source = %config.kind(),
                chunks = chunks.len(),
                %start,
                %end,
                "Fetching range in chunks"
            );
            let futures = chunks.iter().enumerate().map(|(i, chunk)| {
                let delay = self.stagger * i as u32;
                let chunk = *chunk;
                async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    debug!(chunk_start = %chunk.start, chunk_end = %chunk.end, "Fetching chunk");
                    let raw = self.adapter.fetch_range(config, chunk.start, chunk.end).await;
                    (chunk, raw)
                }
            });

            let mut results = join_all(futures).await;
            results.sort_by_key(|(chunk, _)| chunk.start);

            let mut fetched = Vec::with_capacity(results.len());
            for (chunk, raw) in results {
                fetched.push((chunk, raw?));
            }
            fetched
        };
        fetched.sort_by_key(|(chunk, _)| chunk.start);

        let aggregate = self.merge(config, fetched);
        debug!(
            source = %config.kind(),
            chunks = aggregate.chunks.len(),
            records = aggregate.records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Range fetch merged"
        );
        Ok(aggregate)
    }

    /// Normalize each chunk, then fold day sets and chunk totals in order
    fn merge(&self, config: &SyncConfig, fetched: Vec<(DateChunk, Vec<RawRecord>)>) -> AggregateMetrics {
        let normalizer = Normalizer::new(config.project_id, config.kind(), &config.mapping)
            .with_user(self.user_id.clone());
        let rules = normalizer.rules().clone();

        let mut days: BTreeMap<NaiveDate, (MetricSet, Map<String, Value>)> = BTreeMap::new();
        let mut chunks = Vec::with_capacity(fetched.len());
        let mut raw_all = Vec::new();

        for (chunk, raw) in fetched {
            let day_sets = normalizer.daily_sets(&raw);
            let totals = MetricSet::merge_all(day_sets.values().map(|(set, _)| set), &rules);

            for (date, (set, extra)) in day_sets {
                let entry = days.entry(date).or_default();
                entry.0.merge(&set, &rules);
                entry.1.extend(extra);
            }

            chunks.push(ChunkResult {
                chunk,
                raw_count: raw.len(),
                totals,
            });
            raw_all.extend(raw);
        }

        let totals = MetricSet::merge_all(chunks.iter().map(|c| &c.totals), &rules);
        let synced_at = chrono::Utc::now();
        let records = days
            .into_iter()
            .map(|(date, (metrics, extra))| DailyMetricRecord {
                project_id: config.project_id,
                date,
                source: config.kind(),
                metrics,
                extra,
                user_id: self.user_id.clone(),
                synced_at,
            })
            .collect();

        AggregateMetrics {
            chunks,
            records,
            totals,
            raw: raw_all,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldMapping, SheetSourceConfig, SourceBase, SourceConfig, SourceKind, SyncCadence};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Later chunks answer sooner; records completion order
    struct ReversedLatency {
        base: NaiveDate,
        completed: Mutex<Vec<NaiveDate>>,
    }

    #[async_trait]
    impl SourceAdapter for ReversedLatency {
        fn kind(&self) -> SourceKind {
            SourceKind::Sheet
        }

        async fn fetch_range(
            &self,
            _config: &SyncConfig,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<RawRecord>, SyncError> {
            let offset = (start - self.base).num_days() as u64;
            tokio::time::sleep(Duration::from_millis(1000 - offset * 10)).await;
            self.completed.lock().unwrap().push(start);

            let mut rows = Vec::new();
            let mut date = start;
            while date <= end {
                let n = (date - self.base).num_days() as f64 + 1.0;
                rows.push(
                    RawRecord::new(date, 0)
                        .with_field("impressions", 100.0 * n)
                        .with_field("clicks", n)
                        .with_field("daily_budget", n),
                );
                date += ChronoDuration::days(1);
            }
            Ok(rows)
        }
    }

    fn sheet_config() -> SyncConfig {
        SyncConfig::new(
            Uuid::new_v4(),
            SourceBase {
                credentials_ref: "sheet".to_string(),
                active: true,
                cadence: SyncCadence::Manual,
            },
            SourceConfig::Sheet(SheetSourceConfig {
                spreadsheet_id: "sheet-1".to_string(),
                sheet_name: "Daily".to_string(),
                range: None,
                date_column: "date".to_string(),
            }),
            FieldMapping::default(),
        )
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_plan_65_days_by_30() {
        let start = d(2024, 1, 1);
        let end = start + ChronoDuration::days(64);
        let chunks = plan_chunks(start, end, 30).unwrap();
        let sizes: Vec<u32> = chunks.iter().map(|c| c.days()).collect();
        assert_eq!(sizes, vec![30, 30, 5]);
        assert_eq!(chunks[0].start, start);
        assert_eq!(chunks[2].end, end);
        // Contiguous, non-overlapping
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end + ChronoDuration::days(1), pair[1].start);
        }
    }

    #[test]
    fn test_plan_single_day() {
        let day = d(2024, 3, 1);
        assert_eq!(
            plan_chunks(day, day, 30).unwrap(),
            vec![DateChunk { start: day, end: day }]
        );
    }

    #[test]
    fn test_plan_exact_multiple() {
        let chunks = plan_chunks(d(2024, 1, 1), d(2024, 1, 20), 10).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].start, d(2024, 1, 11));
    }

    #[test]
    fn test_plan_rejects_reversed_and_zero() {
        assert!(plan_chunks(d(2024, 1, 2), d(2024, 1, 1), 30).is_err());
        assert!(plan_chunks(d(2024, 1, 1), d(2024, 1, 2), 0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_merge_in_date_order_despite_completion_order() {
        let base = d(2024, 1, 1);
        let end = d(2024, 1, 9);
        let adapter = Arc::new(ReversedLatency {
            base,
            completed: Mutex::new(Vec::new()),
        });
        let fetcher = RangeFetcher::new(adapter.clone(), Duration::ZERO);
        let config = sheet_config();

        let chunked = fetcher.fetch_chunked(&config, base, end, 3).await.unwrap();

        let completed = adapter.completed.lock().unwrap().clone();
        assert_eq!(completed, vec![d(2024, 1, 7), d(2024, 1, 4), d(2024, 1, 1)]);
        let starts: Vec<NaiveDate> = chunked.chunks.iter().map(|c| c.chunk.start).collect();
        assert_eq!(starts, vec![d(2024, 1, 1), d(2024, 1, 4), d(2024, 1, 7)]);
        assert_eq!(chunked.chunks[0].totals.get("daily_budget"), Some(3.0));
        assert_eq!(chunked.chunks[2].raw_count, 3);

        // Last-value field takes the final day, not the first chunk to finish
        assert_eq!(chunked.totals.get("daily_budget"), Some(9.0));
        assert_eq!(chunked.totals.get("impressions"), Some(4500.0));
        assert_eq!(chunked.totals.get("clicks"), Some(45.0));

        let single = fetcher.fetch_chunked(&config, base, end, 9).await.unwrap();
        assert_eq!(single.chunk_count(), 1);
        assert_eq!(single.totals.get("daily_budget"), chunked.totals.get("daily_budget"));
        let ctr_single = single.totals.get("ctr").unwrap();
        let ctr_chunked = chunked.totals.get("ctr").unwrap();
        assert!((ctr_single - ctr_chunked).abs() < 1e-9);
        assert!((ctr_chunked - 1.0).abs() < 1e-9);
    }
}
