//! Source adapters
//!
//! Every external source implements [`SourceAdapter`]: fetch an inclusive
//! date range and return raw rows strictly inside it. "No data" is an empty
//! vector, never an error. Pagination and per-source payload formats stay
//! inside the adapter.

pub mod ads;
pub mod auth;
pub mod cached;
pub mod crm;
pub mod http;
pub mod sheets;

pub use ads::AdsAdapter;
pub use auth::{CredentialStore, Credentials, OAuthClient, TokenRefresher};
pub use cached::{CachedSource, RawCache};
pub use crm::CrmAdapter;
pub use http::HttpClient;
pub use sheets::SheetAdapter;

use crate::error::SyncError;
use crate::models::{RawRecord, SourceKind, SyncConfig};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Uniform fetch contract over one external source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Raw rows dated within `[start, end]`
    async fn fetch_range(
        &self,
        config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, SyncError>;
}

/// Drop rows outside `[start, end]` for sources without native range filters
pub fn retain_in_range(records: &mut Vec<RawRecord>, start: NaiveDate, end: NaiveDate) {
    let before = records.len();
    records.retain(|r| r.date >= start && r.date <= end);
    let dropped = before - records.len();
    if dropped > 0 {
        debug!(dropped, %start, %end, "Filtered rows outside requested range");
    }
}

/// Adapter lookup by source tag
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for its kind
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Same registry with every adapter behind the shared cache
    pub fn cached(&self, cache: Arc<RawCache>) -> Self {
        let adapters = self
            .adapters
            .iter()
            .map(|(kind, adapter)| {
                let wrapped: Arc<dyn SourceAdapter> =
                    Arc::new(CachedSource::new(adapter.clone(), cache.clone()));
                (*kind, wrapped)
            })
            .collect();
        Self { adapters }
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        let mut kinds: Vec<SourceKind> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_retain_in_range_inclusive() {
        let mut records: Vec<RawRecord> = (1..=10).map(|i| RawRecord::new(d(i), i as usize)).collect();
        retain_in_range(&mut records, d(3), d(5));
        let days: Vec<_> = records.iter().map(|r| r.date).collect();
        assert_eq!(days, vec![d(3), d(4), d(5)]);
    }
}
