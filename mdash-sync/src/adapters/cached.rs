//! Cache-fronted adapter with rate-limit cooldown
//!
//! After a source throttles an account, further calls for that account fail
//! fast with `RateLimited` until the cooldown passes instead of hitting the
//! source again.

use crate::adapters::SourceAdapter;
use crate::error::SyncError;
use crate::models::{RawRecord, SourceKind, SyncConfig};
use crate::services::cache::{CacheKey, TtlCache};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Shared cache of raw fetch results
pub type RawCache = TtlCache<Arc<Vec<RawRecord>>>;

/// Cooldown when the source gives no `Retry-After`
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

pub struct CachedSource {
    inner: Arc<dyn SourceAdapter>,
    cache: Arc<RawCache>,
    cooldowns: Mutex<HashMap<String, Instant>>,
}

impl CachedSource {
    pub fn new(inner: Arc<dyn SourceAdapter>, cache: Arc<RawCache>) -> Self {
        Self {
            inner,
            cache,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    fn cooldown_key(&self, config: &SyncConfig) -> String {
        format!("{}:{}", self.inner.kind(), config.source.account_key())
    }

    /// Canonical cache key for one range fetch
    pub fn cache_key(config: &SyncConfig, start: NaiveDate, end: NaiveDate) -> String {
        CacheKey::new("fetch_range")
            .param("source", config.kind())
            .param("account", config.source.account_key())
            .param("config", config.config_id)
            .param("start", start)
            .param("end", end)
            .to_string()
    }

    async fn check_cooldown(&self, key: &str) -> Result<(), SyncError> {
        let mut cooldowns = self.cooldowns.lock().await;
        let now = Instant::now();
        match cooldowns.get(key) {
            Some(until) if *until > now => Err(SyncError::RateLimited {
                retry_after: Some(*until - now),
            }),
            Some(_) => {
                cooldowns.remove(key);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Source fetch on a cache miss, honouring and recording cooldowns
    async fn fetch_uncached(
        &self,
        cooldown_key: &str,
        config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Arc<Vec<RawRecord>>, SyncError> {
        self.check_cooldown(cooldown_key).await?;

        match self.inner.fetch_range(config, start, end).await {
            Ok(records) => Ok(Arc::new(records)),
            Err(SyncError::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(DEFAULT_COOLDOWN);
                warn!(
                    account = %cooldown_key,
                    wait_secs = wait.as_secs(),
                    "Source throttled, cooling down"
                );
                self.cooldowns
                    .lock()
                    .await
                    .insert(cooldown_key.to_string(), Instant::now() + wait);
                Err(SyncError::RateLimited { retry_after })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SourceAdapter for CachedSource {
    fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    async fn fetch_range(
        &self,
        config: &SyncConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, SyncError> {
        let key = Self::cache_key(config, start, end);
        let cooldown_key = self.cooldown_key(config);

        let records = self
            .cache
            .get_or_fetch(&key, None, || self.fetch_uncached(&cooldown_key, config, start, end))
            .await?;
        Ok(records.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdsSourceConfig, FieldMapping, SourceBase, SourceConfig, SyncCadence};
    use crate::services::cache::CacheSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Throttled {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for Throttled {
        fn kind(&self) -> SourceKind {
            SourceKind::Ads
        }
        async fn fetch_range(
            &self,
            _config: &SyncConfig,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<RawRecord>, SyncError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(SyncError::RateLimited {
                    retry_after: Some(Duration::from_secs(30)),
                })
            } else {
                Ok(vec![RawRecord::new(start, 0).with_field("spend", 1)])
            }
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::new(
            Uuid::new_v4(),
            SourceBase {
                credentials_ref: "ads".to_string(),
                active: true,
                cadence: SyncCadence::Manual,
            },
            SourceConfig::Ads(AdsSourceConfig {
                account_id: "123".to_string(),
                level: "account".to_string(),
                fields: vec![],
            }),
            FieldMapping::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_until_elapsed() {
        let inner = Arc::new(Throttled {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(RawCache::new(CacheSettings::default()));
        let source = CachedSource::new(inner.clone(), cache);
        let config = config();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        assert!(matches!(
            source.fetch_range(&config, day, day).await,
            Err(SyncError::RateLimited { .. })
        ));
        // Fails fast without calling the source
        assert!(matches!(
            source.fetch_range(&config, day, day).await,
            Err(SyncError::RateLimited { .. })
        ));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let rows = source.fetch_range(&config, day, day).await.unwrap();
        assert_eq!(rows.len(), 1);

        // Cached now
        source.fetch_range(&config, day, day).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_counted_in_stats() {
        let inner = Arc::new(Throttled {
            calls: AtomicUsize::new(1),
        });
        let cache = Arc::new(RawCache::new(CacheSettings::default()));
        let source = CachedSource::new(inner.clone(), cache.clone());
        let config = config();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        for _ in 0..3 {
            source.fetch_range(&config, day, day).await.unwrap();
        }

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }
}
