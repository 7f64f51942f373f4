//! Bounded TTL cache for remote fetches
//!
//! One [`TtlCache`] instance is created at startup and injected where needed;
//! tests build their own. Entries are never served at or past `expires_at`.
//! When an insertion pushes the entry count over `max_entries`, expired
//! entries are purged first, then the oldest 20% by insertion time.

use mdash_common::config::CacheConfig;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Cache size and expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(300),
        }
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            ttl: Duration::from_secs(config.ttl_seconds),
        }
    }
}

/// Canonical key: operation name plus sorted `k=v` parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    operation: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operation)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
    /// Insertion order
    seq: u64,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Time-expiring, size-bounded memoization map
pub struct TtlCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    settings: CacheSettings,
    next_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            settings,
            next_seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// Unexpired value for `key`, removing it if expired
    pub async fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            expires_at: now + ttl,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let mut entries = self.entries.lock().await;
        entries.insert(key.into(), entry);
        if entries.len() > self.settings.max_entries {
            Self::evict(&mut entries, self.settings.max_entries, now);
        }
    }

    fn evict(entries: &mut HashMap<String, CacheEntry<T>>, max_entries: usize, now: Instant) {
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let expired = before - entries.len();

        let len = entries.len();
        let mut evicted = 0;
        if len > max_entries {
            let count = len.div_ceil(5).max(len - max_entries);
            let mut by_age: Vec<(u64, String)> =
                entries.iter().map(|(k, e)| (e.seq, k.clone())).collect();
            by_age.sort_unstable();
            for (_, key) in by_age.into_iter().take(count) {
                entries.remove(&key);
                evicted += 1;
            }
        }

        debug!(expired, evicted, remaining = entries.len(), "Cache eviction");
    }

    /// Cached value, or the result of `fetch` stored under `key`
    ///
    /// `fetch` runs at most once per call and outside the lock. Errors are
    /// returned to the caller and never cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, ttl: Option<Duration>, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache hit");
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Cache miss");

        let value = fetch().await?;
        self.insert(key, value.clone(), ttl.unwrap_or(self.settings.ttl))
            .await;
        Ok(value)
    }

    /// Drop every entry (manual sync, tests)
    pub async fn clear_all(&self) {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        debug!(count, "Cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
