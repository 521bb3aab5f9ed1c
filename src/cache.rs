use crate::query::Fingerprint;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Configuration for the result cache
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long to keep results in cache unless overridden per call
    pub ttl: Duration,
    /// Whether caching is enabled
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(1800),
            enabled: true,
        }
    }
}

/// Cached result with its expiry
#[derive(Clone, Debug)]
struct CacheEntry<T> {
    value: T,
    expires_at: DateTime<Utc>,
    approx_bytes: u64,
}

impl<T> CacheEntry<T> {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// In-memory TTL cache keyed by request fingerprint.
///
/// Entries are created on successful upstream completion and never updated
/// in place; expiry is lazy (checked on `get`). There is no eviction beyond
/// TTL since the key space is bounded by distinct user queries.
pub struct ResultCache<T> {
    entries: DashMap<Fingerprint, CacheEntry<T>>,
    config: CacheConfig,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    size_bytes: AtomicU64,
}

impl<T: Clone + Serialize> ResultCache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            size_bytes: AtomicU64::new(0),
        }
    }

    /// Get the cached value if present and not expired.
    pub fn get(&self, key: &Fingerprint) -> Option<T> {
        if !self.config.enabled {
            return None;
        }

        if let Some(entry) = self.entries.get(key) {
            if entry.is_valid() {
                log::debug!("Cache hit for key: {}", key);
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            let bytes = entry.approx_bytes;
            drop(entry);
            log::debug!("Cache expired for key: {}", key);
            if self.entries.remove(key).is_some() {
                self.size_bytes.fetch_sub(bytes, Ordering::Relaxed);
            }
        }

        log::debug!("Cache miss for key: {}", key);
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value unconditionally, overwriting any previous entry.
    /// `ttl` falls back to the configured default when `None`.
    pub fn set(&self, key: Fingerprint, value: T, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }

        let ttl = ttl.unwrap_or(self.config.ttl);
        let approx_bytes = serde_json::to_vec(&value)
            .map(|v| v.len() as u64)
            .unwrap_or(0);

        let entry = CacheEntry {
            value,
            expires_at: Utc::now() + ttl,
            approx_bytes,
        };

        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            self.size_bytes
                .fetch_sub(previous.approx_bytes, Ordering::Relaxed);
        }
        self.size_bytes.fetch_add(approx_bytes, Ordering::Relaxed);
        log::debug!("Stored in cache with key: {}", key);
    }

    /// Clear all entries. Cumulative hit/miss counters are preserved so the
    /// lifetime hit rate stays visible.
    pub fn clear(&self) {
        self.entries.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
        log::info!("Cache cleared");
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            approx_size_bytes: self.size_bytes.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &Fingerprint, by: Duration) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at -= by;
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub approx_size_bytes: u64,
}

/// Thread-safe wrapper for the cache
pub type SharedResultCache<T> = Arc<ResultCache<T>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Fingerprint {
        Fingerprint::from_raw(s)
    }

    #[test]
    fn test_get_within_ttl() {
        let cache = ResultCache::new(CacheConfig::default());
        cache.set(key("k"), 42u32, Some(Duration::seconds(1)));
        assert_eq!(cache.get(&key("k")), Some(42));
    }

    #[test]
    fn test_expired_entry_absent() {
        let cache = ResultCache::new(CacheConfig::default());
        cache.set(key("k"), 42u32, Some(Duration::seconds(1)));

        // Push the expiry just past now, as if 1001ms had elapsed.
        cache.backdate(&key("k"), Duration::milliseconds(1001));

        assert_eq!(cache.get(&key("k")), None);
        // Lazy removal happened on the expired get.
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn test_hit_miss_counters() {
        let cache = ResultCache::new(CacheConfig::default());
        assert_eq!(cache.get(&key("missing")), None);
        cache.set(key("k"), "v".to_string(), None);
        cache.get(&key("k"));
        cache.get(&key("k"));

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
    }

    #[test]
    fn test_overwrite_adjusts_size() {
        let cache = ResultCache::new(CacheConfig::default());
        cache.set(key("k"), "aaaaaaaaaa".to_string(), None);
        let first = cache.stats().approx_size_bytes;
        cache.set(key("k"), "a".to_string(), None);
        let second = cache.stats().approx_size_bytes;

        assert!(second < first);
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn test_clear_preserves_counters() {
        let cache = ResultCache::new(CacheConfig::default());
        cache.set(key("k"), 1u8, None);
        cache.get(&key("k"));
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.approx_size_bytes, 0);
        assert_eq!(stats.hit_count, 1);
    }

    #[test]
    fn test_disabled_cache_is_transparent() {
        let cache = ResultCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.set(key("k"), 1u8, None);
        assert_eq!(cache.get(&key("k")), None);
        assert_eq!(cache.stats().entry_count, 0);
    }
}
