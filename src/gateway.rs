use crate::cache::{CacheConfig, CacheStats, ResultCache, SharedResultCache};
use crate::deduplication::{
    DeduplicationConfig, DeduplicationStats, RequestDeduplicator, SharedRequestDeduplicator,
};
use crate::error::Result;
use crate::query::Fingerprint;
use crate::rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStats, Tier};
use chrono::Duration;
use futures::Future;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for the gateway and its components
#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    pub cache: CacheConfig,
    pub deduplication: DeduplicationConfig,
    pub rate_limiter: RateLimiterConfig,
}

/// Per-call options for [`Gateway::fetch`]
#[derive(Clone, Debug)]
pub struct FetchOptions {
    /// Cache TTL override for this call's result
    pub ttl: Option<Duration>,
    /// Base priority when the call has to wait in the rate limiter queue
    pub priority: i64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            priority: 1,
        }
    }
}

/// Composed access-control layer in front of a scarce upstream API.
///
/// One `fetch` goes: cache lookup (hits are free), then request
/// deduplication, then token-bucket admission inside the deduplicated slot,
/// then the caller-supplied upstream call. Successful results populate the
/// cache exactly once per upstream call.
///
/// Construct one instance per process and hand clones to request handlers;
/// there are no module-level singletons. Must be created inside a Tokio
/// runtime (the rate limiter spawns its drain ticker).
#[derive(Clone)]
pub struct Gateway<T> {
    cache: SharedResultCache<T>,
    pooling: SharedRequestDeduplicator<T>,
    rate_limiter: RateLimiter,
}

impl<T> Default for Gateway<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

impl<T> Gateway<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            cache: Arc::new(ResultCache::new(config.cache)),
            pooling: Arc::new(RequestDeduplicator::new(config.deduplication)),
            rate_limiter: RateLimiter::new(config.rate_limiter),
        }
    }

    /// Fetch the result for `fingerprint`, calling `upstream` at most once
    /// across all concurrent callers with the same fingerprint.
    ///
    /// Cache hits return immediately without touching the deduplicator or
    /// the rate limiter. Errors propagate unchanged and never populate the
    /// cache; the deduplication entry is still cleaned up after its grace
    /// period, so an immediate retry is possible.
    pub async fn fetch<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        tier: Tier,
        upstream: F,
        options: FetchOptions,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(value) = self.cache.get(&fingerprint) {
            return Ok(value);
        }

        let rate_limiter = self.rate_limiter.clone();
        let cache = Arc::clone(&self.cache);
        let key = fingerprint.clone();
        let ttl = options.ttl;
        let priority = options.priority;

        // The cache write lives inside the deduplicated slot so exactly one
        // write happens per upstream call, not one per attached caller.
        self.pooling
            .run(fingerprint, move || async move {
                let value = rate_limiter.schedule(upstream, tier, priority).await?;
                cache.set(key, value.clone(), ttl);
                Ok(value)
            })
            .await
    }

    /// Snapshot of all component statistics, the shape an external stats
    /// endpoint serializes.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache: self.cache.stats(),
            pooling: self.pooling.stats(),
            rate_limiter: self.rate_limiter.stats(),
        }
    }

    /// Administrative cache invalidation.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Combined statistics for the gateway's components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStats {
    pub cache: CacheStats,
    pub pooling: DeduplicationStats,
    pub rate_limiter: RateLimiterStats,
}
