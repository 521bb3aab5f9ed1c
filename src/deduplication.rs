use crate::error::Result;
use crate::query::Fingerprint;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::{Future, FutureExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Configuration for request deduplication
#[derive(Clone, Debug)]
pub struct DeduplicationConfig {
    /// How long a settled call stays registered, to absorb near-simultaneous
    /// duplicates arriving just after completion
    pub grace_period: Duration,
    /// Whether deduplication is enabled
    pub enabled: bool,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::seconds(10),
            enabled: true,
        }
    }
}

type SharedCall<T> = Shared<BoxFuture<'static, Result<T>>>;

/// An in-flight (or recently settled) upstream call.
struct PendingCall<T> {
    /// Distinguishes this call from a later one reusing the slot, so cleanup
    /// never removes an entry it did not create.
    id: u64,
    call: SharedCall<T>,
    created_at: DateTime<Utc>,
}

/// Request deduplication system.
///
/// At most one upstream call runs per fingerprint; concurrent callers with
/// the same fingerprint attach to the pending call and share its outcome,
/// success or failure alike.
pub struct RequestDeduplicator<T> {
    pending: Arc<DashMap<Fingerprint, PendingCall<T>>>,
    next_id: AtomicU64,
    config: DeduplicationConfig,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: DeduplicationConfig) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            config,
        }
    }

    /// Execute `factory` with deduplication.
    ///
    /// If a call for `key` is already registered, the returned future
    /// attaches to it and `factory` is never invoked. Otherwise `factory`
    /// runs exactly once and its outcome is shared with every attached
    /// caller. The registration is removed a grace period after the call
    /// settles, whether it succeeded or failed.
    pub async fn run<F, Fut>(&self, key: Fingerprint, factory: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.config.enabled {
            return factory().await;
        }

        let call = match self.pending.entry(key.clone()) {
            Entry::Occupied(existing) => {
                log::debug!("Attaching to pending call for key: {}", key);
                existing.get().call.clone()
            }
            Entry::Vacant(slot) => {
                log::debug!("Executing new call for key: {}", key);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let call: SharedCall<T> = factory().boxed().shared();
                slot.insert(PendingCall {
                    id,
                    call: call.clone(),
                    created_at: Utc::now(),
                });
                self.schedule_cleanup(key, id, call.clone());
                call
            }
        };

        call.await
    }

    /// Remove the entry once the call has settled and the grace period has
    /// elapsed. Removal only applies if the slot still holds the same call.
    fn schedule_cleanup(&self, key: Fingerprint, id: u64, call: SharedCall<T>) {
        let pending = Arc::clone(&self.pending);
        let grace = self.config.grace_period.to_std().unwrap_or_default();

        tokio::spawn(async move {
            let _ = call.await;
            tokio::time::sleep(grace).await;
            if let Some((_, removed)) = pending.remove_if(&key, |_, p| p.id == id) {
                log::debug!(
                    "Removed settled call for key {} ({}ms after creation)",
                    key,
                    (Utc::now() - removed.created_at).num_milliseconds()
                );
            }
        });
    }

    /// Get statistics about pending calls
    pub fn stats(&self) -> DeduplicationStats {
        DeduplicationStats {
            active_count: self.pending.len(),
            active_fingerprints: self
                .pending
                .iter()
                .map(|entry| entry.key().to_string())
                .collect(),
        }
    }

    /// Clear all pending registrations
    pub fn clear(&self) {
        self.pending.clear();
        log::info!("Request deduplicator cleared");
    }
}

/// Statistics for request deduplication
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeduplicationStats {
    pub active_count: usize,
    pub active_fingerprints: Vec<String>,
}

/// Thread-safe wrapper for the deduplicator
pub type SharedRequestDeduplicator<T> = Arc<RequestDeduplicator<T>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    fn key(s: &str) -> Fingerprint {
        Fingerprint::from_raw(s)
    }

    fn counting_factory(
        count: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32>> {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(StdDuration::from_millis(50)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_single_invocation_for_concurrent_callers() {
        let dedup = RequestDeduplicator::new(DeduplicationConfig::default());
        let count = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            dedup.run(key("k"), counting_factory(&count, 7)),
            dedup.run(key("k"), counting_factory(&count, 8)),
            dedup.run(key("k"), counting_factory(&count, 9)),
        );

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(c.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_different_keys_not_deduplicated() {
        let dedup = RequestDeduplicator::new(DeduplicationConfig::default());
        let count = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            dedup.run(key("k1"), counting_factory(&count, 1)),
            dedup.run(key("k2"), counting_factory(&count, 2)),
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fresh_call_after_grace_period() {
        let config = DeduplicationConfig {
            grace_period: Duration::milliseconds(50),
            enabled: true,
        };
        let dedup = RequestDeduplicator::new(config);
        let count = Arc::new(AtomicUsize::new(0));

        dedup
            .run(key("k"), counting_factory(&count, 1))
            .await
            .unwrap();

        // Within the grace period the settled call is still attached to.
        let again = dedup
            .run(key("k"), counting_factory(&count, 2))
            .await
            .unwrap();
        assert_eq!(again, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        assert_eq!(dedup.stats().active_count, 0);

        let fresh = dedup
            .run(key("k"), counting_factory(&count, 2))
            .await
            .unwrap();
        assert_eq!(fresh, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_shared_with_all_callers() {
        let dedup: RequestDeduplicator<u32> =
            RequestDeduplicator::new(DeduplicationConfig::default());
        let count = Arc::new(AtomicUsize::new(0));

        let failing = |count: &Arc<AtomicUsize>| {
            let count = Arc::clone(count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(StdDuration::from_millis(50)).await;
                    Err(Error::Upstream("listing service unavailable".into()))
                }
                .boxed()
            }
        };

        let (a, b) = tokio::join!(
            dedup.run(key("k"), failing(&count)),
            dedup.run(key("k"), failing(&count)),
        );

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let expected = Error::Upstream("listing service unavailable".into());
        assert_eq!(a.unwrap_err(), expected);
        assert_eq!(b.unwrap_err(), expected);
    }

    #[tokio::test]
    async fn test_disabled_runs_every_factory() {
        let config = DeduplicationConfig {
            enabled: false,
            ..DeduplicationConfig::default()
        };
        let dedup = RequestDeduplicator::new(config);
        let count = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            dedup.run(key("k"), counting_factory(&count, 1)),
            dedup.run(key("k"), counting_factory(&count, 2)),
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stats_reflect_pending_calls() {
        let dedup = RequestDeduplicator::new(DeduplicationConfig::default());
        let count = Arc::new(AtomicUsize::new(0));

        let pending = dedup.run(key("slow"), counting_factory(&count, 1));
        let stats_probe = async {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            dedup.stats()
        };

        let (result, stats) = tokio::join!(pending, stats_probe);
        result.unwrap();

        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.active_fingerprints, vec!["slow".to_string()]);
    }
}
