use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use futures::Future;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, PoisonError};
use strum::Display;
use tokio::sync::oneshot;

/// Caller classification affecting quota and priority treatment.
///
/// Privileged callers bypass the daily-limit check (their usage is still
/// counted) and receive a priority bonus so they are serviced ahead of
/// standard-tier tasks already queued.
#[derive(Display, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
    Standard,
    Privileged,
}

/// Configuration for the rate limiter
#[derive(Clone, Debug)]
pub struct RateLimiterConfig {
    /// Token bucket capacity
    pub max_tokens: u64,
    /// Tokens gained per second
    pub refill_rate: u64,
    /// Upstream calls allowed per calendar day (local time)
    pub daily_limit: u64,
    /// How often the background ticker drains the wait queue
    pub tick_interval: Duration,
    /// Priority added to privileged-tier tasks
    pub privileged_bonus: i64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            refill_rate: 5,
            daily_limit: 5000,
            tick_interval: Duration::milliseconds(200),
            privileged_bonus: 10,
        }
    }
}

/// A queued task waiting for admission. Dropping the permit sender rejects
/// the waiter, so the queue must only drop entries it has decided to admit
/// or abandon.
struct Waiter {
    effective_priority: i64,
    seq: u64,
    enqueued_at: DateTime<Utc>,
    permit: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.effective_priority == other.effective_priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    /// Max-heap order: higher priority first, lower sequence number first
    /// within the same priority (FIFO tie-break).
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.effective_priority
            .cmp(&other.effective_priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct LimiterState {
    available_tokens: u64,
    last_refill_at: DateTime<Utc>,
    daily_call_count: u64,
    daily_window: NaiveDate,
    queue: BinaryHeap<Waiter>,
    next_seq: u64,
}

impl LimiterState {
    fn new(config: &RateLimiterConfig) -> Self {
        Self {
            available_tokens: config.max_tokens,
            last_refill_at: Utc::now(),
            daily_call_count: 0,
            daily_window: Local::now().date_naive(),
            queue: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Lazy refill: `floor(elapsed_ms * refill_rate / 1000)` tokens, capped
    /// at `max_tokens`. `last_refill_at` only advances when at least one
    /// token was gained, so sub-token elapsed time is not discarded.
    fn refill(&mut self, config: &RateLimiterConfig, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.last_refill_at).num_milliseconds();
        if elapsed_ms <= 0 {
            return;
        }

        let gained = elapsed_ms as u64 * config.refill_rate / 1000;
        if gained > 0 {
            self.available_tokens = (self.available_tokens + gained).min(config.max_tokens);
            self.last_refill_at = now;
        }
    }

    /// Reset the daily counter on first access after local midnight.
    fn rollover_daily(&mut self, now: DateTime<Utc>) {
        let today = now.with_timezone(&Local).date_naive();
        if today != self.daily_window {
            log::info!(
                "Daily call window rolled over ({} calls in previous window)",
                self.daily_call_count
            );
            self.daily_window = today;
            self.daily_call_count = 0;
        }
    }

    /// Admit queued waiters while tokens remain, highest effective priority
    /// first. A permit whose receiver is gone refunds its token.
    fn drain(&mut self) {
        while self.available_tokens >= 1 {
            let Some(waiter) = self.queue.pop() else {
                break;
            };
            self.available_tokens -= 1;
            self.daily_call_count += 1;
            let waited_ms = (Utc::now() - waiter.enqueued_at).num_milliseconds();
            if waiter.permit.send(()).is_err() {
                self.available_tokens += 1;
                self.daily_call_count -= 1;
            } else {
                log::debug!(
                    "Admitted queued task (priority {}) after {}ms wait",
                    waiter.effective_priority,
                    waited_ms
                );
            }
        }
    }
}

struct Inner {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill_and_drain(&self) {
        let mut state = self.lock();
        let now = Utc::now();
        state.refill(&self.config, now);
        state.rollover_daily(now);
        state.drain();
    }
}

/// Token-bucket admission control with a priority wait queue and a daily
/// call quota.
///
/// All state lives behind one mutex that is never held across an await, so
/// token count, daily counter and queue are always observed consistently.
/// Must be constructed inside a Tokio runtime; a background ticker drains
/// the queue whenever refilled tokens allow, and stops once the limiter is
/// dropped.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let tick = config
            .tick_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_millis(200));

        let inner = Arc::new(Inner {
            state: Mutex::new(LimiterState::new(&config)),
            config,
        });

        log::info!(
            "Rate limiter initialized (max tokens: {}, refill: {}/s, daily limit: {})",
            inner.config.max_tokens,
            inner.config.refill_rate,
            inner.config.daily_limit
        );

        // The ticker holds a weak handle only, so it exits when the last
        // limiter clone is dropped.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(inner) => inner.refill_and_drain(),
                    None => break,
                }
            }
        });

        Self { inner }
    }

    /// Run `task` under admission control.
    ///
    /// Fails fast with [`Error::QuotaExceeded`] when a standard-tier caller
    /// has exhausted the daily limit; the task is never queued in that case.
    /// With a token available and an empty queue the task runs immediately,
    /// otherwise it waits in the priority queue for the ticker to admit it.
    /// Task failures propagate to this caller only; the consumed token is
    /// not refunded.
    pub async fn schedule<F, Fut, T>(&self, task: F, tier: Tier, priority: i64) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = {
            let mut state = self.inner.lock();
            let now = Utc::now();
            state.refill(&self.inner.config, now);
            state.rollover_daily(now);

            if tier != Tier::Privileged && state.daily_call_count >= self.inner.config.daily_limit
            {
                log::warn!(
                    "Daily quota exhausted ({} calls), rejecting standard-tier task",
                    state.daily_call_count
                );
                return Err(Error::QuotaExceeded {
                    used: state.daily_call_count,
                    limit: self.inner.config.daily_limit,
                });
            }

            let effective_priority = priority
                + if tier == Tier::Privileged {
                    self.inner.config.privileged_bonus
                } else {
                    0
                };

            if state.available_tokens >= 1 && state.queue.is_empty() {
                // Fast path: bypasses the queue entirely.
                state.available_tokens -= 1;
                state.daily_call_count += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.next_seq += 1;
                let seq = state.next_seq;
                state.queue.push(Waiter {
                    effective_priority,
                    seq,
                    enqueued_at: now,
                    permit: tx,
                });
                log::debug!(
                    "Queued {} task (effective priority {}, queue length {})",
                    tier,
                    effective_priority,
                    state.queue.len()
                );
                Some(rx)
            }
        };

        let Some(permit) = permit else {
            return task().await;
        };

        // Privileged callers are not bound to the ticker cadence.
        if tier == Tier::Privileged {
            self.inner.refill_and_drain();
        }

        match permit.await {
            Ok(()) => task().await,
            Err(_) => Err(Error::LimiterClosed),
        }
    }

    /// Get rate limiter statistics
    pub fn stats(&self) -> RateLimiterStats {
        let mut state = self.inner.lock();
        let now = Utc::now();
        state.refill(&self.inner.config, now);
        state.rollover_daily(now);

        RateLimiterStats {
            available_tokens: state.available_tokens,
            daily_call_count: state.daily_call_count,
            daily_limit_remaining: self
                .inner
                .config
                .daily_limit
                .saturating_sub(state.daily_call_count),
            queue_length: state.queue.len(),
        }
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub available_tokens: u64,
    pub daily_call_count: u64,
    pub daily_limit_remaining: u64,
    pub queue_length: usize,
}
