/// Errors surfaced by the gateway and its components.
///
/// `Clone` is required so the deduplicator can fan a single failure out to
/// every caller attached to the same pending call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The daily upstream quota is exhausted for a standard-tier caller.
    /// Reported synchronously; the task is never queued.
    #[error("daily call quota exceeded ({used}/{limit})")]
    QuotaExceeded { used: u64, limit: u64 },

    /// The caller-supplied upstream call failed; the message is propagated
    /// verbatim to all attached callers.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// The rate limiter was dropped while this task was still queued.
    #[error("rate limiter closed before the task was admitted")]
    LimiterClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
