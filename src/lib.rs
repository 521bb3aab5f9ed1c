// Access-control layer for a rate-limited marketplace pricing API:
// TTL result cache, request deduplication and token-bucket admission,
// composed by a gateway around a caller-supplied upstream call.

pub mod cache;
pub mod deduplication;
mod error;
mod gateway;
pub mod query;
pub mod rate_limiter;


pub use cache::{CacheConfig, CacheStats, ResultCache, SharedResultCache};
pub use deduplication::{
    DeduplicationConfig, DeduplicationStats, RequestDeduplicator, SharedRequestDeduplicator,
};
pub use error::{Error, Result};
pub use gateway::{FetchOptions, Gateway, GatewayConfig, GatewayStats};
pub use query::{Fingerprint, ListingQuery};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStats, Tier};
