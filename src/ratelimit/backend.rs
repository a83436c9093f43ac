//! Rate limiter trait the HTTP middleware is written against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::limiter::Decision;

/// Trait for rate limiter implementations.
///
/// The middleware only needs a decision per caller key and the configured
/// limit for the response headers, so tests can substitute their own.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Record one attempt for `key` at `now` and decide on it.
    async fn admit(&self, key: &str, now: DateTime<Utc>) -> Decision;

    /// Maximum attempts per window, reported as `X-RateLimit-Limit`.
    fn limit(&self) -> u64;
}
