//! Rate limit response headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::limiter::Decision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const RETRY_AFTER: HeaderName = axum::http::header::RETRY_AFTER;

/// Format of the `X-RateLimit-Reset` timestamp (UTC).
pub const RESET_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The header values describing one admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Whole seconds to wait, rounded up. Only set on rejection.
    pub retry_after_secs: Option<u64>,
    /// When the window closes. Only set on rejection.
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitHeaders {
    pub fn from_decision(limit: u64, decision: &Decision, now: DateTime<Utc>) -> Self {
        let retry_after = decision.retry_after();

        Self {
            limit,
            remaining: decision.remaining(),
            retry_after_secs: retry_after.map(ceil_secs),
            reset_at: retry_after.map(|wait| {
                chrono::Duration::from_std(wait)
                    .ok()
                    .and_then(|wait| now.checked_add_signed(wait))
                    .unwrap_or(now)
            }),
        }
    }

    /// Write the headers, replacing any existing values.
    pub fn write_to(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));

        if let Some(secs) = self.retry_after_secs {
            headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        if let Some(reset_at) = self.reset_at {
            // The formatted timestamp is plain ASCII
            if let Ok(value) = HeaderValue::from_str(&reset_at.format(RESET_FORMAT).to_string()) {
                headers.insert(X_RATELIMIT_RESET, value);
            }
        }
    }
}

fn ceil_secs(wait: Duration) -> u64 {
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}
