//! Window store abstraction.
//!
//! The throttle keeps two entries per caller: the attempt count and the
//! window expiry timestamp. Both live behind this narrow interface so the
//! backing cache can be swapped (in-process map, Redis, memcached) without
//! touching the counting algorithm.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a window store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing cache could not be reached or timed out.
    #[error("Window store unavailable: {0}")]
    Unavailable(String),

    /// An increment would overflow the stored counter.
    #[error("Counter overflow for key {key}")]
    Overflow { key: String },

    /// The requested TTL cannot be represented by the store.
    #[error("Invalid TTL: {0:?}")]
    InvalidTtl(Duration),
}

/// Result type alias for window store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key/value cache with per-key expiry.
///
/// Values are signed integers; timestamps are stored as Unix epoch
/// milliseconds. TTLs are measured from the moment an entry is created.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Store `value` under `key` with the given TTL, unless a live entry is
    /// already present. Returns `true` if this call created the entry.
    async fn create_if_absent(&self, key: &str, value: i64, ttl: Duration) -> StoreResult<bool>;

    /// Atomically add `delta` to the entry and return the new value.
    ///
    /// An absent key is created at `delta` without an expiry, matching the
    /// `INCRBY` semantics of common caches.
    async fn increment(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Read the live value for `key`.
    async fn read(&self, key: &str) -> StoreResult<Option<i64>>;

    /// Whether a live entry exists for `key`.
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.read(key).await?.is_some())
    }

    /// Remove the entry for `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}
