//! Per-caller rate limiting.

mod backend;
mod headers;
mod limiter;
mod memory;
mod signature;
mod store;

pub use backend::RateLimiterBackend;
pub use headers::{
    RateLimitHeaders, RESET_FORMAT, RETRY_AFTER, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use limiter::{Decision, Throttle, ThrottleConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW};
pub use memory::MemoryWindowStore;
pub use signature::{HostAddrResolver, RequestMetadata, SignatureResolver};
pub use store::{StoreError, StoreResult, WindowStore};
