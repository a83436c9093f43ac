//! Per-caller fixed window throttle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::backend::RateLimiterBackend;
use super::store::{StoreError, WindowStore};

/// Default number of attempts allowed per window.
pub const DEFAULT_MAX_ATTEMPTS: u64 = 60;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Suffix of the key holding a caller's window expiry timestamp.
const TIMER_SUFFIX: &str = ":timer";
/// How many times one call may reset a counter that outlived its timer.
const MAX_STALE_RESETS: usize = 1;

/// Throttle limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Maximum attempts allowed in one window
    pub max_attempts: u64,
    /// Length of a window
    pub window: Duration,
}

impl ThrottleConfig {
    /// Create a configuration. Zero values fall back to the defaults.
    pub fn new(max_attempts: u64, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
        }
        .prepared()
    }

    /// Check that the window can be represented as a store TTL and as an
    /// absolute expiry timestamp.
    pub fn validate(&self) -> crate::error::Result<()> {
        let representable = chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| Utc::now().checked_add_signed(window))
            .is_some();
        if !representable {
            return Err(crate::error::GatekeeperError::Config(format!(
                "throttle window {:?} is too large",
                self.window
            )));
        }
        Ok(())
    }

    fn prepared(mut self) -> Self {
        if self.max_attempts == 0 {
            self.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if self.window.is_zero() {
            self.window = DEFAULT_WINDOW;
        }
        self
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allow {
        /// Attempts left in the current window
        remaining: u64,
    },
    /// The caller is over its limit.
    Reject {
        /// Time until the current window closes
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    /// Attempts left; always zero for a rejection.
    pub fn remaining(&self) -> u64 {
        match self {
            Decision::Allow { remaining } => *remaining,
            Decision::Reject { .. } => 0,
        }
    }

    /// How long a rejected caller should wait.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Allow { .. } => None,
            Decision::Reject { retry_after } => Some(*retry_after),
        }
    }
}

/// Counts attempts per caller key in a [`WindowStore`].
///
/// Each caller has two store entries sharing one TTL: the attempt counter
/// under the caller key and the window expiry under `key + ":timer"`. The
/// timer's presence decides whether an over-limit counter still belongs to an
/// open window. All mutation goes through the store's atomic create and
/// increment primitives, so concurrent calls for one key never lose a count.
pub struct Throttle {
    config: ThrottleConfig,
    store: Arc<dyn WindowStore>,
}

impl Throttle {
    /// Create a throttle over the given store.
    pub fn new(config: ThrottleConfig, store: Arc<dyn WindowStore>) -> Self {
        Self {
            config: config.prepared(),
            store,
        }
    }

    /// Create a throttle with the default limits.
    pub fn with_defaults(store: Arc<dyn WindowStore>) -> Self {
        Self::new(ThrottleConfig::default(), store)
    }

    /// Record one attempt for `key` and decide whether it may proceed.
    ///
    /// Every call counts, including the one that trips the limit, so call
    /// this exactly once per logical request. Store failures admit the
    /// request.
    pub async fn admit(&self, key: &str, now: DateTime<Utc>) -> Decision {
        trace!(key = %key, "Checking rate limit");

        match self.try_admit(key, now).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(key = %key, error = %e, "Window store failed, admitting request");
                Decision::Allow {
                    remaining: self.config.max_attempts,
                }
            }
        }
    }

    /// Forget all window state for `key`.
    pub async fn reset(&self, key: &str) -> crate::error::Result<()> {
        self.store.delete(key).await?;
        self.store.delete(&timer_key(key)).await?;
        Ok(())
    }

    /// The limits this throttle enforces.
    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    async fn try_admit(&self, key: &str, now: DateTime<Utc>) -> Result<Decision, StoreError> {
        let timer_key = timer_key(key);
        let max_attempts = i64::try_from(self.config.max_attempts).unwrap_or(i64::MAX);
        let mut resets = 0;

        loop {
            if self.store.read(key).await?.is_none() {
                self.open_window(key, &timer_key, now).await?;
            }

            let count = self.store.increment(key, 1).await?;
            let left = remaining(max_attempts, count);

            // An entry that expired between the read and the increment comes
            // back without a TTL, so the timer is checked on every path.
            match self.store.read(&timer_key).await? {
                Some(expires_at_ms) if count > max_attempts => {
                    let retry_after = retry_after(expires_at_ms, now);
                    debug!(
                        key = %key,
                        count = count,
                        limit = max_attempts,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Rate limit exceeded"
                    );
                    return Ok(Decision::Reject { retry_after });
                }
                Some(_) => return Ok(Decision::Allow { remaining: left }),
                None if resets < MAX_STALE_RESETS => {
                    warn!(
                        key = %key,
                        count = count,
                        "Attempt counter outlived its window, resetting"
                    );
                    self.store.delete(key).await?;
                    resets += 1;
                }
                None => return Ok(Decision::Allow { remaining: left }),
            }
        }
    }

    async fn open_window(
        &self,
        key: &str,
        timer_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let window = self.config.window;
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = now.timestamp_millis().saturating_add(window_ms);

        self.store
            .create_if_absent(timer_key, expires_at_ms, window)
            .await?;
        if self.store.create_if_absent(key, 0, window).await? {
            debug!(key = %key, window_ms = window_ms, "Opened rate limit window");
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimiterBackend for Throttle {
    async fn admit(&self, key: &str, now: DateTime<Utc>) -> Decision {
        Throttle::admit(self, key, now).await
    }

    fn limit(&self) -> u64 {
        self.config.max_attempts
    }
}

fn timer_key(key: &str) -> String {
    format!("{key}{TIMER_SUFFIX}")
}

fn remaining(max_attempts: i64, count: i64) -> u64 {
    u64::try_from(max_attempts.saturating_sub(count)).unwrap_or(0)
}

fn retry_after(expires_at_ms: i64, now: DateTime<Utc>) -> Duration {
    let millis = expires_at_ms.saturating_sub(now.timestamp_millis());
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::ratelimit::store::StoreResult;
    use crate::ratelimit::MemoryWindowStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Fixture = (Throttle, Arc<MemoryWindowStore>, Arc<ManualClock>);

    fn throttle(max_attempts: u64, window: Duration) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryWindowStore::with_clock(clock.clone()));
        let throttle = Throttle::new(ThrottleConfig::new(max_attempts, window), store.clone());
        (throttle, store, clock)
    }

    /// Store that fails every operation.
    struct UnavailableStore;

    #[async_trait]
    impl WindowStore for UnavailableStore {
        async fn create_if_absent(
            &self,
            _key: &str,
            _value: i64,
            _ttl: Duration,
        ) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn increment(&self, _key: &str, _delta: i64) -> StoreResult<i64> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn read(&self, _key: &str) -> StoreResult<Option<i64>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn delete(&self, _key: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    /// Store that yields before every operation to widen race windows.
    struct DelayedStore {
        inner: MemoryWindowStore,
        delay: Duration,
        increments: AtomicUsize,
    }

    #[async_trait]
    impl WindowStore for DelayedStore {
        async fn create_if_absent(
            &self,
            key: &str,
            value: i64,
            ttl: Duration,
        ) -> StoreResult<bool> {
            tokio::time::sleep(self.delay).await;
            self.inner.create_if_absent(key, value, ttl).await
        }
        async fn increment(&self, key: &str, delta: i64) -> StoreResult<i64> {
            tokio::time::sleep(self.delay).await;
            self.increments.fetch_add(1, Ordering::SeqCst);
            self.inner.increment(key, delta).await
        }
        async fn read(&self, key: &str) -> StoreResult<Option<i64>> {
            tokio::time::sleep(self.delay).await;
            self.inner.read(key).await
        }
        async fn delete(&self, key: &str) -> StoreResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete(key).await
        }
    }

    /// Store whose clock jumps forward inside the next increment once armed,
    /// so entries expire between the limiter's read and its increment.
    struct ClockJumpStore {
        inner: MemoryWindowStore,
        clock: Arc<ManualClock>,
        jump: Duration,
        armed: AtomicBool,
    }

    #[async_trait]
    impl WindowStore for ClockJumpStore {
        async fn create_if_absent(
            &self,
            key: &str,
            value: i64,
            ttl: Duration,
        ) -> StoreResult<bool> {
            self.inner.create_if_absent(key, value, ttl).await
        }
        async fn increment(&self, key: &str, delta: i64) -> StoreResult<i64> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.clock.advance(self.jump);
            }
            self.inner.increment(key, delta).await
        }
        async fn read(&self, key: &str) -> StoreResult<Option<i64>> {
            self.inner.read(key).await
        }
        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.inner.delete(key).await
        }
    }

    /// Store that never keeps timers and ignores deletes of counters, like a
    /// replica that has not caught up.
    struct LaggingStore {
        inner: MemoryWindowStore,
    }

    #[async_trait]
    impl WindowStore for LaggingStore {
        async fn create_if_absent(
            &self,
            key: &str,
            value: i64,
            ttl: Duration,
        ) -> StoreResult<bool> {
            if key.ends_with(TIMER_SUFFIX) {
                return Ok(true);
            }
            self.inner.create_if_absent(key, value, ttl).await
        }
        async fn increment(&self, key: &str, delta: i64) -> StoreResult<i64> {
            self.inner.increment(key, delta).await
        }
        async fn read(&self, key: &str) -> StoreResult<Option<i64>> {
            self.inner.read(key).await
        }
        async fn delete(&self, _key: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_zero_config_uses_defaults() {
        let config = ThrottleConfig::new(0, Duration::ZERO);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.window, DEFAULT_WINDOW);
        assert_eq!(ThrottleConfig::default(), config);
    }

    #[tokio::test]
    async fn test_remaining_decreases_within_window() {
        let (throttle, _store, clock) = throttle(5, Duration::from_secs(60));

        for expected in (0..5).rev() {
            let decision = throttle.admit("caller", clock.now()).await;
            assert_eq!(decision, Decision::Allow { remaining: expected });
        }
    }

    #[tokio::test]
    async fn test_request_over_limit_is_rejected() {
        let (throttle, _store, clock) = throttle(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(throttle.admit("caller", clock.now()).await.is_allowed());
        }

        let decision = throttle.admit("caller", clock.now()).await;
        assert!(!decision.is_allowed());
        assert_eq!(decision.remaining(), 0);
        assert!(decision.retry_after().unwrap() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_two_attempt_scenario() {
        let (throttle, _store, clock) = throttle(2, Duration::from_secs(1));

        assert_eq!(throttle.admit("caller", clock.now()).await, Decision::Allow { remaining: 1 });
        clock.advance(Duration::from_millis(100));
        assert_eq!(throttle.admit("caller", clock.now()).await, Decision::Allow { remaining: 0 });
        clock.advance(Duration::from_millis(100));
        assert_eq!(
            throttle.admit("caller", clock.now()).await,
            Decision::Reject { retry_after: Duration::from_millis(800) }
        );
    }

    #[tokio::test]
    async fn test_window_expiry_opens_fresh_window() {
        let (throttle, _store, clock) = throttle(2, Duration::from_secs(1));

        for _ in 0..3 {
            throttle.admit("caller", clock.now()).await;
        }
        clock.advance(Duration::from_secs(1));

        assert_eq!(throttle.admit("caller", clock.now()).await, Decision::Allow { remaining: 1 });
    }

    #[tokio::test]
    async fn test_rejected_attempts_are_counted() {
        let (throttle, store, clock) = throttle(1, Duration::from_secs(60));

        throttle.admit("caller", clock.now()).await;
        throttle.admit("caller", clock.now()).await;
        throttle.admit("caller", clock.now()).await;

        assert_eq!(store.read("caller").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (throttle, _store, clock) = throttle(1, Duration::from_secs(60));

        assert!(throttle.admit("a", clock.now()).await.is_allowed());
        assert!(!throttle.admit("a", clock.now()).await.is_allowed());
        assert!(throttle.admit("b", clock.now()).await.is_allowed());
    }

    #[tokio::test]
    async fn test_counter_without_timer_is_reset() {
        let (throttle, store, clock) = throttle(2, Duration::from_secs(60));

        // Counter survived while its timer expired
        store.create_if_absent("caller", 2, Duration::from_secs(600)).await.unwrap();
        assert!(!store.exists("caller:timer").await.unwrap());

        let decision = throttle.admit("caller", clock.now()).await;
        assert_eq!(decision, Decision::Allow { remaining: 1 });
        assert!(store.exists("caller:timer").await.unwrap());
        assert_eq!(store.read("caller").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_retry_after_clamped_at_zero() {
        let (throttle, store, clock) = throttle(1, Duration::from_secs(60));
        let past = clock.now().timestamp_millis() - 5_000;

        store.create_if_absent("caller:timer", past, Duration::from_secs(60)).await.unwrap();
        store.create_if_absent("caller", 1, Duration::from_secs(60)).await.unwrap();

        let decision = throttle.admit("caller", clock.now()).await;
        assert_eq!(decision, Decision::Reject { retry_after: Duration::ZERO });
    }

    #[test]
    fn test_validate_rejects_unrepresentable_window() {
        assert!(ThrottleConfig::default().validate().is_ok());

        let config = ThrottleConfig::new(10, Duration::from_secs(u64::MAX));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, crate::error::GatekeeperError::Config(_)));
    }

    #[tokio::test]
    async fn test_window_expiring_before_increment_opens_fresh_window() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(ClockJumpStore {
            inner: MemoryWindowStore::with_clock(clock.clone()),
            clock: clock.clone(),
            jump: Duration::from_millis(600),
            armed: AtomicBool::new(false),
        });
        let throttle = Throttle::new(ThrottleConfig::new(5, Duration::from_secs(1)), store.clone());

        assert_eq!(throttle.admit("caller", clock.now()).await, Decision::Allow { remaining: 4 });

        // The counter is read at 0.5s and incremented at 1.1s
        clock.advance(Duration::from_millis(500));
        store.armed.store(true, Ordering::SeqCst);
        assert_eq!(throttle.admit("caller", clock.now()).await, Decision::Allow { remaining: 4 });
        assert!(store.exists("caller:timer").await.unwrap());

        // The reopened window still expires on its own
        clock.advance(Duration::from_secs(3600));
        assert_eq!(store.read("caller").await.unwrap(), None);
        assert_eq!(store.read("caller:timer").await.unwrap(), None);
        store.inner.purge_expired();
        assert!(store.inner.is_empty());

        assert_eq!(throttle.admit("caller", clock.now()).await, Decision::Allow { remaining: 4 });
    }

    #[tokio::test]
    async fn test_missing_timer_after_reset_allows_with_zero_remaining() {
        let inner = MemoryWindowStore::new();
        inner.create_if_absent("caller", 2, Duration::from_secs(60)).await.unwrap();
        let store = Arc::new(LaggingStore { inner });
        let config = ThrottleConfig::new(2, Duration::from_secs(60));
        let throttle = Throttle::new(config, store.clone());

        let decision = throttle.admit("caller", Utc::now()).await;
        assert_eq!(decision, Decision::Allow { remaining: 0 });
        // One increment before the reset, one after
        assert_eq!(store.read("caller").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_missing_timer_under_limit_reports_remaining() {
        let store = Arc::new(LaggingStore {
            inner: MemoryWindowStore::new(),
        });
        let throttle = Throttle::new(ThrottleConfig::new(3, Duration::from_secs(60)), store);

        assert_eq!(throttle.admit("caller", Utc::now()).await, Decision::Allow { remaining: 1 });
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let config = ThrottleConfig::new(3, Duration::from_secs(1));
        let throttle = Throttle::new(config, Arc::new(UnavailableStore));

        for _ in 0..10 {
            let decision = throttle.admit("caller", Utc::now()).await;
            assert_eq!(decision, Decision::Allow { remaining: 3 });
        }
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let (throttle, store, clock) = throttle(1, Duration::from_secs(60));

        throttle.admit("caller", clock.now()).await;
        assert!(!throttle.admit("caller", clock.now()).await.is_allowed());

        throttle.reset("caller").await.unwrap();
        assert!(store.is_empty());
        assert!(throttle.admit("caller", clock.now()).await.is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_admissions_count_exactly() {
        let max_attempts = 20;
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(DelayedStore {
            inner: MemoryWindowStore::with_clock(clock.clone()),
            delay: Duration::from_millis(2),
            increments: AtomicUsize::new(0),
        });
        let throttle = Arc::new(Throttle::new(
            ThrottleConfig::new(max_attempts, Duration::from_secs(60)),
            store.clone(),
        ));

        let now = clock.now();
        let mut handles = Vec::new();
        for _ in 0..(2 * max_attempts) {
            let throttle = throttle.clone();
            handles.push(tokio::spawn(async move { throttle.admit("caller", now).await }));
        }

        let decisions: Vec<Decision> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let allowed = decisions.iter().filter(|d| d.is_allowed()).count();
        assert_eq!(allowed, max_attempts as usize);
        assert_eq!(decisions.len() - allowed, max_attempts as usize);
        assert_eq!(store.increments.load(Ordering::SeqCst), 2 * max_attempts as usize);
        assert_eq!(store.inner.read("caller").await.unwrap(), Some(2 * max_attempts as i64));

        let mut remaining: Vec<u64> = decisions
            .iter()
            .filter(|d| d.is_allowed())
            .map(|d| d.remaining())
            .collect();
        remaining.sort_unstable();
        assert_eq!(remaining, (0..max_attempts).collect::<Vec<_>>());
    }
}
