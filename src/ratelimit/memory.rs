//! In-process window store backed by a concurrent hash map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::store::{StoreError, StoreResult, WindowStore};
use crate::clock::{Clock, SystemClock};

/// A stored value and the instant it stops being visible.
#[derive(Debug, Clone, Copy)]
struct Slot {
    value: i64,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Window store that keeps entries in memory.
///
/// Every operation on a single key runs under that key's shard lock, so
/// create-if-absent and increment are atomic. Expired entries are invisible
/// to all operations and are dropped lazily or by [`purge_expired`].
///
/// [`purge_expired`]: MemoryWindowStore::purge_expired
#[derive(Debug)]
pub struct MemoryWindowStore {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryWindowStore {
    /// Create a store that measures TTLs with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that measures TTLs with the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        trace!(purged, "Purged expired window entries");
        purged
    }

    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expiry_after(&self, now: DateTime<Utc>, ttl: Duration) -> StoreResult<DateTime<Utc>> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or(StoreError::InvalidTtl(ttl))
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn create_if_absent(&self, key: &str, value: i64, ttl: Duration) -> StoreResult<bool> {
        let now = self.clock.now();
        let slot = Slot {
            value,
            expires_at: Some(self.expiry_after(now, ttl)?),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(slot);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let now = self.clock.now();
        let mut slot = self.entries.entry(key.to_string()).or_insert(Slot {
            value: 0,
            expires_at: None,
        });

        if slot.is_expired(now) {
            *slot = Slot {
                value: 0,
                expires_at: None,
            };
        }

        slot.value = slot
            .value
            .checked_add(delta)
            .ok_or_else(|| StoreError::Overflow {
                key: key.to_string(),
            })?;
        Ok(slot.value)
    }

    async fn read(&self, key: &str) -> StoreResult<Option<i64>> {
        let now = self.clock.now();
        let (value, expired) = match self.entries.get(key) {
            Some(slot) if slot.is_expired(now) => (None, true),
            Some(slot) => (Some(slot.value), false),
            None => (None, false),
        };

        if expired {
            self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}
