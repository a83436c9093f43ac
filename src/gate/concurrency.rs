//! Concurrency gate implementation.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{GatekeeperError, Result};

/// Default number of requests allowed to execute at once.
pub const DEFAULT_CONCURRENT_NUM: usize = 100;

/// Bounds how many requests execute inside the handler chain at once.
///
/// Requests over capacity wait for a slot instead of failing. Waiters are
/// admitted in no particular order.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held execution slot. The slot is released when the permit is dropped.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` slots.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(GatekeeperError::Config(
                "concurrency gate capacity must be positive".to_string(),
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(GatekeeperError::Config(format!(
                "concurrency gate capacity {} exceeds the maximum of {}",
                capacity,
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait for a free slot.
    ///
    /// Dropping the returned future before it resolves gives up the wait
    /// without taking a slot. Fails only once the gate has been closed.
    pub async fn admit(&self) -> Result<GatePermit> {
        trace!(in_flight = self.in_flight(), capacity = self.capacity, "Waiting for slot");

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatekeeperError::GateClosed)?;
        Ok(GatePermit { _permit: permit })
    }

    /// Take a slot if one is free right now.
    pub fn try_admit(&self) -> Option<GatePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    /// Give a slot back. Equivalent to dropping the permit.
    pub fn release(&self, permit: GatePermit) {
        drop(permit);
    }

    /// Stop admitting. Current and future waiters fail with `GateClosed`;
    /// permits already held stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_NUM)),
            capacity: DEFAULT_CONCURRENT_NUM,
        }
    }
}
