//! In-process counter store.
//!
//! Counters live in a [`DashMap`], so increments of a single key are
//! serialized by the map's shard lock and never lost. Expiry is evaluated
//! lazily against the injected clock: an expired entry reads as absent and
//! is replaced by the next increment.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{CounterEntry, CounterStore, StoreError};
use crate::ratelimit::{duration_millis, Clock, SystemClock};

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at_ms: u64,
}

impl Slot {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    fn snapshot(&self, now_ms: u64) -> CounterEntry {
        CounterEntry {
            count: self.count,
            ttl_remaining: Some(Duration::from_millis(
                self.expires_at_ms.saturating_sub(now_ms),
            )),
        }
    }
}

/// A counter store held in process memory.
///
/// Suitable for single-instance deployments and tests. State is not shared
/// between processes.
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        before - self.slots.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_and_get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<CounterEntry, StoreError> {
        let now = self.clock.now_millis();
        let expires_at_ms = now.saturating_add(duration_millis(ttl));

        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert(Slot {
                count: 0,
                expires_at_ms,
            });

        if slot.is_expired(now) {
            trace!(key = %key, "Replacing expired counter");
            *slot = Slot {
                count: 0,
                expires_at_ms,
            };
        }

        slot.count += 1;
        Ok(slot.snapshot(now))
    }

    async fn read(&self, key: &str) -> Result<Option<CounterEntry>, StoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.snapshot(now)))
    }
}
