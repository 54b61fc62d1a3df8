//! Fault-injecting store wrapper.
//!
//! Wraps another [`CounterStore`] and fails calls on demand, so the
//! degradation path can be driven without a real outage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CounterEntry, CounterStore, StoreError};

/// A store that fails when told to.
///
/// One-shot faults queued with [`FlakyStore::fail_next`] are consumed in
/// order before the persistent fault set by [`FlakyStore::fail_always`] is
/// considered. Calls that are not failed reach the inner store.
pub struct FlakyStore {
    inner: Arc<dyn CounterStore>,
    queued: Mutex<VecDeque<StoreError>>,
    persistent: Mutex<Option<StoreError>>,
    forwarded: AtomicU64,
}

impl FlakyStore {
    /// Wrap `inner`. No faults are armed initially.
    pub fn new(inner: Arc<dyn CounterStore>) -> Self {
        Self {
            inner,
            queued: Mutex::new(VecDeque::new()),
            persistent: Mutex::new(None),
            forwarded: AtomicU64::new(0),
        }
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: StoreError) {
        self.queued.lock().push_back(error);
    }

    /// Fail every call with `error` until [`FlakyStore::heal`] is called.
    pub fn fail_always(&self, error: StoreError) {
        *self.persistent.lock() = Some(error);
    }

    /// Clear all armed faults.
    pub fn heal(&self) {
        self.queued.lock().clear();
        *self.persistent.lock() = None;
    }

    /// How many calls reached the inner store.
    pub fn forwarded_calls(&self) -> u64 {
        self.forwarded.load(Ordering::SeqCst)
    }

    fn take_fault(&self) -> Option<StoreError> {
        if let Some(err) = self.queued.lock().pop_front() {
            return Some(err);
        }
        self.persistent.lock().clone()
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn increment_and_get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<CounterEntry, StoreError> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        self.forwarded.fetch_add(1, Ordering::SeqCst);
        self.inner.increment_and_get(key, ttl).await
    }

    async fn read(&self, key: &str) -> Result<Option<CounterEntry>, StoreError> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        self.forwarded.fetch_add(1, Ordering::SeqCst);
        self.inner.read(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_passes_through_when_healthy() {
        let store = FlakyStore::new(Arc::new(MemoryStore::new()));
        let entry = store
            .increment_and_get("k", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(store.forwarded_calls(), 1);
    }

    #[tokio::test]
    async fn test_queued_faults_are_one_shot() {
        let store = FlakyStore::new(Arc::new(MemoryStore::new()));
        store.fail_next(StoreError::Timeout("first".into()));
        store.fail_next(StoreError::Unavailable("second".into()));

        let ttl = Duration::from_secs(1);
        assert_eq!(
            store.increment_and_get("k", ttl).await,
            Err(StoreError::Timeout("first".into()))
        );
        assert_eq!(
            store.read("k").await,
            Err(StoreError::Unavailable("second".into()))
        );
        assert!(store.increment_and_get("k", ttl).await.is_ok());
        assert_eq!(store.forwarded_calls(), 1);
    }

    #[tokio::test]
    async fn test_persistent_fault_until_healed() {
        let store = FlakyStore::new(Arc::new(MemoryStore::new()));
        store.fail_always(StoreError::PermissionDenied("NOPERM".into()));

        let ttl = Duration::from_secs(1);
        for _ in 0..3 {
            assert!(store.increment_and_get("k", ttl).await.is_err());
        }
        assert_eq!(store.forwarded_calls(), 0);

        store.heal();
        assert!(store.increment_and_get("k", ttl).await.is_ok());
    }
}
