//! Shared counter store abstraction.
//!
//! The limiter only needs two things from its backing store: an atomic
//! increment that sets an expiry when it creates a key, and a plain read for
//! diagnostics. Everything else about the store (wire format, connection
//! handling, retries) stays behind the [`CounterStore`] trait.

mod flaky;
mod memory;
mod rest;

pub use flaky::FlakyStore;
pub use memory::MemoryStore;
pub use rest::{RestStore, DEFAULT_TIMEOUT};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by a counter store.
///
/// The limiter treats every variant the same way when deciding admission;
/// the classification only feeds log output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or returned something unusable.
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the operation class (ACL, disabled commands).
    #[error("Counter store denied the operation: {0}")]
    PermissionDenied(String),

    /// The store did not answer in time.
    #[error("Counter store timed out: {0}")]
    Timeout(String),
}

/// Classification of a [`StoreError`], without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    Unavailable,
    PermissionDenied,
    Timeout,
}

impl StoreError {
    /// The kind of this error.
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::Unavailable(_) => StoreErrorKind::Unavailable,
            StoreError::PermissionDenied(_) => StoreErrorKind::PermissionDenied,
            StoreError::Timeout(_) => StoreErrorKind::Timeout,
        }
    }
}

impl StoreErrorKind {
    /// Stable label for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::Unavailable => "unavailable",
            StoreErrorKind::PermissionDenied => "permission_denied",
            StoreErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a counter as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Post-increment (or current) count.
    pub count: u64,
    /// Time left before the store drops the key. `None` when the store
    /// reports the key has no expiry.
    pub ttl_remaining: Option<Duration>,
}

/// Contract of the shared counter store.
///
/// Implementations must be safe to share across every limiter in the
/// process and must never lose an increment under concurrent callers.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` by one and return the new count.
    ///
    /// A key that does not exist is created with a count of 1 and an expiry
    /// of `ttl`. Increments of an existing key leave its expiry alone.
    async fn increment_and_get(&self, key: &str, ttl: Duration)
        -> Result<CounterEntry, StoreError>;

    /// Read a counter without modifying it. Returns `None` for absent or
    /// expired keys.
    async fn read(&self, key: &str) -> Result<Option<CounterEntry>, StoreError>;
}
