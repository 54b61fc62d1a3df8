//! Time source and fixed-window arithmetic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Clock backed by the system's UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        // Pre-epoch clocks clamp to zero rather than wrapping.
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// One fixed window: its index and length.
///
/// Time is partitioned into back-to-back intervals of `length_ms`, numbered
/// from the Unix epoch. Window `n` covers `[n * length, (n + 1) * length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Index of the window since the epoch.
    pub index: u64,
    /// Window length in milliseconds.
    pub length_ms: u64,
}

impl Window {
    /// The window containing `now_ms`.
    ///
    /// `length` must be at least one millisecond.
    pub fn containing(now_ms: u64, length: Duration) -> Self {
        let length_ms = duration_millis(length).max(1);
        Self {
            index: now_ms / length_ms,
            length_ms,
        }
    }

    /// Start of this window, in epoch milliseconds.
    pub fn start_ms(&self) -> u64 {
        self.index.saturating_mul(self.length_ms)
    }

    /// Start of the next window, in epoch milliseconds.
    pub fn reset_at_ms(&self) -> u64 {
        self.index.saturating_add(1).saturating_mul(self.length_ms)
    }

    /// Time from `now_ms` until the next window opens.
    pub fn duration_until_reset(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.reset_at_ms().saturating_sub(now_ms))
    }
}

/// Convert epoch milliseconds to a UTC timestamp.
pub fn to_datetime(millis: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
