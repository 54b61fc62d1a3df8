//! Fixed-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{trace, warn};

use super::degrade;
use super::key::WindowKey;
use super::window::{to_datetime, Clock, SystemClock, Window};
use crate::error::{FloodgateError, Result};
use crate::store::{CounterEntry, CounterStore, StoreError, StoreErrorKind};

/// Configuration for one limiter instance. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    max_requests: u64,
    window: Duration,
    key_prefix: String,
}

impl LimiterConfig {
    /// Create a configuration allowing `max_requests` per `window`, with
    /// counters stored under `key_prefix`.
    pub fn new(max_requests: u64, window: Duration, key_prefix: impl Into<String>) -> Result<Self> {
        let key_prefix = key_prefix.into();

        if max_requests == 0 {
            return Err(FloodgateError::Config(
                "max_requests must be positive".to_string(),
            ));
        }
        match u64::try_from(window.as_millis()) {
            Ok(0) => {
                return Err(FloodgateError::Config(
                    "window must be at least one millisecond".to_string(),
                ))
            }
            Ok(_) => {}
            Err(_) => {
                return Err(FloodgateError::Config(format!(
                    "window {:?} is too long",
                    window
                )))
            }
        }
        if key_prefix.is_empty() {
            return Err(FloodgateError::Config(
                "key_prefix must not be empty".to_string(),
            ));
        }

        Ok(Self {
            max_requests,
            window,
            key_prefix,
        })
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Maximum requests per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Start of the next window, in epoch milliseconds
    pub reset_at_ms: u64,
    /// Set when the store failed and the request was admitted anyway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<StoreErrorKind>,
}

impl Decision {
    /// Start of the next window as a UTC timestamp.
    pub fn reset_at(&self) -> DateTime<Utc> {
        to_datetime(self.reset_at_ms)
    }

    /// Time from `now_ms` until the counter resets.
    pub fn retry_after(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.reset_at_ms.saturating_sub(now_ms))
    }
}

/// Reasons a check could not reach a decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LimiterError {
    /// The caller identity was empty.
    #[error("identifier must not be empty")]
    EmptyIdentifier,

    /// The counter store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LimiterError {
    /// Store classification of this error, if it came from the store.
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            LimiterError::EmptyIdentifier => None,
            LimiterError::Store(err) => Some(err.kind()),
        }
    }
}

/// A fixed-window limiter over a shared counter store.
///
/// Holds no mutable state of its own: every check is a single atomic
/// increment in the store, so instances can be shared freely across tasks.
pub struct FixedWindowLimiter {
    config: LimiterConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("config", &self.config)
            .finish()
    }
}

impl FixedWindowLimiter {
    /// Create a limiter using the system clock.
    pub fn new(config: LimiterConfig, store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a limiter using `clock` for window computation.
    pub fn with_clock(
        config: LimiterConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Get the configuration of this limiter.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The window containing the current time.
    pub fn current_window(&self) -> Window {
        Window::containing(self.clock.now_millis(), self.config.window)
    }

    /// Current time according to this limiter's clock.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Count one request for `identifier` and decide whether it may proceed.
    ///
    /// Store failures are returned as errors; see [`FixedWindowLimiter::check`]
    /// for the variant that always yields a decision.
    pub async fn try_check(&self, identifier: &str) -> std::result::Result<Decision, LimiterError> {
        if identifier.is_empty() {
            return Err(LimiterError::EmptyIdentifier);
        }

        let window = self.current_window();
        let key = WindowKey::new(&self.config.key_prefix, identifier, &window);

        trace!(key = %key, "Checking rate limit");

        let entry = self
            .store
            .increment_and_get(&key.to_store_key(), self.config.window)
            .await?;

        Ok(self.decide(identifier, &window, entry))
    }

    /// Count one request for `identifier`, admitting it if the store fails.
    pub async fn check(&self, identifier: &str) -> Decision {
        match self.try_check(identifier).await {
            Ok(decision) => decision,
            Err(err) => {
                let window = self.current_window();
                degrade::report(&self.config, identifier, &err);
                degrade::fail_open(&self.config, &window, &err)
            }
        }
    }

    /// Read the current window's counter for `identifier` without counting
    /// a request. Returns `None` if nothing has been counted yet.
    pub async fn peek(
        &self,
        identifier: &str,
    ) -> std::result::Result<Option<CounterEntry>, LimiterError> {
        if identifier.is_empty() {
            return Err(LimiterError::EmptyIdentifier);
        }

        let key = WindowKey::new(&self.config.key_prefix, identifier, &self.current_window());
        Ok(self.store.read(&key.to_store_key()).await?)
    }

    fn decide(&self, identifier: &str, window: &Window, entry: CounterEntry) -> Decision {
        let limit = self.config.max_requests;
        let decision = Decision {
            allowed: entry.count <= limit,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at_ms: window.reset_at_ms(),
            degraded: None,
        };

        if !decision.allowed {
            warn!(
                limiter = %self.config.key_prefix,
                identifier = %identifier,
                count = entry.count,
                limit = limit,
                remaining = decision.remaining,
                reset = %decision.reset_at().to_rfc3339(),
                "Rate limit exceeded"
            );
        }

        decision
    }
}
