//! Named limiter instances sharing one counter store.
//!
//! Each limiter owns a key prefix. Prefixes are checked for overlap when a
//! limiter is added, so counters of different limiters can never address the
//! same store key, whatever the identifiers look like.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::limiter::{FixedWindowLimiter, LimiterConfig};
use super::window::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};
use crate::store::CounterStore;

/// A set of named limiters over one shared store.
pub struct LimiterSet {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    limiters: BTreeMap<String, Arc<FixedWindowLimiter>>,
}

impl LimiterSet {
    /// Create an empty set over `store`, using the system clock.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create an empty set over `store`, using `clock`.
    pub fn with_clock(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            limiters: BTreeMap::new(),
        }
    }

    /// Add a limiter called `name`.
    ///
    /// Fails if the name is taken or if `config`'s prefix overlaps the
    /// prefix of a limiter already in the set.
    pub fn insert(&mut self, name: &str, config: LimiterConfig) -> Result<Arc<FixedWindowLimiter>> {
        if self.limiters.contains_key(name) {
            return Err(FloodgateError::Config(format!(
                "duplicate limiter name: {}",
                name
            )));
        }

        if let Some((other, _)) = self
            .limiters
            .iter()
            .find(|(_, l)| prefixes_overlap(l.config().key_prefix(), config.key_prefix()))
        {
            return Err(FloodgateError::Config(format!(
                "key prefix {:?} of limiter {} overlaps limiter {}",
                config.key_prefix(),
                name,
                other
            )));
        }

        info!(
            name = %name,
            prefix = %config.key_prefix(),
            max_requests = config.max_requests(),
            window = ?config.window(),
            "Registered rate limiter"
        );

        let limiter = Arc::new(FixedWindowLimiter::with_clock(
            config,
            self.store.clone(),
            self.clock.clone(),
        ));
        self.limiters.insert(name.to_string(), limiter.clone());
        Ok(limiter)
    }

    /// Look up a limiter by name.
    pub fn get(&self, name: &str) -> Option<Arc<FixedWindowLimiter>> {
        self.limiters.get(name).cloned()
    }

    /// Names of all limiters, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

/// Whether keys under prefix `a` could ever equal keys under prefix `b`.
///
/// Keys are `prefix:identifier:window`, so `a` and `b` collide when they
/// are equal or when one is the other followed by `:` and more text (the
/// remainder can be supplied by an identifier).
fn prefixes_overlap(a: &str, b: &str) -> bool {
    fn extends(long: &str, short: &str) -> bool {
        long.strip_prefix(short)
            .map_or(false, |rest| rest.starts_with(':'))
    }
    a == b || extends(a, b) || extends(b, a)
}
