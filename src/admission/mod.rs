//! Caller-facing admission checks.
//!
//! Two limiters guard the protected service: a strict one for expensive
//! operations and a looser one for general traffic. Rejections are logged by
//! the limiters themselves. Neither entry point ever blocks a request because
//! of a store fault; see [`crate::ratelimit::degrade`].

mod response;

pub use response::RejectionResponse;

use std::sync::Arc;

use serde::Serialize;

use crate::config::LimitersConfig;
use crate::error::Result;
use crate::ratelimit::{Clock, FixedWindowLimiter, LimiterSet, SystemClock};
use crate::store::CounterStore;

/// Name of the strict limiter in [`AdmissionGuards::limiters`].
pub const STRICT: &str = "strict";
/// Name of the general limiter in [`AdmissionGuards::limiters`].
pub const GENERAL: &str = "general";

/// Reason given when the strict limiter rejects a request.
pub const STRICT_REJECTION_REASON: &str = "Rate limit exceeded. Please try again in a few minutes.";
/// Error message in the general limiter's 429 body.
pub const GENERAL_REJECTION_MESSAGE: &str = "Too many requests. Please try again shortly.";

/// Result of [`AdmissionGuards::validate_request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Validation {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// The strict and general limiters, sharing one store.
pub struct AdmissionGuards {
    limiters: LimiterSet,
    strict: Arc<FixedWindowLimiter>,
    general: Arc<FixedWindowLimiter>,
}

impl AdmissionGuards {
    /// Build both limiters over `store` using the system clock.
    pub fn new(config: &LimitersConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Build both limiters over `store` using `clock`.
    pub fn with_clock(
        config: &LimitersConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut limiters = LimiterSet::with_clock(store, clock);
        let strict = limiters.insert(STRICT, config.strict.to_limiter_config()?)?;
        let general = limiters.insert(GENERAL, config.general.to_limiter_config()?)?;

        Ok(Self {
            limiters,
            strict,
            general,
        })
    }

    /// All limiters by name.
    pub fn limiters(&self) -> &LimiterSet {
        &self.limiters
    }

    /// Check whether `user_id` may perform an expensive operation.
    pub async fn validate_request(&self, user_id: &str) -> Validation {
        if self.strict.check(user_id).await.allowed {
            Validation::allowed()
        } else {
            Validation::denied(STRICT_REJECTION_REASON)
        }
    }

    /// Check the general limit for `identifier` (user id or IP address).
    ///
    /// Returns `None` when the request may proceed, or the response to send
    /// back instead.
    pub async fn check_rate_limit(&self, identifier: &str) -> Option<RejectionResponse> {
        let decision = self.general.check(identifier).await;
        if decision.allowed {
            return None;
        }

        Some(RejectionResponse::too_many_requests(
            GENERAL_REJECTION_MESSAGE,
            decision.retry_after(self.general.now_millis()),
        ))
    }
}
