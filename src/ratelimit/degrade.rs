//! Fail-open degradation policy.
//!
//! When the counter store misbehaves the limiter admits the request and
//! reports the fault. Over-admission during an outage is accepted; turning a
//! store outage into an outage of the protected service is not.

use tracing::{error, warn};

use super::limiter::{Decision, LimiterConfig, LimiterError};
use super::window::Window;
use crate::store::StoreErrorKind;

/// The decision returned when a check fails.
///
/// Depends only on the configuration, the window and the error, and always
/// admits. The full quota is reported as remaining since the real count is
/// unknown.
pub fn fail_open(config: &LimiterConfig, window: &Window, err: &LimiterError) -> Decision {
    Decision {
        allowed: true,
        limit: config.max_requests(),
        remaining: config.max_requests(),
        reset_at_ms: window.reset_at_ms(),
        degraded: err.store_kind(),
    }
}

/// Log a failed check.
///
/// Permission problems are usually a store misconfiguration (disabled
/// commands, wrong token) and are logged as warnings; everything else is an
/// error.
pub fn report(config: &LimiterConfig, identifier: &str, err: &LimiterError) {
    match err.store_kind() {
        None => warn!(
            limiter = %config.key_prefix(),
            error = %err,
            "Rate limit check skipped, allowing request"
        ),
        Some(StoreErrorKind::PermissionDenied) => warn!(
            limiter = %config.key_prefix(),
            identifier = %identifier,
            limit = config.max_requests(),
            error_kind = %StoreErrorKind::PermissionDenied,
            error = %err,
            "Rate limiting failed due to store permissions, allowing request"
        ),
        Some(kind) => error!(
            limiter = %config.key_prefix(),
            identifier = %identifier,
            limit = config.max_requests(),
            error_kind = %kind,
            error = %err,
            "Rate limiting error, allowing request"
        ),
    }
}
