//! Fixed-window rate limiting.

pub mod degrade;
mod key;
mod limiter;
mod registry;
mod window;

pub use key::WindowKey;
pub use limiter::{Decision, FixedWindowLimiter, LimiterConfig, LimiterError};
pub use registry::LimiterSet;
pub use window::{duration_millis, to_datetime, Clock, ManualClock, SystemClock, Window};
