//! Window key generation.

use std::fmt;

use super::window::Window;

/// Address of one window's counter in the shared store.
///
/// Rendered as `{prefix}:{identifier}:{window_index}`. The index is always
/// the last segment, so identifiers containing `:` cannot collide with each
/// other under the same prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Limiter namespace
    pub prefix: String,
    /// Caller identity (user id, IP address, ...)
    pub identifier: String,
    /// Window index since the epoch
    pub window: u64,
}

impl WindowKey {
    /// Build the key for `identifier` in `window`.
    pub fn new(prefix: &str, identifier: &str, window: &Window) -> Self {
        Self {
            prefix: prefix.to_string(),
            identifier: identifier.to_string(),
            window: window.index,
        }
    }

    /// The string form used as the store key.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}:{}", self.prefix, self.identifier, self.window)
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_window_key_format() {
        let window = Window::containing(125_000, Duration::from_secs(60));
        let key = WindowKey::new("ratelimit:general", "1.2.3.4", &window);

        assert_eq!(key.to_store_key(), "ratelimit:general:1.2.3.4:2");
        assert_eq!(key.to_string(), key.to_store_key());
    }

    #[test]
    fn test_same_window_same_key() {
        let length = Duration::from_secs(600);
        let a = WindowKey::new("p", "user1", &Window::containing(600_001, length));
        let b = WindowKey::new("p", "user1", &Window::containing(1_199_999, length));
        assert_eq!(a, b);
    }

    #[test]
    fn test_straddling_boundary_changes_key() {
        let length = Duration::from_secs(600);
        let a = WindowKey::new("p", "user1", &Window::containing(1_199_999, length));
        let b = WindowKey::new("p", "user1", &Window::containing(1_200_000, length));
        assert_ne!(a.to_store_key(), b.to_store_key());
    }
}
