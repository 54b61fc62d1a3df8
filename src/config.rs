//! Configuration management for Floodgate.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::LimiterConfig;
use crate::store::{CounterStore, MemoryStore, RestStore};

/// Environment variable prefix, e.g. `FLOODGATE__STORE__URL`.
pub const ENV_PREFIX: &str = "FLOODGATE";

/// Fallback environment variables for the store endpoint.
pub const URL_FALLBACK_VAR: &str = "UPSTASH_REDIS_REST_URL";
pub const TOKEN_FALLBACK_VAR: &str = "UPSTASH_REDIS_REST_TOKEN";

/// Main configuration for Floodgate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Limiter configuration
    #[serde(default)]
    pub limiters: LimitersConfig,
}

/// Which counter store to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared store reached over REST
    #[default]
    Rest,
    /// Process-local store
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// REST endpoint URL
    #[serde(default)]
    pub url: Option<String>,

    /// Bearer token for the REST endpoint
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout", with = "humantime_duration")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            token: None,
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> Duration {
    crate::store::DEFAULT_TIMEOUT
}

/// The two limiters behind the inbound API.
///
/// Each field of a limiter may be set on its own; unset fields keep the
/// limiter's default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PartialLimiters")]
pub struct LimitersConfig {
    /// Limiter for expensive operations
    pub strict: LimitRule,

    /// Limiter for general traffic
    pub general: LimitRule,
}

impl Default for LimitersConfig {
    fn default() -> Self {
        Self {
            strict: default_strict(),
            general: default_general(),
        }
    }
}

fn default_strict() -> LimitRule {
    LimitRule {
        max_requests: 10,
        window: Duration::from_secs(600),
        prefix: "ratelimit:video_processing".to_string(),
    }
}

fn default_general() -> LimitRule {
    LimitRule {
        max_requests: 30,
        window: Duration::from_secs(60),
        prefix: "ratelimit:general_api".to_string(),
    }
}

/// Settings of one limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length, e.g. "10m"
    #[serde(with = "humantime_duration")]
    pub window: Duration,
    /// Store key namespace
    pub prefix: String,
}

impl LimitRule {
    /// Validate and convert into a limiter configuration.
    pub fn to_limiter_config(&self) -> Result<LimiterConfig> {
        LimiterConfig::new(self.max_requests, self.window, self.prefix.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialLimiters {
    #[serde(default)]
    strict: PartialRule,
    #[serde(default)]
    general: PartialRule,
}

#[derive(Debug, Default, Deserialize)]
struct PartialRule {
    #[serde(default)]
    max_requests: Option<u64>,
    #[serde(default, deserialize_with = "humantime_duration::deserialize_option")]
    window: Option<Duration>,
    #[serde(default)]
    prefix: Option<String>,
}

impl PartialRule {
    fn or_defaults(self, defaults: LimitRule) -> LimitRule {
        LimitRule {
            max_requests: self.max_requests.unwrap_or(defaults.max_requests),
            window: self.window.unwrap_or(defaults.window),
            prefix: self.prefix.unwrap_or(defaults.prefix),
        }
    }
}

impl From<PartialLimiters> for LimitersConfig {
    fn from(partial: PartialLimiters) -> Self {
        Self {
            strict: partial.strict.or_defaults(default_strict()),
            general: partial.general.or_defaults(default_general()),
        }
    }
}

impl FloodgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional file layered under
    /// `FLOODGATE__`-prefixed environment variables, then fill the store
    /// endpoint from the fallback variables if still unset.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars())
    }

    /// [`FloodgateConfig::load`] reading variables from `vars` instead of
    /// the process environment.
    pub fn load_with_env<I>(path: Option<&Path>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: config::Map<String, String> = vars.into_iter().collect();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

        let mut loaded: FloodgateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FloodgateError::Config(e.to_string()))?;

        loaded.apply_fallbacks(|name| vars.get(name).cloned());
        Ok(loaded)
    }

    /// Fill a missing store URL or token from the fallback variables.
    pub fn apply_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.store.url.is_none() {
            self.store.url = lookup(URL_FALLBACK_VAR);
        }
        if self.store.token.is_none() {
            self.store.token = lookup(TOKEN_FALLBACK_VAR);
        }
    }

    /// Check the configuration for startup-fatal problems.
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Rest {
            let missing = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
            if missing(&self.store.url) {
                return Err(FloodgateError::Config(
                    "store.url is required for the rest backend".to_string(),
                ));
            }
            if missing(&self.store.token) {
                return Err(FloodgateError::Config(
                    "store.token is required for the rest backend".to_string(),
                ));
            }
        }

        self.limiters.strict.to_limiter_config()?;
        self.limiters.general.to_limiter_config()?;
        Ok(())
    }

    /// A copy safe to print, with the store token masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.store.token.is_some() {
            copy.store.token = Some("********".to_string());
        }
        copy
    }
}

impl StoreConfig {
    /// Build the configured store. Called once at startup; the returned
    /// handle is shared by every limiter.
    pub fn connect(&self) -> Result<Arc<dyn CounterStore>> {
        match self.backend {
            StoreBackend::Memory => {
                info!("Using in-memory counter store");
                Ok(Arc::new(MemoryStore::new()))
            }
            StoreBackend::Rest => {
                let store = RestStore::new(
                    self.url.as_deref().unwrap_or_default(),
                    self.token.as_deref().unwrap_or_default(),
                    self.timeout,
                )?;
                info!(url = %store.base_url(), timeout = ?self.timeout, "Using REST counter store");
                Ok(Arc::new(store))
            }
        }
    }
}

/// Serde adapter for human-readable durations ("10m", "1s 500ms").
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
