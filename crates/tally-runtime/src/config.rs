#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Configuration is plain data with `Default` values and `with_*` builders.
//! [`SessionConfig::from_env`] overlays environment variables:
//!
//! | Variable                   | Field                   | Notes                |
//! |----------------------------|-------------------------|----------------------|
//! | `TALLY_INITIAL_COUNT`      | `initial_count`         | any `i64`            |
//! | `TALLY_RESOLVE_TIMEOUT_MS` | `lookup.resolve_timeout`| `0` disables timeout |
//!
//! Unparseable values keep the default and are reported in
//! [`SessionConfigParse::errors`].

use std::env;
use std::fmt;
use std::time::Duration;

/// Default bound on a single resolution.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

const ENV_INITIAL_COUNT: &str = "TALLY_INITIAL_COUNT";
const ENV_RESOLVE_TIMEOUT_MS: &str = "TALLY_RESOLVE_TIMEOUT_MS";

/// Configuration for a [`KeyedLookup`](crate::reactive::KeyedLookup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupConfig {
    /// Upper bound on a single resolution. `None` waits forever.
    pub resolve_timeout: Option<Duration>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Some(DEFAULT_RESOLVE_TIMEOUT),
        }
    }
}

impl LookupConfig {
    /// Set the resolve timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = Some(timeout);
        self
    }

    /// Disable the resolve timeout.
    #[must_use]
    pub fn without_timeout(mut self) -> Self {
        self.resolve_timeout = None;
        self
    }
}

/// Configuration for a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionConfig {
    /// Starting value of the session counter.
    pub initial_count: i64,
    /// Lookup settings.
    pub lookup: LookupConfig,
}

impl SessionConfig {
    #[must_use]
    pub fn with_initial_count(mut self, initial: i64) -> Self {
        self.initial_count = initial;
        self
    }

    #[must_use]
    pub fn with_lookup(mut self, lookup: LookupConfig) -> Self {
        self.lookup = lookup;
        self
    }

    /// Parse config from environment variables, dropping diagnostics.
    #[must_use]
    pub fn from_env() -> SessionConfig {
        Self::from_env_with(|key| env::var(key).ok()).config
    }

    /// Parse config through an arbitrary variable source.
    #[must_use]
    pub fn from_env_with<F>(mut get: F) -> SessionConfigParse
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = SessionConfig::default();
        let mut errors = Vec::new();

        if let Some(raw) = get(ENV_INITIAL_COUNT) {
            let parsed = raw.trim().parse::<i64>();
            match parsed {
                Ok(v) => config.initial_count = v,
                Err(_) => errors.push(ConfigError::new(
                    ENV_INITIAL_COUNT,
                    raw,
                    "expected a signed integer",
                )),
            }
        }

        if let Some(raw) = get(ENV_RESOLVE_TIMEOUT_MS) {
            let parsed = raw.trim().parse::<u64>();
            match parsed {
                Ok(0) => config.lookup.resolve_timeout = None,
                Ok(ms) => config.lookup.resolve_timeout = Some(Duration::from_millis(ms)),
                Err(_) => errors.push(ConfigError::new(
                    ENV_RESOLVE_TIMEOUT_MS,
                    raw,
                    "expected milliseconds as an unsigned integer",
                )),
            }
        }

        SessionConfigParse { config, errors }
    }

    /// Validate config constraints and return all violations.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.lookup.resolve_timeout == Some(Duration::ZERO) {
            errors.push(ConfigError::new(
                "lookup.resolve_timeout",
                "0ms",
                "use None to disable the timeout",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Config parse result with diagnostics.
#[derive(Debug, Clone)]
pub struct SessionConfigParse {
    pub config: SessionConfig,
    pub errors: Vec<ConfigError>,
}

/// Configuration error with field context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for ConfigError {}
