//! Transport configuration.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Environment variable holding the API base URL.
pub const ENV_API_URL: &str = "GOVAI_API_URL";
/// Environment variable holding the default request timeout in seconds.
pub const ENV_TIMEOUT_SECS: &str = "GOVAI_API_TIMEOUT_SECS";
/// Environment variable holding the timeout for long-running triggers in seconds.
pub const ENV_LONG_TIMEOUT_SECS: &str = "GOVAI_API_LONG_TIMEOUT_SECS";

/// Error raised while loading a [`ClientConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive number of seconds, got {value:?}")]
    InvalidTimeout { name: &'static str, value: String },

    #[error("{name} must be an http(s) URL, got {value:?}")]
    InvalidUrl { name: &'static str, value: String },
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL every API path is appended to.
    pub base_url: String,

    /// Timeout applied to ordinary requests.
    pub timeout: Duration,

    /// Timeout for server-side triggers that run long (discovery, rescoring).
    pub long_timeout: Duration,

    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            timeout: Duration::from_secs(30),
            long_timeout: Duration::from_secs(120),
            user_agent: concat!("govai-query/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the given base URL with default timeouts.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Sets the ordinary request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the timeout for long-running triggers.
    #[must_use]
    pub const fn with_long_timeout(mut self, timeout: Duration) -> Self {
        self.long_timeout = timeout;
        self
    }

    /// Loads the configuration from `GOVAI_API_*` environment variables,
    /// falling back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_API_URL) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl {
                    name: ENV_API_URL,
                    value: url,
                });
            }
            config.base_url = url;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            config.timeout = parse_secs(ENV_TIMEOUT_SECS, value)?;
        }
        if let Some(value) = lookup(ENV_LONG_TIMEOUT_SECS) {
            config.long_timeout = parse_secs(ENV_LONG_TIMEOUT_SECS, value)?;
        }

        Ok(config)
    }
}

fn parse_secs(name: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidTimeout { name, value }),
    }
}
