//! Runtime configuration
//!
//! Loaded from environment variables at startup and validated before the
//! manifest is built. The base URLs feed the outbound URL table; local
//! mode switches the collaborators to their in-memory implementations.
//!
//! Recognised variables:
//! - `GANTRY_HTTP_URL` — public base for HTTP routes (`https://...`)
//! - `GANTRY_WS_URL` — public base for socket connections (`wss://...`)
//! - `GANTRY_LOCAL` — `1`/`true` switches local mode on

pub mod logging;

use thiserror::Error;
use url::Url;

/// Default and maximum HTTP handler timeout, seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const MAX_HTTP_TIMEOUT_SECS: u64 = 30;

/// Queue handler timeout bounds, seconds
pub const DEFAULT_QUEUE_TIMEOUT_SECS: u64 = 30;
pub const MAX_QUEUE_TIMEOUT_SECS: u64 = 500;

/// Socket message handler timeout bounds, seconds
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 10;
pub const MAX_SOCKET_TIMEOUT_SECS: u64 = 30;

/// Configuration failure
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var}: invalid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },

    #[error("{var}: expected scheme {expected}, got '{actual}'")]
    InvalidScheme {
        var: &'static str,
        expected: &'static str,
        actual: String,
    },
}

/// Process-wide runtime configuration
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Public base URL for HTTP routes; absent means relative URLs
    pub http_base_url: Option<Url>,
    /// Public base URL for socket connections
    pub ws_base_url: Option<Url>,
    /// Local mode: in-memory collaborators, queue deletes are no-ops
    pub local: bool,
}

impl RuntimeConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_base_url = parse_url_var("GANTRY_HTTP_URL")?;
        let ws_base_url = parse_url_var("GANTRY_WS_URL")?;
        let local = std::env::var("GANTRY_LOCAL")
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let config = Self {
            http_base_url,
            ws_base_url,
            local,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check scheme expectations on the configured base URLs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.http_base_url {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidScheme {
                    var: "GANTRY_HTTP_URL",
                    expected: "http(s)",
                    actual: url.scheme().to_string(),
                });
            }
        }
        if let Some(url) = &self.ws_base_url {
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidScheme {
                    var: "GANTRY_WS_URL",
                    expected: "ws(s)",
                    actual: url.scheme().to_string(),
                });
            }
        }
        Ok(())
    }
}

fn parse_url_var(var: &'static str) -> Result<Option<Url>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) if !raw.is_empty() => Url::parse(&raw)
            .map(Some)
            .map_err(|source| ConfigError::InvalidUrl { var, source }),
        _ => Ok(None),
    }
}
