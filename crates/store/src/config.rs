//! Store-wide configuration.
//!
//! `StoreConfig` covers the raw npm-style registry settings, network
//! concurrency, proxy/TLS, and retry policy. It is assembled through
//! [`StoreConfigBuilder`], which layers defaults, an optional TOML file,
//! and environment variables — the same three-tier precedence used
//! elsewhere in this codebase, collapsed here to a single concrete config
//! type rather than a generic provider chain (see DESIGN.md).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Retry policy for the HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub count: u32,
    /// Exponential backoff multiplier.
    pub factor: f64,
    /// Minimum delay before the first retry.
    pub min_timeout: Duration,
    /// Maximum delay between retries.
    pub max_timeout: Duration,
    /// Whether to add random jitter to the computed delay.
    pub randomize: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            count: 2,
            factor: 2.0,
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(10),
            randomize: true,
        }
    }
}

/// Outbound proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy to use for `http://` requests.
    pub http: Option<String>,
    /// Proxy to use for `https://` requests.
    pub https: Option<String>,
    /// Local address to bind outgoing sockets to.
    pub local_address: Option<String>,
}

/// TLS configuration for registry connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    /// Path to a client certificate.
    pub certificate: Option<String>,
    /// Path to a client key.
    pub key: Option<String>,
    /// Path to a custom CA bundle.
    pub ca: Option<String>,
    /// Whether to enforce strict certificate validation.
    pub strict: bool,
}

/// Store-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Raw npm-style config passthrough (`registry`, scoped registries, etc).
    pub raw_npm_config: HashMap<String, String>,
    /// Always send credentials, even to hosts that don't match the registry host.
    pub always_auth: bool,
    /// The normalized default registry URL.
    pub registry: String,
    /// Maximum number of concurrent network operations admitted by the scheduler.
    pub network_concurrency: usize,
    /// Outbound proxy settings.
    pub proxy: ProxyConfig,
    /// TLS settings.
    pub ssl: SslConfig,
    /// Retry policy for downloads and metadata fetches.
    pub retry: RetryConfig,
    /// User agent string sent with every request.
    pub user_agent: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            raw_npm_config: HashMap::new(),
            always_auth: false,
            registry: "https://registry.npmjs.org".to_string(),
            network_concurrency: 16,
            proxy: ProxyConfig::default(),
            ssl: SslConfig { strict: true, ..SslConfig::default() },
            retry: RetryConfig::default(),
            user_agent: None,
        }
    }
}

impl StoreConfig {
    /// Start building a configuration from scratch.
    #[must_use]
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    fn validate(&self) -> StoreResult<()> {
        if self.network_concurrency == 0 {
            return Err(StoreError::InvalidConfig {
                reason: "network_concurrency must be greater than zero".to_string(),
            });
        }
        if self.registry.is_empty() {
            return Err(StoreError::InvalidConfig { reason: "registry must not be empty".to_string() });
        }
        Ok(())
    }
}

/// Builds a [`StoreConfig`] by layering defaults, an optional file, and environment overrides.
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Seed the builder with documented defaults (this is also the starting point with no
    /// further calls, since [`StoreConfig::default`] already supplies them).
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = StoreConfig::default();
        self
    }

    /// Merge in a TOML configuration file, if it exists. Missing files are not an error;
    /// malformed ones are.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(self);
        }
        let contents = std::fs::read_to_string(path)?;
        let from_file: StoreConfig = toml::from_str(&contents)
            .map_err(|e| StoreError::InvalidConfig { reason: format!("{}: {e}", path.display()) })?;
        self.config = from_file;
        Ok(self)
    }

    /// Merge in environment variables of the shape `<PREFIX>_NETWORK_CONCURRENCY`,
    /// `<PREFIX>_REGISTRY`, `<PREFIX>_ALWAYS_AUTH`, `<PREFIX>_USER_AGENT`.
    #[must_use]
    pub fn with_env(mut self, prefix: &str) -> Self {
        if let Ok(v) = std::env::var(format!("{prefix}_NETWORK_CONCURRENCY")) {
            if let Ok(n) = v.parse() {
                self.config.network_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var(format!("{prefix}_REGISTRY")) {
            self.config.registry = v;
        }
        if let Ok(v) = std::env::var(format!("{prefix}_ALWAYS_AUTH")) {
            self.config.always_auth = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var(format!("{prefix}_USER_AGENT")) {
            self.config.user_agent = Some(v);
        }
        self
    }

    /// Validate and produce the final [`StoreConfig`].
    pub fn build(self) -> StoreResult<StoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StoreConfig::builder().with_defaults().build().unwrap();
        assert_eq!(config.network_concurrency, 16);
        assert_eq!(config.registry, "https://registry.npmjs.org");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = StoreConfig::default();
        config.network_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = StoreConfig::builder().with_file("/nonexistent/path.toml").unwrap().build().unwrap();
        assert_eq!(config.network_concurrency, 16);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("PKGSTORE_TEST_NETWORK_CONCURRENCY", "4");
        let config = StoreConfigBuilder::default()
            .with_defaults()
            .with_env("PKGSTORE_TEST")
            .build()
            .unwrap();
        assert_eq!(config.network_concurrency, 4);
        std::env::remove_var("PKGSTORE_TEST_NETWORK_CONCURRENCY");
    }
}
