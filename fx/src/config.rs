//! FX configuration.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use interstellar_common::time::constants;

/// Upstream rate provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider base URL; the bulk endpoint is `{base_url}/fetch-all`.
    pub base_url: String,
    /// API key sent with every request.
    pub api_key: String,
    /// HTTP request timeout.
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.fastforex.io".to_string(),
            api_key: String::new(),
            request_timeout: constants::rate_fetch_timeout(),
        }
    }
}

/// Configuration for the rate cache.
#[derive(Debug, Clone)]
pub struct RateCacheConfig {
    /// How long a snapshot is served before a refresh is attempted.
    pub freshness_window: ChronoDuration,
    /// Hard limit on one upstream fetch, after which it counts as failed.
    pub fetch_timeout: Duration,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            freshness_window: constants::rate_freshness_window(),
            fetch_timeout: constants::rate_fetch_timeout(),
        }
    }
}

/// FX configuration.
#[derive(Debug, Clone, Default)]
pub struct FxConfig {
    /// Provider configuration.
    pub provider: ProviderConfig,
    /// Cache configuration.
    pub cache: RateCacheConfig,
}

impl FxConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("FX_API_BASE_URL") {
            config.provider.base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(key) =
            std::env::var("FX_API_KEY").or_else(|_| std::env::var("EXCHANGERATE_API_KEY"))
        {
            config.provider.api_key = key;
        }

        if let Ok(secs) = std::env::var("FX_CACHE_TTL_SECS") {
            if let Ok(secs) = secs.parse() {
                config.cache.freshness_window = ChronoDuration::seconds(secs);
            }
        }

        if let Ok(secs) = std::env::var("FX_FETCH_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.cache.fetch_timeout = Duration::from_secs(secs);
                config.provider.request_timeout = Duration::from_secs(secs);
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.provider.base_url.is_empty() {
            return Err("FX provider base URL cannot be empty".to_string());
        }

        if self.provider.api_key.is_empty() {
            return Err("FX provider API key is required".to_string());
        }

        if self.cache.freshness_window <= ChronoDuration::zero() {
            return Err("Rate freshness window must be positive".to_string());
        }

        if self.cache.fetch_timeout.is_zero() {
            return Err("Rate fetch timeout must be positive".to_string());
        }

        Ok(())
    }
}
