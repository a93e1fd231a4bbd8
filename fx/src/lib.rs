//! Interstellar FX
//!
//! Foreign exchange rates for wallet currency conversion.
//!
//! # Features
//!
//! - Stablecoin to real-world currency mapping
//! - Bulk rate fetching from an HTTP provider
//! - Single-slot snapshot cache with a freshness window
//! - Single-flight refresh and stale-on-error fallback
//!
//! # Example
//!
//! ```rust,ignore
//! use interstellar_fx::{FxConfig, FxRateCache, FastForexProvider};
//!
//! let config = FxConfig::from_env();
//! let provider = Arc::new(FastForexProvider::new(config.provider.clone())?);
//! let cache = FxRateCache::new(provider, config.cache);
//!
//! let rate = cache.get_rate(&CurrencyCode::usd(), &CurrencyCode::ngn()).await?;
//! ```

pub mod config;
pub mod error;
pub mod mapper;
pub mod provider;
pub mod cache;
pub mod conversion;

pub use config::{FxConfig, ProviderConfig, RateCacheConfig};
pub use error::{FxError, FxResult};
pub use mapper::map_to_real_currency;
pub use provider::{FastForexProvider, RateProvider, RateSnapshot, StaticRateProvider};
pub use cache::{CacheStats, FxRateCache};
pub use conversion::Conversion;
