//! Rate provider trait and implementations.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interstellar_common::CurrencyCode;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{FxError, FxResult};

/// All quotes for one base currency, as fetched at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSnapshot {
    /// Currency the quotes are expressed relative to.
    pub base: CurrencyCode,
    /// Quote currency to rate (units of quote per one unit of base).
    pub rates: BTreeMap<CurrencyCode, Decimal>,
    /// When the snapshot was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl RateSnapshot {
    /// Create a snapshot stamped with the current time.
    pub fn new(base: CurrencyCode, rates: BTreeMap<CurrencyCode, Decimal>) -> Self {
        Self {
            base,
            rates,
            fetched_at: Utc::now(),
        }
    }

    /// Look up the rate for a quote currency.
    pub fn rate(&self, quote: &CurrencyCode) -> Option<Decimal> {
        self.rates.get(quote).copied()
    }
}

/// Trait for FX rate providers.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch every quote for `base` in one call.
    async fn fetch_rates(&self, base: &CurrencyCode) -> FxResult<RateSnapshot>;
}

/// Body of the provider's `fetch-all` endpoint.
#[derive(Debug, Deserialize)]
struct FetchAllResponse {
    #[allow(dead_code)]
    base: Option<String>,
    #[serde(default)]
    results: HashMap<String, f64>,
    #[allow(dead_code)]
    updated: Option<String>,
    #[allow(dead_code)]
    ms: Option<u64>,
}

/// HTTP provider for the FastForex bulk rates API.
pub struct FastForexProvider {
    client: Client,
    config: ProviderConfig,
}

impl FastForexProvider {
    /// Create a provider with its own HTTP client.
    pub fn new(config: ProviderConfig) -> FxResult<Self> {
        if config.api_key.is_empty() {
            return Err(FxError::Configuration("FX API key is required".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FxError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/fetch-all", self.config.base_url.trim_end_matches('/'))
    }

    /// Turn the decoded body into a snapshot, dropping entries that cannot be represented.
    fn decode(base: &CurrencyCode, body: FetchAllResponse) -> FxResult<RateSnapshot> {
        let mut rates = BTreeMap::new();

        for (code, value) in body.results {
            let Ok(quote) = CurrencyCode::new(code.as_str()) else {
                warn!(base = %base, code = %code, "Skipping malformed quote currency");
                continue;
            };
            let Some(rate) = Decimal::from_f64(value) else {
                warn!(base = %base, quote = %quote, value, "Skipping non-finite rate");
                continue;
            };
            rates.insert(quote, rate);
        }

        if rates.is_empty() {
            return Err(FxError::EmptyRates(base.clone()));
        }

        Ok(RateSnapshot::new(base.clone(), rates))
    }
}

#[async_trait]
impl RateProvider for FastForexProvider {
    fn name(&self) -> &str {
        "fastforex"
    }

    async fn fetch_rates(&self, base: &CurrencyCode) -> FxResult<RateSnapshot> {
        // Errors are stripped of their URL: it carries the API key.
        let response = self
            .client
            .get(self.endpoint())
            .query(&[("from", base.as_str()), ("api_key", self.config.api_key.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FxError::UpstreamTimeout(self.config.request_timeout)
                } else {
                    FxError::Upstream(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(base = %base, status = status.as_u16(), "Rate provider returned error status");
            return Err(FxError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let body: FetchAllResponse = response
            .json()
            .await
            .map_err(|e| FxError::Upstream(format!("failed to decode response: {}", e.without_url())))?;

        let snapshot = Self::decode(base, body)?;
        debug!(base = %base, quotes = snapshot.rates.len(), "Fetched rates");
        Ok(snapshot)
    }
}

/// Provider serving a fixed, in-process rate table.
///
/// Used for offline runs and the simulator; rates can be changed at runtime.
pub struct StaticRateProvider {
    name: String,
    tables: RwLock<HashMap<CurrencyCode, BTreeMap<CurrencyCode, Decimal>>>,
}

impl StaticRateProvider {
    /// Create an empty provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Set the rate for `base -> quote`.
    pub fn set_rate(&self, base: CurrencyCode, quote: CurrencyCode, rate: Decimal) {
        self.tables
            .write()
            .entry(base)
            .or_default()
            .insert(quote, rate);
    }

    /// Set `base -> quote` and the reciprocal `quote -> base`.
    pub fn set_pair(&self, base: CurrencyCode, quote: CurrencyCode, rate: Decimal) {
        if !rate.is_zero() {
            self.set_rate(quote.clone(), base.clone(), Decimal::ONE / rate);
        }
        self.set_rate(base, quote, rate);
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rates(&self, base: &CurrencyCode) -> FxResult<RateSnapshot> {
        self.tables
            .read()
            .get(base)
            .filter(|rates| !rates.is_empty())
            .map(|rates| RateSnapshot::new(base.clone(), rates.clone()))
            .ok_or_else(|| FxError::EmptyRates(base.clone()))
    }
}
