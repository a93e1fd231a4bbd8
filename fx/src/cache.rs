//! Single-slot FX rate cache with single-flight refresh.
//!
//! The cache holds one [`RateSnapshot`], for whichever base currency was
//! fetched last. Fetching a different base evicts it, so workloads that
//! alternate between many bases will refetch often; the slot is kept single
//! to match the provider's bulk `fetch-all` call and its quota.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use interstellar_common::{is_within, CurrencyCode};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::config::RateCacheConfig;
use crate::conversion::Conversion;
use crate::error::{FxError, FxResult};
use crate::mapper::map_to_real_currency;
use crate::provider::{RateProvider, RateSnapshot};

type SharedFetch = Shared<BoxFuture<'static, FxResult<RateSnapshot>>>;

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from a fresh snapshot.
    pub hits: u64,
    /// Reads that needed a refresh.
    pub misses: u64,
    /// Calls actually made to the provider.
    pub upstream_fetches: u64,
    /// Provider calls that failed.
    pub upstream_failures: u64,
    /// Reads answered with an expired snapshot after a failed refresh.
    pub stale_served: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    upstream_fetches: AtomicU64,
    upstream_failures: AtomicU64,
    stale_served: AtomicU64,
}

struct CacheInner {
    provider: Arc<dyn RateProvider>,
    config: RateCacheConfig,
    snapshot: RwLock<Option<RateSnapshot>>,
    inflight: Mutex<HashMap<CurrencyCode, SharedFetch>>,
    counters: Counters,
}

impl CacheInner {
    async fn fetch_upstream(&self, base: &CurrencyCode) -> FxResult<RateSnapshot> {
        self.counters.upstream_fetches.fetch_add(1, Ordering::Relaxed);

        let fetched = tokio::time::timeout(self.config.fetch_timeout, self.provider.fetch_rates(base))
            .await
            .unwrap_or(Err(FxError::UpstreamTimeout(self.config.fetch_timeout)));

        let mut snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.counters.upstream_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    provider = self.provider.name(),
                    base = %base,
                    error = %e,
                    "Rate fetch failed"
                );
                return Err(e);
            }
        };

        if snapshot.rates.is_empty() {
            self.counters.upstream_failures.fetch_add(1, Ordering::Relaxed);
            return Err(FxError::EmptyRates(base.clone()));
        }

        snapshot.base = base.clone();
        Ok(snapshot)
    }

    /// Swap a new snapshot into the slot.
    fn install(&self, snapshot: RateSnapshot) {
        let mut slot = self.snapshot.write();
        if let Some(previous) = slot.as_ref() {
            if previous.base != snapshot.base {
                debug!(evicted = %previous.base, base = %snapshot.base, "Evicting cached snapshot");
            }
        }
        *slot = Some(snapshot);
    }
}

/// Thread-safe FX rate cache.
///
/// Cloning is cheap and clones share the same snapshot.
#[derive(Clone)]
pub struct FxRateCache {
    inner: Arc<CacheInner>,
}

impl FxRateCache {
    /// Create a cache in front of `provider`.
    pub fn new(provider: Arc<dyn RateProvider>, config: RateCacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                provider,
                config,
                snapshot: RwLock::new(None),
                inflight: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Get the snapshot for `base`, refreshing it if it is missing or expired.
    ///
    /// If the refresh fails and an expired snapshot for the same base is still
    /// cached, the expired snapshot is returned instead of the error.
    #[instrument(skip(self), fields(base = %base))]
    pub async fn get_rates(&self, base: &CurrencyCode) -> FxResult<RateSnapshot> {
        if let Some(snapshot) = self.fresh(base) {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit");
            return Ok(snapshot);
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache miss");

        match self.single_flight(base).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => match self.cached_for(base) {
                Some(stale) => {
                    self.inner.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        error = %e,
                        fetched_at = %stale.fetched_at,
                        "Serving stale rates after failed refresh"
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Get the rate from `base` to `quote`.
    pub async fn get_rate(&self, base: &CurrencyCode, quote: &CurrencyCode) -> FxResult<Decimal> {
        self.lookup(base, quote).await.map(|(rate, _)| rate)
    }

    /// Rate plus the fetch time of the snapshot it was read from. The par rate
    /// between identical currencies comes from no snapshot.
    async fn lookup(
        &self,
        base: &CurrencyCode,
        quote: &CurrencyCode,
    ) -> FxResult<(Decimal, Option<DateTime<Utc>>)> {
        if base == quote {
            return Ok((Decimal::ONE, None));
        }

        let snapshot = self.get_rates(base).await?;
        let rate = snapshot.rate(quote).ok_or_else(|| FxError::RateNotFound {
            base: base.clone(),
            quote: quote.clone(),
        })?;
        Ok((rate, Some(snapshot.fetched_at)))
    }

    /// Fetch a fresh snapshot for `base` regardless of the cached one.
    ///
    /// Failures are returned; there is no stale fallback here.
    #[instrument(skip(self), fields(base = %base))]
    pub async fn refresh(&self, base: &CurrencyCode) -> FxResult<RateSnapshot> {
        let snapshot = self.single_flight(base).await?;
        info!(quotes = snapshot.rates.len(), "Rates refreshed");
        Ok(snapshot)
    }

    /// Price converting `amount` of wallet currency `from` into wallet currency `to`.
    ///
    /// Both codes go through the stablecoin mapper before the rate lookup; the
    /// result is rounded toward zero to `scale` places.
    pub async fn quote(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        amount: Decimal,
        scale: u32,
    ) -> FxResult<Conversion> {
        let real_from = map_to_real_currency(from);
        let real_to = map_to_real_currency(to);

        let (rate, fetched_at) = self.lookup(&real_from, &real_to).await?;
        if rate <= Decimal::ZERO {
            return Err(FxError::InvalidRate {
                base: real_from,
                quote: real_to,
                rate,
            });
        }

        Conversion::new(
            from.clone(),
            to.clone(),
            amount,
            rate,
            scale,
            fetched_at.unwrap_or_else(Utc::now),
        )
    }

    /// Convert with the default amount scale.
    pub async fn convert(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        amount: Decimal,
    ) -> FxResult<Conversion> {
        self.quote(from, to, amount, interstellar_common::DEFAULT_AMOUNT_SCALE)
            .await
    }

    /// Copy of the cached snapshot, fresh or not.
    pub fn cached(&self) -> Option<RateSnapshot> {
        self.inner.snapshot.read().clone()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            upstream_fetches: c.upstream_fetches.load(Ordering::Relaxed),
            upstream_failures: c.upstream_failures.load(Ordering::Relaxed),
            stale_served: c.stale_served.load(Ordering::Relaxed),
        }
    }

    fn cached_for(&self, base: &CurrencyCode) -> Option<RateSnapshot> {
        self.inner
            .snapshot
            .read()
            .as_ref()
            .filter(|s| &s.base == base)
            .cloned()
    }

    fn fresh(&self, base: &CurrencyCode) -> Option<RateSnapshot> {
        self.cached_for(base)
            .filter(|s| is_within(s.fetched_at, self.inner.config.freshness_window))
    }

    /// Join the in-flight fetch for `base`, or start one.
    ///
    /// The fetch future installs its own result and removes itself from the
    /// in-flight table, so it completes even if the caller that started it is
    /// dropped and another waiter keeps polling.
    fn single_flight(&self, base: &CurrencyCode) -> SharedFetch {
        let mut inflight = self.inner.inflight.lock();
        if let Some(pending) = inflight.get(base) {
            debug!(base = %base, "Joining in-flight rate fetch");
            return pending.clone();
        }

        let inner = Arc::clone(&self.inner);
        let key = base.clone();
        let fetch = async move {
            let result = inner.fetch_upstream(&key).await;
            if let Ok(snapshot) = &result {
                inner.install(snapshot.clone());
            }
            inner.inflight.lock().remove(&key);
            result
        }
        .boxed()
        .shared();

        inflight.insert(base.clone(), fetch.clone());
        fetch
    }
}
