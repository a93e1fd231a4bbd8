//! Simulation controller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use interstellar_common::{CurrencyCode, UserId};
use interstellar_fx::{FxRateCache, RateCacheConfig, StaticRateProvider};
use interstellar_ledger::{LedgerConfig, LedgerEngine, LedgerResult, Transaction, TransactionType, Wallet};

use crate::metrics::{OpKind, SimulationMetrics};

/// Wallet currencies the simulation trades in.
const CURRENCIES: [&str; 4] = ["USDx", "cNGN", "EURx", "cXAF"];

/// Page size used when reading transaction history back.
const HISTORY_PAGE: usize = 100;

fn static_rates() -> anyhow::Result<FxRateCache> {
    let provider = StaticRateProvider::new("simulator");
    let usd = CurrencyCode::usd();
    for (quote, rate) in [
        ("NGN", Decimal::from(1500)),
        ("EUR", Decimal::new(92, 2)),
        ("XAF", Decimal::from(605)),
    ] {
        provider.set_pair(usd.clone(), CurrencyCode::new(quote)?, rate);
    }
    provider.set_pair(
        CurrencyCode::new("EUR")?,
        CurrencyCode::ngn(),
        Decimal::from(1630),
    );
    provider.set_pair(
        CurrencyCode::new("EUR")?,
        CurrencyCode::new("XAF")?,
        Decimal::new(65596, 2),
    );
    provider.set_pair(
        CurrencyCode::ngn(),
        CurrencyCode::new("XAF")?,
        Decimal::new(40, 2),
    );

    Ok(FxRateCache::new(
        Arc::new(provider),
        RateCacheConfig::default(),
    ))
}

/// End-of-run ledger checks.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    /// Wallets inspected.
    pub wallets: usize,
    /// Balances found below zero.
    pub negative_balances: usize,
    /// Currencies whose total across wallets differs from the transaction history.
    pub mismatched: Vec<CurrencyCode>,
    /// Total held per currency across all wallets.
    pub totals: BTreeMap<CurrencyCode, Decimal>,
}

impl Verification {
    pub fn is_consistent(&self) -> bool {
        self.negative_balances == 0 && self.mismatched.is_empty()
    }
}

/// Controls the simulation.
pub struct SimulationController {
    /// Number of wallets.
    wallet_count: usize,
    /// Concurrent workers.
    concurrency: usize,
    /// Base seed; worker `i` uses `seed + i`.
    seed: u64,
    /// Engine under test.
    engine: Arc<LedgerEngine>,
    /// Simulated wallets.
    wallets: Arc<Vec<Wallet>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(wallet_count: usize, concurrency: usize, seed: Option<u64>) -> anyhow::Result<Self> {
        let seed = seed.unwrap_or_else(rand::random);
        let engine = LedgerEngine::in_memory(static_rates()?, LedgerConfig::default());

        Ok(Self {
            wallet_count,
            concurrency: concurrency.max(1),
            seed,
            engine: Arc::new(engine),
            wallets: Arc::new(Vec::new()),
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    /// Open wallets and fund each with every currency.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!(wallets = self.wallet_count, seed = self.seed, "Initializing simulation");

        let mut wallets = Vec::with_capacity(self.wallet_count);
        for _ in 0..self.wallet_count {
            let wallet = self.engine.open_wallet(UserId::new()).await?;
            for (code, amount) in [("USDx", 1_000), ("cNGN", 1_500_000), ("EURx", 900), ("cXAF", 600_000)] {
                self.engine
                    .deposit(wallet.user_id, &CurrencyCode::new(code)?, Decimal::from(amount))
                    .await?;
            }
            debug!(wallet_id = %wallet.id, address = %wallet.address, "Wallet funded");
            wallets.push(wallet);
        }

        self.wallets = Arc::new(wallets);
        Ok(())
    }

    /// Run `operations` random operations across the configured workers.
    pub async fn run(&self, operations: usize) -> anyhow::Result<SimulationMetrics> {
        if self.wallets.len() < 2 {
            anyhow::bail!("at least two wallets are needed to simulate transfers");
        }

        info!(operations, workers = self.concurrency, "Running simulation");

        let currencies = CURRENCIES
            .iter()
            .map(|c| CurrencyCode::new(*c))
            .collect::<Result<Vec<_>, _>>()?;
        let currencies = Arc::new(currencies);
        let next = Arc::new(AtomicUsize::new(0));

        let workers = (0..self.concurrency).map(|worker| {
            let engine = self.engine.clone();
            let wallets = self.wallets.clone();
            let currencies = currencies.clone();
            let next = next.clone();
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(worker as u64));

            tokio::spawn(async move {
                let mut metrics = SimulationMetrics::new();
                while next.fetch_add(1, Ordering::Relaxed) < operations {
                    let started = Instant::now();
                    let (kind, result) = random_operation(&engine, &wallets, &currencies, &mut rng).await;
                    match result {
                        Ok(_) => metrics.record_success(kind, started.elapsed().as_micros() as u64),
                        Err(e) => metrics.record_failure(e.kind().code()),
                    }
                }
                metrics
            })
        });

        let mut total = SimulationMetrics::new();
        for result in futures::future::join_all(workers).await {
            total.merge(result?);
        }
        Ok(total)
    }

    /// Check balances against the transaction history.
    pub async fn verify(&self) -> anyhow::Result<Verification> {
        let report = self.engine.recover_incomplete().await?;
        if report.needs_review > 0 {
            warn!(?report, "Transfers left for review");
        }

        let mut totals: BTreeMap<CurrencyCode, Decimal> = BTreeMap::new();
        let mut expected: BTreeMap<CurrencyCode, Decimal> = BTreeMap::new();
        let mut negative_balances = 0;

        for wallet in self.wallets.iter() {
            let current = self.engine.wallet(&wallet.user_id).await?;
            for (currency, amount) in &current.balances {
                if *amount < Decimal::ZERO {
                    warn!(wallet_id = %current.id, %currency, %amount, "Negative balance");
                    negative_balances += 1;
                }
                *totals.entry(currency.clone()).or_default() += *amount;
            }

            let mut offset = 0;
            loop {
                let page = self
                    .engine
                    .transactions_for_user(&wallet.user_id, HISTORY_PAGE, offset)
                    .await?;
                for tx in &page {
                    apply_history(&mut expected, tx);
                }
                if page.len() < HISTORY_PAGE {
                    break;
                }
                offset += page.len();
            }
        }

        totals.retain(|_, v| !v.is_zero());
        expected.retain(|_, v| !v.is_zero());

        let mismatched = totals
            .keys()
            .chain(expected.keys())
            .filter(|c| totals.get(*c) != expected.get(*c))
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(Verification {
            wallets: self.wallets.len(),
            negative_balances,
            mismatched,
            totals,
        })
    }
}

/// Net effect of one transaction on system-wide totals.
fn apply_history(totals: &mut BTreeMap<CurrencyCode, Decimal>, tx: &Transaction) {
    let (credit_currency, credit_amount) = tx.credited();
    if tx.transaction_type != TransactionType::Deposit {
        *totals.entry(tx.from_currency.clone()).or_default() -= tx.from_amount;
    }
    *totals.entry(credit_currency.clone()).or_default() += credit_amount;
}

async fn random_operation(
    engine: &LedgerEngine,
    wallets: &[Wallet],
    currencies: &[CurrencyCode],
    rng: &mut StdRng,
) -> (OpKind, LedgerResult<Transaction>) {
    let from_idx = rng.gen_range(0..wallets.len());
    let wallet = &wallets[from_idx];
    let currency = &currencies[rng.gen_range(0..currencies.len())];
    let amount = Decimal::new(rng.gen_range(1..=50_000), 2);

    match rng.gen_range(0..10) {
        0..=1 => (
            OpKind::Deposit,
            engine.deposit(wallet.user_id, currency, amount).await,
        ),
        2..=5 => {
            let to = &currencies[rng.gen_range(0..currencies.len())];
            (
                OpKind::Swap,
                engine.swap(wallet.user_id, currency, to, amount).await,
            )
        }
        _ => {
            let mut to_idx = rng.gen_range(0..wallets.len());
            while to_idx == from_idx {
                to_idx = rng.gen_range(0..wallets.len());
            }
            let convert_to = if rng.gen_bool(0.5) {
                Some(&currencies[rng.gen_range(0..currencies.len())])
            } else {
                None
            };
            (
                OpKind::Transfer,
                engine
                    .transfer(
                        wallet.user_id,
                        &wallets[to_idx].address,
                        currency,
                        amount,
                        convert_to,
                    )
                    .await,
            )
        }
    }
}
