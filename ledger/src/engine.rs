//! Ledger engine: deposits, swaps and transfers over the wallet stores.

use std::sync::Arc;

use interstellar_common::{
    ensure_positive, max_amount, CurrencyCode, ErrorKind, IntentId, Money, TransactionId, UserId,
    ValidationError, WalletAddress, WalletId,
};
use interstellar_fx::{Conversion, FxRateCache};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::{AuditEvent, AuditOperation, AuditSink, TracingAuditSink};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult, StoreError, StoreResult};
use crate::journal::{IntentStage, TransferIntent, TransferJournal};
use crate::locks::WalletLocks;
use crate::memory::{InMemoryTransactionStore, InMemoryTransferJournal, InMemoryWalletStore};
use crate::metrics::{LedgerMetrics, MetricsSnapshot};
use crate::store::{TransactionStore, WalletStore};
use crate::transaction::{TargetLeg, Transaction};
use crate::wallet::{Balances, Wallet};

/// Outcome of a [`LedgerEngine::recover_incomplete`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Intents found finished and marked completed.
    pub completed: usize,
    /// Intents unwound.
    pub compensated: usize,
    /// Intents flagged for manual review.
    pub needs_review: usize,
    /// Intents left untouched because a store call failed; retried next pass.
    pub deferred: usize,
}

/// Result of claiming a transfer intent for recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Won,
    /// Another actor moved the intent first.
    Lost,
    Failed,
}

fn claim_outcome(id: &IntentId, result: StoreResult<()>) -> Claim {
    match result {
        Ok(()) => Claim::Won,
        Err(StoreError::Conflict(reason)) => {
            debug!(intent_id = %id, %reason, "Intent already claimed");
            Claim::Lost
        }
        Err(e) => {
            warn!(intent_id = %id, error = ?e, "Could not claim transfer intent");
            Claim::Failed
        }
    }
}

fn wallet_lookup(e: StoreError) -> LedgerError {
    match e {
        StoreError::NotFound => LedgerError::WalletNotFound,
        other => LedgerError::PersistenceFailed(other),
    }
}

/// The ledger engine.
///
/// Writes to one wallet are serialized through an in-process lock table and
/// checked against the wallet version on write, so a conflicting writer in
/// another process is detected and retried.
pub struct LedgerEngine {
    wallets: Arc<dyn WalletStore>,
    transactions: Arc<dyn TransactionStore>,
    journal: Arc<dyn TransferJournal>,
    rates: FxRateCache,
    config: LedgerConfig,
    locks: WalletLocks,
    audit: Arc<dyn AuditSink>,
    metrics: LedgerMetrics,
}

impl LedgerEngine {
    /// Create an engine over the given stores.
    pub fn new(
        wallets: Arc<dyn WalletStore>,
        transactions: Arc<dyn TransactionStore>,
        journal: Arc<dyn TransferJournal>,
        rates: FxRateCache,
        config: LedgerConfig,
    ) -> Self {
        Self {
            wallets,
            transactions,
            journal,
            rates,
            config,
            locks: WalletLocks::new(),
            audit: Arc::new(TracingAuditSink),
            metrics: LedgerMetrics::new(),
        }
    }

    /// Create an engine backed by in-memory stores.
    pub fn in_memory(rates: FxRateCache, config: LedgerConfig) -> Self {
        Self::new(
            Arc::new(InMemoryWalletStore::new()),
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryTransferJournal::new()),
            rates,
            config,
        )
    }

    /// Replace the audit sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn rates(&self) -> &FxRateCache {
        &self.rates
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Get current metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Open an empty wallet for a user.
    #[instrument(skip(self))]
    pub async fn open_wallet(&self, user_id: UserId) -> LedgerResult<Wallet> {
        self.metrics.attempted(AuditOperation::OpenWallet);

        let wallet = Wallet::open(user_id);
        let result = match self.wallets.create(&wallet).await {
            Ok(()) => {
                info!(wallet_id = %wallet.id, address = %wallet.address, "Wallet opened");
                Ok(wallet)
            }
            Err(StoreError::Duplicate(_)) => Err(LedgerError::WalletAlreadyExists),
            Err(e) => Err(LedgerError::PersistenceFailed(e)),
        };

        self.observe(
            AuditOperation::OpenWallet,
            user_id,
            result.as_ref().map(|w| (Some(w.id), None)),
        );
        result
    }

    /// Get a user's wallet.
    pub async fn wallet(&self, user_id: &UserId) -> LedgerResult<Wallet> {
        self.wallets.get_by_user(user_id).await.map_err(wallet_lookup)
    }

    pub async fn wallet_by_id(&self, id: &WalletId) -> LedgerResult<Wallet> {
        self.wallets.get_by_id(id).await.map_err(wallet_lookup)
    }

    pub async fn wallet_by_address(&self, address: &WalletAddress) -> LedgerResult<Wallet> {
        self.wallets.get_by_address(address).await.map_err(wallet_lookup)
    }

    /// Balance of one currency; zero when the wallet never held it.
    pub async fn balance(&self, user_id: &UserId, currency: &CurrencyCode) -> LedgerResult<Decimal> {
        Ok(self.wallet(user_id).await?.balance(currency))
    }

    /// All balances of a user's wallet.
    pub async fn balances(&self, user_id: &UserId) -> LedgerResult<Balances> {
        Ok(self.wallet(user_id).await?.balances)
    }

    pub async fn transaction(&self, id: &TransactionId) -> LedgerResult<Transaction> {
        self.transactions.get_by_id(id).await.map_err(|e| match e {
            StoreError::NotFound => LedgerError::TransactionNotFound,
            other => LedgerError::PersistenceFailed(other),
        })
    }

    /// Transactions a user initiated, newest first.
    pub async fn transactions_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> LedgerResult<Vec<Transaction>> {
        self.transactions
            .get_by_user_id(user_id, self.config.page_size(limit), offset)
            .await
            .map_err(LedgerError::PersistenceFailed)
    }

    /// Transactions a wallet sent or received, newest first.
    pub async fn transactions_for_wallet(
        &self,
        wallet_id: &WalletId,
        limit: usize,
        offset: usize,
    ) -> LedgerResult<Vec<Transaction>> {
        self.transactions
            .get_by_wallet_id(wallet_id, self.config.page_size(limit), offset)
            .await
            .map_err(LedgerError::PersistenceFailed)
    }

    /// Credit `amount` of `currency` to the user's wallet.
    #[instrument(skip(self), fields(currency = %currency, amount = %amount))]
    pub async fn deposit(
        &self,
        user_id: UserId,
        currency: &CurrencyCode,
        amount: Decimal,
    ) -> LedgerResult<Transaction> {
        self.metrics.attempted(AuditOperation::Deposit);
        let result = self.run_deposit(user_id, currency, amount).await;
        self.observe_transaction(AuditOperation::Deposit, user_id, &result);
        result
    }

    async fn run_deposit(
        &self,
        user_id: UserId,
        currency: &CurrencyCode,
        amount: Decimal,
    ) -> LedgerResult<Transaction> {
        let amount = ensure_positive(amount)?;
        let wallet = self.wallet(&user_id).await?;

        let _guard = self.locks.acquire(wallet.id).await;

        self.mutate_wallet(wallet.id, |w| w.credit(currency, amount)).await?;

        let tx = Transaction::deposit(wallet.id, user_id, currency.clone(), amount);
        if let Err(e) = self.transactions.create(&tx).await {
            error!(wallet_id = %wallet.id, error = ?e, "Deposit record failed, reverting credit");
            self.compensate(wallet.id, |w| w.debit(currency, amount)).await;
            return Err(LedgerError::PersistenceFailed(e));
        }

        info!(
            wallet_id = %wallet.id,
            transaction_id = %tx.id,
            currency = %currency,
            amount = %amount,
            "Deposit completed"
        );
        Ok(tx)
    }

    /// Convert `amount` of `from` into `to` inside the user's wallet.
    #[instrument(skip(self), fields(from = %from, to = %to, amount = %amount))]
    pub async fn swap(
        &self,
        user_id: UserId,
        from: &CurrencyCode,
        to: &CurrencyCode,
        amount: Decimal,
    ) -> LedgerResult<Transaction> {
        self.metrics.attempted(AuditOperation::Swap);
        let result = self.run_swap(user_id, from, to, amount).await;
        self.observe_transaction(AuditOperation::Swap, user_id, &result);
        result
    }

    async fn run_swap(
        &self,
        user_id: UserId,
        from: &CurrencyCode,
        to: &CurrencyCode,
        amount: Decimal,
    ) -> LedgerResult<Transaction> {
        let amount = ensure_positive(amount)?;
        if from == to {
            return Err(LedgerError::SameCurrency(from.clone()));
        }

        let wallet = self.wallet(&user_id).await?;
        wallet.ensure_funds(from, amount)?;

        let conversion = self.price(from, to, amount).await?;
        let received = conversion.result;

        let _guard = self.locks.acquire(wallet.id).await;

        self.mutate_wallet(wallet.id, |w| {
            w.debit(from, amount)?;
            w.credit(to, received)
        })
        .await?;

        let tx = Transaction::swap(
            wallet.id,
            user_id,
            from.clone(),
            amount,
            TargetLeg {
                to_currency: to.clone(),
                to_amount: received,
                exchange_rate: conversion.rate,
            },
        );
        if let Err(e) = self.transactions.create(&tx).await {
            error!(wallet_id = %wallet.id, error = ?e, "Swap record failed, reverting swap");
            self.compensate(wallet.id, |w| {
                w.debit(to, received)?;
                w.credit(from, amount)
            })
            .await;
            return Err(LedgerError::PersistenceFailed(e));
        }

        info!(
            wallet_id = %wallet.id,
            transaction_id = %tx.id,
            from = %from,
            to = %to,
            amount = %amount,
            received = %received,
            rate = %conversion.rate,
            "Swap completed"
        );
        Ok(tx)
    }

    /// Send `amount` of `from` to the wallet at `recipient`, converting into
    /// `to` on the way when given and different.
    #[instrument(skip(self), fields(recipient = %recipient, from = %from, amount = %amount))]
    pub async fn transfer(
        &self,
        user_id: UserId,
        recipient: &WalletAddress,
        from: &CurrencyCode,
        amount: Decimal,
        to: Option<&CurrencyCode>,
    ) -> LedgerResult<Transaction> {
        self.metrics.attempted(AuditOperation::Transfer);
        let result = self.run_transfer(user_id, recipient, from, amount, to).await;
        self.observe_transaction(AuditOperation::Transfer, user_id, &result);
        result
    }

    async fn run_transfer(
        &self,
        user_id: UserId,
        recipient: &WalletAddress,
        from: &CurrencyCode,
        amount: Decimal,
        to: Option<&CurrencyCode>,
    ) -> LedgerResult<Transaction> {
        let amount = ensure_positive(amount)?;

        let sender = self.wallet(&user_id).await?;
        if sender.address == *recipient {
            return Err(LedgerError::SelfTransferNotAllowed);
        }
        let receiver = self.wallet_by_address(recipient).await?;
        if sender.id == receiver.id {
            return Err(LedgerError::SelfTransferNotAllowed);
        }

        sender.ensure_funds(from, amount)?;

        let target = match to {
            Some(to) if to != from => {
                let conversion = self.price(from, to, amount).await?;
                Some(TargetLeg {
                    to_currency: to.clone(),
                    to_amount: conversion.result,
                    exchange_rate: conversion.rate,
                })
            }
            _ => None,
        };

        let tx = Transaction::transfer(
            sender.id,
            user_id,
            receiver.id,
            from.clone(),
            amount,
            target,
        );
        let (credit_currency, credit_amount) = tx.credited();
        let intent = TransferIntent::new(
            tx.id,
            sender.id,
            receiver.id,
            Money::new(amount, from.clone()),
            Money::new(credit_amount, credit_currency.clone()),
        );

        let _guard = self.locks.acquire_pair(sender.id, receiver.id).await;
        self.execute_transfer(&intent, &tx).await?;

        info!(
            sender = %sender.id,
            recipient = %receiver.id,
            transaction_id = %tx.id,
            debit = %intent.debit,
            credit = %intent.credit,
            "Transfer completed"
        );
        Ok(tx)
    }

    /// Run the debit, credit and record steps of a transfer, unwinding on failure.
    ///
    /// Caller holds both wallet locks.
    async fn execute_transfer(&self, intent: &TransferIntent, tx: &Transaction) -> LedgerResult<()> {
        self.journal
            .begin(intent)
            .await
            .map_err(LedgerError::PersistenceFailed)?;

        let debit = &intent.debit;
        let credit = &intent.credit;

        if let Err(e) = self
            .mutate_wallet(intent.sender_wallet_id, |w| w.debit(&debit.currency, debit.value))
            .await
        {
            match e {
                // The write may have landed; leave the intent for recovery.
                LedgerError::PersistenceFailed(_) => {
                    warn!(intent_id = %intent.id, "Debit outcome unknown, intent left open");
                }
                _ => self.mark(intent, IntentStage::Started, IntentStage::Aborted).await,
            }
            return Err(e);
        }
        self.mark(intent, IntentStage::Started, IntentStage::Debited).await;

        if let Err(e) = self
            .mutate_wallet(intent.recipient_wallet_id, |w| w.credit(&credit.currency, credit.value))
            .await
        {
            warn!(intent_id = %intent.id, error = ?e, "Recipient credit failed, refunding sender");
            self.refund_sender(intent, IntentStage::Debited).await;
            return Err(e);
        }
        self.mark(intent, IntentStage::Debited, IntentStage::Credited).await;

        if let Err(e) = self.transactions.create(tx).await {
            warn!(intent_id = %intent.id, error = ?e, "Transfer record failed, unwinding");
            self.unwind_credited(intent, IntentStage::Credited).await;
            return Err(LedgerError::PersistenceFailed(e));
        }
        self.mark(intent, IntentStage::Credited, IntentStage::Completed).await;

        Ok(())
    }

    /// Re-credit the sender of a debited intent currently in `stage`.
    async fn refund_sender(&self, intent: &TransferIntent, stage: IntentStage) -> bool {
        let debit = &intent.debit;
        let refunded = self
            .compensate(intent.sender_wallet_id, |w| w.credit(&debit.currency, debit.value))
            .await;

        let next = if refunded {
            IntentStage::Compensated
        } else {
            IntentStage::NeedsReview
        };
        self.mark(intent, stage, next).await;
        refunded
    }

    /// Take the credit back from the recipient, then refund the sender.
    async fn unwind_credited(&self, intent: &TransferIntent, stage: IntentStage) -> bool {
        let credit = &intent.credit;
        let reversed = self
            .compensate(intent.recipient_wallet_id, |w| {
                w.debit(&credit.currency, credit.value)
            })
            .await;

        if !reversed {
            self.mark(intent, stage, IntentStage::NeedsReview).await;
            return false;
        }
        self.refund_sender(intent, stage).await
    }

    /// Finish or unwind transfers left open by an earlier crash.
    ///
    /// Each intent is re-read under its wallet locks and claimed by a stage
    /// compare-and-set before any money moves, so a transfer that finished
    /// while recovery waited, or a concurrent recovery pass, is left alone.
    /// Intents still in `Started` may or may not have debited the sender, so
    /// they are flagged for review rather than guessed at.
    #[instrument(skip(self))]
    pub async fn recover_incomplete(&self) -> LedgerResult<RecoveryReport> {
        let open = self
            .journal
            .incomplete()
            .await
            .map_err(LedgerError::PersistenceFailed)?;

        let mut report = RecoveryReport::default();

        for listed in open {
            let _guard = self
                .locks
                .acquire_pair(listed.sender_wallet_id, listed.recipient_wallet_id)
                .await;

            let intent = match self.journal.get(&listed.id).await {
                Ok(intent) => intent,
                Err(e) => {
                    warn!(intent_id = %listed.id, error = ?e, "Could not reload transfer intent");
                    report.deferred += 1;
                    continue;
                }
            };
            if intent.stage.is_terminal() {
                debug!(intent_id = %intent.id, stage = %intent.stage, "Intent settled meanwhile");
                continue;
            }

            if intent.stage == IntentStage::Credited {
                match self.transactions.get_by_id(&intent.transaction_id).await {
                    Ok(_) => {
                        match self.claim(&intent, IntentStage::Completed).await {
                            Claim::Won => report.completed += 1,
                            Claim::Lost => {}
                            Claim::Failed => report.deferred += 1,
                        }
                        continue;
                    }
                    Err(StoreError::NotFound) => {}
                    Err(e) => {
                        warn!(intent_id = %intent.id, error = ?e, "Could not check transfer record");
                        report.deferred += 1;
                        continue;
                    }
                }
            }

            // Claimed as NeedsReview first: a crash while unwinding leaves it flagged.
            match self.claim(&intent, IntentStage::NeedsReview).await {
                Claim::Won => {}
                Claim::Lost => continue,
                Claim::Failed => {
                    report.deferred += 1;
                    continue;
                }
            }

            let settled = match intent.stage {
                IntentStage::Debited => self.refund_sender(&intent, IntentStage::NeedsReview).await,
                IntentStage::Credited => {
                    self.unwind_credited(&intent, IntentStage::NeedsReview).await
                }
                _ => {
                    error!(
                        intent_id = %intent.id,
                        sender = %intent.sender_wallet_id,
                        debit = %intent.debit,
                        "Transfer interrupted before debit was confirmed, needs review"
                    );
                    false
                }
            };
            if settled {
                report.compensated += 1;
            } else {
                report.needs_review += 1;
            }
        }

        if report != RecoveryReport::default() {
            info!(?report, "Recovery pass finished");
        }
        Ok(report)
    }

    /// Price a conversion at the configured scale.
    async fn price(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        amount: Decimal,
    ) -> LedgerResult<Conversion> {
        let conversion = self
            .rates
            .quote(from, to, amount, self.config.amount_scale)
            .await?;

        if conversion.result <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount(format!(
                "{amount} {from} converts to nothing in {to}"
            ))
            .into());
        }
        if conversion.result > max_amount() {
            return Err(ValidationError::InvalidAmount(format!(
                "{amount} {from} converts to more {to} than can be held"
            ))
            .into());
        }
        Ok(conversion)
    }

    /// Read, modify and write a wallet, retrying on version conflicts.
    async fn mutate_wallet<F>(&self, id: WalletId, mutate: F) -> LedgerResult<Wallet>
    where
        F: Fn(&mut Wallet) -> LedgerResult<()> + Send + Sync,
    {
        let mut attempt = 0;

        loop {
            let mut wallet = self.wallet_by_id(&id).await?;
            mutate(&mut wallet)?;

            match self.wallets.apply_balance_update(&wallet).await {
                Ok(stored) => return Ok(stored),
                Err(StoreError::ConcurrentModification(_))
                    if attempt < self.config.max_update_retries =>
                {
                    attempt += 1;
                    self.metrics.optimistic_retry();
                    warn!(wallet_id = %id, attempt, "Wallet version moved, retrying");
                }
                Err(StoreError::ConcurrentModification(_)) => {
                    return Err(LedgerError::ConcurrentModification);
                }
                Err(e) => return Err(wallet_lookup(e)),
            }
        }
    }

    /// Apply a compensating change, retrying with backoff. Returns false if
    /// every attempt failed.
    async fn compensate<F>(&self, id: WalletId, change: F) -> bool
    where
        F: Fn(&mut Wallet) -> LedgerResult<()> + Send + Sync,
    {
        let attempts = self.config.compensation_attempts.max(1);

        for attempt in 1..=attempts {
            match self.mutate_wallet(id, &change).await {
                Ok(_) => {
                    self.metrics.compensated();
                    warn!(wallet_id = %id, attempt, "Compensation applied");
                    return true;
                }
                Err(e) => {
                    warn!(wallet_id = %id, attempt, error = ?e, "Compensation attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.compensation_backoff * attempt).await;
                    }
                }
            }
        }

        self.metrics.compensation_failed();
        error!(wallet_id = %id, attempts, "Compensation failed, wallet needs review");
        false
    }

    /// Advance an intent from `from` to `to`, logging rather than failing.
    async fn mark(&self, intent: &TransferIntent, from: IntentStage, to: IntentStage) {
        if from == to {
            return;
        }
        if let Err(e) = self.journal.advance(&intent.id, from, to).await {
            error!(intent_id = %intent.id, %from, %to, error = ?e, "Could not advance transfer intent");
        }
    }

    /// Move an intent on from the stage it was read in.
    async fn claim(&self, intent: &TransferIntent, to: IntentStage) -> Claim {
        claim_outcome(&intent.id, self.journal.advance(&intent.id, intent.stage, to).await)
    }

    fn observe_transaction(
        &self,
        operation: AuditOperation,
        user_id: UserId,
        result: &LedgerResult<Transaction>,
    ) {
        self.observe(
            operation,
            user_id,
            result.as_ref().map(|tx| (Some(tx.wallet_id), Some(tx.id))),
        );
    }

    fn observe(
        &self,
        operation: AuditOperation,
        user_id: UserId,
        outcome: Result<(Option<WalletId>, Option<TransactionId>), &LedgerError>,
    ) {
        self.metrics.finished(operation, outcome.is_ok());

        let event = match outcome {
            Ok((wallet_id, transaction_id)) => {
                AuditEvent::succeeded(operation, user_id, wallet_id, transaction_id)
            }
            Err(e) => {
                let kind: ErrorKind = e.kind();
                debug!(operation = operation.as_str(), code = kind.code(), "Ledger call failed");
                AuditEvent::failed(operation, user_id, kind)
            }
        };
        self.audit.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use interstellar_fx::{RateCacheConfig, StaticRateProvider};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use crate::audit::ChannelAuditSink;
    use crate::transaction::{TransactionStatus, TransactionType};

    fn code(s: &str) -> CurrencyCode {
        CurrencyCode::new(s).unwrap()
    }

    fn rates() -> FxRateCache {
        let provider = StaticRateProvider::new("static");
        provider.set_pair(code("USD"), code("NGN"), dec!(1500));
        provider.set_pair(code("USD"), code("EUR"), dec!(0.9));
        FxRateCache::new(Arc::new(provider), RateCacheConfig::default())
    }

    fn engine() -> LedgerEngine {
        LedgerEngine::in_memory(rates(), LedgerConfig::default())
    }

    async fn funded(engine: &LedgerEngine, currency: &str, amount: Decimal) -> Wallet {
        let wallet = engine.open_wallet(UserId::new()).await.unwrap();
        engine
            .deposit(wallet.user_id, &code(currency), amount)
            .await
            .unwrap();
        engine.wallet(&wallet.user_id).await.unwrap()
    }

    /// Wallet store that fails, slows down, or reports version conflicts on
    /// balance writes, on demand.
    struct FlakyWalletStore {
        inner: InMemoryWalletStore,
        failing: parking_lot::Mutex<Option<WalletId>>,
        slow: parking_lot::Mutex<Option<(WalletId, Duration)>>,
        conflicts: AtomicU32,
    }

    impl FlakyWalletStore {
        fn new() -> Self {
            Self {
                inner: InMemoryWalletStore::new(),
                failing: parking_lot::Mutex::new(None),
                slow: parking_lot::Mutex::new(None),
                conflicts: AtomicU32::new(0),
            }
        }

        fn fail_writes_to(&self, id: Option<WalletId>) {
            *self.failing.lock() = id;
        }

        fn slow_writes_to(&self, id: WalletId, delay: Duration) {
            *self.slow.lock() = Some((id, delay));
        }

        /// Report the next `n` balance writes as version conflicts.
        fn conflict_next(&self, n: u32) {
            self.conflicts.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl WalletStore for FlakyWalletStore {
        async fn create(&self, wallet: &Wallet) -> StoreResult<()> {
            self.inner.create(wallet).await
        }

        async fn get_by_id(&self, id: &WalletId) -> StoreResult<Wallet> {
            self.inner.get_by_id(id).await
        }

        async fn get_by_user(&self, user_id: &UserId) -> StoreResult<Wallet> {
            self.inner.get_by_user(user_id).await
        }

        async fn get_by_address(&self, address: &WalletAddress) -> StoreResult<Wallet> {
            self.inner.get_by_address(address).await
        }

        async fn apply_balance_update(&self, wallet: &Wallet) -> StoreResult<Wallet> {
            if *self.failing.lock() == Some(wallet.id) {
                return Err(StoreError::Backend("disk full".into()));
            }
            let delay = self
                .slow
                .lock()
                .filter(|(id, _)| *id == wallet.id)
                .map(|(_, delay)| delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let pending = self.conflicts.load(Ordering::SeqCst);
            if pending > 0 {
                self.conflicts.store(pending - 1, Ordering::SeqCst);
                return Err(StoreError::ConcurrentModification(wallet.id));
            }
            self.inner.apply_balance_update(wallet).await
        }
    }

    /// Transaction store whose inserts can be switched off.
    #[derive(Default)]
    struct FlakyTransactionStore {
        inner: InMemoryTransactionStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl TransactionStore for FlakyTransactionStore {
        async fn create(&self, transaction: &Transaction) -> StoreResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.inner.create(transaction).await
        }

        async fn get_by_id(&self, id: &TransactionId) -> StoreResult<Transaction> {
            self.inner.get_by_id(id).await
        }

        async fn get_by_user_id(
            &self,
            user_id: &UserId,
            limit: usize,
            offset: usize,
        ) -> StoreResult<Vec<Transaction>> {
            self.inner.get_by_user_id(user_id, limit, offset).await
        }

        async fn get_by_wallet_id(
            &self,
            wallet_id: &WalletId,
            limit: usize,
            offset: usize,
        ) -> StoreResult<Vec<Transaction>> {
            self.inner.get_by_wallet_id(wallet_id, limit, offset).await
        }

        async fn update_status(
            &self,
            id: &TransactionId,
            status: TransactionStatus,
        ) -> StoreResult<()> {
            self.inner.update_status(id, status).await
        }
    }

    struct Harness {
        engine: Arc<LedgerEngine>,
        wallets: Arc<FlakyWalletStore>,
        transactions: Arc<FlakyTransactionStore>,
        journal: Arc<InMemoryTransferJournal>,
    }

    fn test_config() -> LedgerConfig {
        LedgerConfig {
            compensation_backoff: Duration::from_millis(1),
            ..LedgerConfig::default()
        }
    }

    fn harness() -> Harness {
        let wallets = Arc::new(FlakyWalletStore::new());
        let transactions = Arc::new(FlakyTransactionStore::default());
        let journal = Arc::new(InMemoryTransferJournal::new());
        let engine = LedgerEngine::new(
            wallets.clone(),
            transactions.clone(),
            journal.clone(),
            rates(),
            test_config(),
        );
        Harness {
            engine: Arc::new(engine),
            wallets,
            transactions,
            journal,
        }
    }

    impl Harness {
        /// A second engine over the same stores, as another process would be.
        fn peer(&self) -> LedgerEngine {
            LedgerEngine::new(
                self.wallets.clone(),
                self.transactions.clone(),
                self.journal.clone(),
                rates(),
                test_config(),
            )
        }
    }

    #[tokio::test]
    async fn test_open_wallet_once_per_user() {
        let engine = engine();
        let user = UserId::new();

        let wallet = engine.open_wallet(user).await.unwrap();
        assert!(wallet.balances.is_empty());
        assert_eq!(wallet.version, 0);

        let again = engine.open_wallet(user).await;
        assert!(matches!(again, Err(LedgerError::WalletAlreadyExists)));
    }

    #[tokio::test]
    async fn test_deposit_credits_and_records() {
        let engine = engine();
        let wallet = engine.open_wallet(UserId::new()).await.unwrap();

        let tx = engine
            .deposit(wallet.user_id, &code("USDx"), dec!(100))
            .await
            .unwrap();

        assert_eq!(tx.transaction_type, TransactionType::Deposit);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.from_amount, dec!(100));
        assert!(tx.target.is_none());
        assert_eq!(
            engine.balance(&wallet.user_id, &code("USDx")).await.unwrap(),
            dec!(100)
        );
        assert_eq!(engine.transaction(&tx.id).await.unwrap(), tx);
    }

    #[tokio::test]
    async fn test_deposit_rejects_non_positive_amounts() {
        let engine = engine();
        let wallet = engine.open_wallet(UserId::new()).await.unwrap();

        for amount in [dec!(0), dec!(-5)] {
            let err = engine
                .deposit(wallet.user_id, &code("USDx"), amount)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidAmount);
        }
        assert!(engine.balances(&wallet.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deposit_without_wallet() {
        let engine = engine();
        let err = engine
            .deposit(UserId::new(), &code("USDx"), dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WalletNotFound));
    }

    #[tokio::test]
    async fn test_swap_usdx_into_cngn() {
        let engine = engine();
        let wallet = funded(&engine, "USDx", dec!(100)).await;

        let tx = engine
            .swap(wallet.user_id, &code("USDx"), &code("cNGN"), dec!(50))
            .await
            .unwrap();

        let balances = engine.balances(&wallet.user_id).await.unwrap();
        assert_eq!(balances.get(&code("USDx")), Some(&dec!(50)));
        assert_eq!(balances.get(&code("cNGN")), Some(&dec!(75000)));

        assert_eq!(tx.transaction_type, TransactionType::Swap);
        assert_eq!(tx.from_amount, dec!(50));
        let leg = tx.target.unwrap();
        assert_eq!(leg.to_currency, code("cNGN"));
        assert_eq!(leg.to_amount, dec!(75000));
        assert_eq!(leg.exchange_rate, dec!(1500));
    }

    #[tokio::test]
    async fn test_swap_validation_happens_before_mutation() {
        let engine = engine();
        let wallet = funded(&engine, "USDx", dec!(10)).await;

        let same = engine
            .swap(wallet.user_id, &code("USDx"), &code("USDx"), dec!(1))
            .await
            .unwrap_err();
        assert_eq!(same.kind(), ErrorKind::InvalidCurrency);

        let broke = engine
            .swap(wallet.user_id, &code("USDx"), &code("cNGN"), dec!(11))
            .await
            .unwrap_err();
        assert!(matches!(broke, LedgerError::InsufficientFunds { .. }));

        let unknown = engine
            .swap(wallet.user_id, &code("USDx"), &code("ZZZ"), dec!(1))
            .await
            .unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::ExchangeRateUnavailable);

        assert_eq!(
            engine.wallet(&wallet.user_id).await.unwrap().balances,
            wallet.balances
        );
    }

    #[tokio::test]
    async fn test_self_transfer_rejected() {
        let engine = engine();
        let wallet = funded(&engine, "USDx", dec!(100)).await;

        let err = engine
            .transfer(wallet.user_id, &wallet.address, &code("USDx"), dec!(10), None)
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::SelfTransferNotAllowed));
        assert_eq!(
            engine.balance(&wallet.user_id, &code("USDx")).await.unwrap(),
            dec!(100)
        );
    }

    #[tokio::test]
    async fn test_self_transfer_rejected_by_literal_address() {
        let user = UserId::parse("aaaa1111-0000-4000-8000-000000000000").unwrap();
        let engine = engine();
        let wallet = engine.open_wallet(user).await.unwrap();
        assert_eq!(wallet.address.as_str(), "WLT-AAAA1111");

        let err = engine
            .transfer(user, &WalletAddress::from("WLT-AAAA1111"), &code("USDx"), dec!(1), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SelfTransferNotAllowed);
    }

    #[tokio::test]
    async fn test_transfer_same_currency_conserves_value() {
        let engine = engine();
        let sender = funded(&engine, "USDx", dec!(100)).await;
        let recipient = engine.open_wallet(UserId::new()).await.unwrap();

        let tx = engine
            .transfer(sender.user_id, &recipient.address, &code("USDx"), dec!(40), None)
            .await
            .unwrap();

        assert_eq!(tx.recipient_wallet_id, Some(recipient.id));
        assert!(tx.target.is_none());
        assert_eq!(
            engine.balance(&sender.user_id, &code("USDx")).await.unwrap(),
            dec!(60)
        );
        assert_eq!(
            engine.balance(&recipient.user_id, &code("USDx")).await.unwrap(),
            dec!(40)
        );

        let received = engine
            .transactions_for_wallet(&recipient.id, 0, 0)
            .await
            .unwrap();
        assert_eq!(received, vec![tx]);
    }

    #[tokio::test]
    async fn test_transfer_with_conversion_applies_recorded_rate() {
        let engine = engine();
        let sender = funded(&engine, "USDx", dec!(100)).await;
        let recipient = engine.open_wallet(UserId::new()).await.unwrap();

        let tx = engine
            .transfer(
                sender.user_id,
                &recipient.address,
                &code("USDx"),
                dec!(2),
                Some(&code("cNGN")),
            )
            .await
            .unwrap();

        let leg = tx.target.clone().unwrap();
        assert_eq!(leg.to_amount, tx.from_amount * leg.exchange_rate);
        assert_eq!(
            engine.balance(&recipient.user_id, &code("cNGN")).await.unwrap(),
            dec!(3000)
        );
    }

    #[tokio::test]
    async fn test_transfer_to_unknown_address() {
        let engine = engine();
        let sender = funded(&engine, "USDx", dec!(5)).await;

        let err = engine
            .transfer(
                sender.user_id,
                &WalletAddress::from("WLT-00000000"),
                &code("USDx"),
                dec!(1),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WalletNotFound));
    }

    #[tokio::test]
    async fn test_concurrent_deposits_lose_no_updates() {
        let engine = Arc::new(engine());
        let user = engine.open_wallet(UserId::new()).await.unwrap().user_id;

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .deposit(user, &code("USDx"), dec!(1))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(engine.balance(&user, &code("USDx")).await.unwrap(), dec!(100));
        assert_eq!(engine.metrics().deposit.succeeded, 100);
    }

    #[tokio::test]
    async fn test_opposing_transfers_do_not_deadlock() {
        let engine = Arc::new(engine());
        let a = funded(&engine, "USDx", dec!(1000)).await;
        let b = funded(&engine, "USDx", dec!(1000)).await;

        let mut handles = Vec::new();
        for i in 0..40 {
            let engine = engine.clone();
            let (from, to) = if i % 2 == 0 { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
            handles.push(tokio::spawn(async move {
                engine
                    .transfer(from.user_id, &to.address, &code("USDx"), dec!(1), None)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let total = engine.balance(&a.user_id, &code("USDx")).await.unwrap()
            + engine.balance(&b.user_id, &code("USDx")).await.unwrap();
        assert_eq!(total, dec!(2000));
    }

    #[tokio::test]
    async fn test_failed_recipient_credit_refunds_sender() {
        let h = harness();
        let sender = funded(&h.engine, "USDx", dec!(100)).await;
        let recipient = h.engine.open_wallet(UserId::new()).await.unwrap();

        h.wallets.fail_writes_to(Some(recipient.id));
        let err = h
            .engine
            .transfer(sender.user_id, &recipient.address, &code("USDx"), dec!(30), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistenceFailed);
        assert_eq!(err.to_string(), "Failed to persist ledger state");
        assert_eq!(
            h.engine.balance(&sender.user_id, &code("USDx")).await.unwrap(),
            dec!(100)
        );
        assert!(h
            .engine
            .balances(&recipient.user_id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            h.engine
                .transactions_for_wallet(&sender.id, 20, 0)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(h.journal.in_stage(IntentStage::Compensated).len(), 1);
        assert_eq!(h.engine.metrics().compensations, 1);
    }

    #[tokio::test]
    async fn test_failed_transfer_record_unwinds_both_wallets() {
        let h = harness();
        let sender = funded(&h.engine, "USDx", dec!(100)).await;
        let recipient = h.engine.open_wallet(UserId::new()).await.unwrap();

        h.transactions.failing.store(true, Ordering::SeqCst);
        let err = h
            .engine
            .transfer(
                sender.user_id,
                &recipient.address,
                &code("USDx"),
                dec!(10),
                Some(&code("cNGN")),
            )
            .await
            .unwrap_err();
        h.transactions.failing.store(false, Ordering::SeqCst);

        assert_eq!(err.kind(), ErrorKind::PersistenceFailed);
        assert_eq!(
            h.engine.balance(&sender.user_id, &code("USDx")).await.unwrap(),
            dec!(100)
        );
        assert_eq!(
            h.engine.balance(&recipient.user_id, &code("cNGN")).await.unwrap(),
            dec!(0)
        );
        assert_eq!(h.journal.in_stage(IntentStage::Compensated).len(), 1);
    }

    #[tokio::test]
    async fn test_unrefundable_sender_is_flagged_for_review() {
        let h = harness();
        let sender = funded(&h.engine, "USDx", dec!(100)).await;
        let recipient = h.engine.open_wallet(UserId::new()).await.unwrap();

        let intent = TransferIntent::new(
            TransactionId::new(),
            sender.id,
            recipient.id,
            Money::new(dec!(5), code("USDx")),
            Money::new(dec!(5), code("USDx")),
        );
        h.journal.begin(&intent).await.unwrap();
        h.journal
            .advance(&intent.id, IntentStage::Started, IntentStage::Debited)
            .await
            .unwrap();

        h.wallets.fail_writes_to(Some(sender.id));
        let report = h.engine.recover_incomplete().await.unwrap();

        assert_eq!(report.needs_review, 1);
        assert_eq!(
            h.journal.get(&intent.id).await.unwrap().stage,
            IntentStage::NeedsReview
        );
        assert_eq!(h.engine.metrics().compensations_failed, 1);
        assert!(h.journal.incomplete().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_finishes_or_unwinds_open_intents() {
        let h = harness();
        let sender = funded(&h.engine, "USDx", dec!(100)).await;
        let recipient = funded(&h.engine, "USDx", dec!(50)).await;

        // Crashed after the debit: sender holds 90.
        h.engine
            .mutate_wallet(sender.id, |w| w.debit(&code("USDx"), dec!(10)))
            .await
            .unwrap();
        let debited = TransferIntent::new(
            TransactionId::new(),
            sender.id,
            recipient.id,
            Money::new(dec!(10), code("USDx")),
            Money::new(dec!(10), code("USDx")),
        );
        h.journal.begin(&debited).await.unwrap();
        h.journal
            .advance(&debited.id, IntentStage::Started, IntentStage::Debited)
            .await
            .unwrap();

        // Crashed after both writes but before the record: sender 85, recipient 55.
        h.engine
            .mutate_wallet(sender.id, |w| w.debit(&code("USDx"), dec!(5)))
            .await
            .unwrap();
        h.engine
            .mutate_wallet(recipient.id, |w| w.credit(&code("USDx"), dec!(5)))
            .await
            .unwrap();
        let credited = TransferIntent::new(
            TransactionId::new(),
            sender.id,
            recipient.id,
            Money::new(dec!(5), code("USDx")),
            Money::new(dec!(5), code("USDx")),
        );
        h.journal.begin(&credited).await.unwrap();
        h.journal
            .advance(&credited.id, IntentStage::Started, IntentStage::Credited)
            .await
            .unwrap();

        // Crashed with the record written: only the journal is behind.
        let recorded = Transaction::transfer(
            sender.id,
            sender.user_id,
            recipient.id,
            code("USDx"),
            dec!(1),
            None,
        );
        h.transactions.create(&recorded).await.unwrap();
        let finished = TransferIntent::new(
            recorded.id,
            sender.id,
            recipient.id,
            Money::new(dec!(1), code("USDx")),
            Money::new(dec!(1), code("USDx")),
        );
        h.journal.begin(&finished).await.unwrap();
        h.journal
            .advance(&finished.id, IntentStage::Started, IntentStage::Credited)
            .await
            .unwrap();

        // Debit outcome unknown.
        let started = TransferIntent::new(
            TransactionId::new(),
            sender.id,
            recipient.id,
            Money::new(dec!(2), code("USDx")),
            Money::new(dec!(2), code("USDx")),
        );
        h.journal.begin(&started).await.unwrap();

        let report = h.engine.recover_incomplete().await.unwrap();

        assert_eq!(
            report,
            RecoveryReport {
                completed: 1,
                compensated: 2,
                needs_review: 1,
                deferred: 0,
            }
        );
        assert_eq!(
            h.engine.balance(&sender.user_id, &code("USDx")).await.unwrap(),
            dec!(100)
        );
        assert_eq!(
            h.engine.balance(&recipient.user_id, &code("USDx")).await.unwrap(),
            dec!(50)
        );
        assert_eq!(
            h.journal.get(&finished.id).await.unwrap().stage,
            IntentStage::Completed
        );
        assert_eq!(
            h.journal.get(&started.id).await.unwrap().stage,
            IntentStage::NeedsReview
        );
        assert!(h.journal.incomplete().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_leaves_in_flight_transfer_alone() {
        let h = harness();
        let sender = funded(&h.engine, "USDx", dec!(100)).await;
        let recipient = h.engine.open_wallet(UserId::new()).await.unwrap();
        h.wallets.slow_writes_to(recipient.id, Duration::from_millis(200));

        let engine = h.engine.clone();
        let user = sender.user_id;
        let address = recipient.address.clone();
        let transfer = tokio::spawn(async move {
            engine
                .transfer(user, &address, &code("USDx"), dec!(40), None)
                .await
        });

        // The transfer is debited and waiting on the recipient write.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = h.engine.recover_incomplete().await.unwrap();
        transfer.await.unwrap().unwrap();

        assert_eq!(report, RecoveryReport::default());
        assert_eq!(
            h.engine.balance(&sender.user_id, &code("USDx")).await.unwrap(),
            dec!(60)
        );
        assert_eq!(
            h.engine.balance(&recipient.user_id, &code("USDx")).await.unwrap(),
            dec!(40)
        );
        assert_eq!(h.journal.in_stage(IntentStage::Completed).len(), 1);
        assert_eq!(h.engine.metrics().compensations, 0);
    }

    #[tokio::test]
    async fn test_concurrent_recovery_passes_refund_once() {
        let h = harness();
        let peer = h.peer();
        let sender = funded(&h.engine, "USDx", dec!(100)).await;
        let recipient = h.engine.open_wallet(UserId::new()).await.unwrap();

        h.engine
            .mutate_wallet(sender.id, |w| w.debit(&code("USDx"), dec!(10)))
            .await
            .unwrap();
        let intent = TransferIntent::new(
            TransactionId::new(),
            sender.id,
            recipient.id,
            Money::new(dec!(10), code("USDx")),
            Money::new(dec!(10), code("USDx")),
        );
        h.journal.begin(&intent).await.unwrap();
        h.journal
            .advance(&intent.id, IntentStage::Started, IntentStage::Debited)
            .await
            .unwrap();

        // Separate engines share no lock table; only the journal arbitrates.
        let (a, b) = tokio::join!(h.engine.recover_incomplete(), peer.recover_incomplete());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.compensated + b.compensated, 1);
        assert_eq!(
            h.engine.balance(&sender.user_id, &code("USDx")).await.unwrap(),
            dec!(100)
        );
        assert_eq!(
            h.journal.get(&intent.id).await.unwrap().stage,
            IntentStage::Compensated
        );
    }

    #[tokio::test]
    async fn test_failed_swap_record_reverts_both_legs() {
        let h = harness();
        let wallet = funded(&h.engine, "USDx", dec!(100)).await;

        h.transactions.failing.store(true, Ordering::SeqCst);
        let err = h
            .engine
            .swap(wallet.user_id, &code("USDx"), &code("cNGN"), dec!(50))
            .await
            .unwrap_err();
        h.transactions.failing.store(false, Ordering::SeqCst);

        assert_eq!(err.kind(), ErrorKind::PersistenceFailed);
        assert_eq!(
            h.engine.balance(&wallet.user_id, &code("USDx")).await.unwrap(),
            dec!(100)
        );
        assert_eq!(
            h.engine.balance(&wallet.user_id, &code("cNGN")).await.unwrap(),
            dec!(0)
        );
        assert_eq!(h.engine.metrics().compensations, 1);
        assert!(h
            .engine
            .transactions_for_user(&wallet.user_id, 0, 0)
            .await
            .unwrap()
            .iter()
            .all(|tx| tx.transaction_type == TransactionType::Deposit));
    }

    #[tokio::test]
    async fn test_version_conflicts_retried_up_to_limit() {
        let h = harness();
        let wallet = funded(&h.engine, "USDx", dec!(10)).await;
        let retries = h.engine.config().max_update_retries;

        h.wallets.conflict_next(retries);
        h.engine
            .deposit(wallet.user_id, &code("USDx"), dec!(5))
            .await
            .unwrap();

        assert_eq!(h.engine.metrics().optimistic_retries, u64::from(retries));
        assert_eq!(
            h.engine.balance(&wallet.user_id, &code("USDx")).await.unwrap(),
            dec!(15)
        );
    }

    #[tokio::test]
    async fn test_version_conflicts_past_limit_surface() {
        let h = harness();
        let wallet = funded(&h.engine, "USDx", dec!(10)).await;
        let retries = h.engine.config().max_update_retries;

        h.wallets.conflict_next(retries + 1);
        let err = h
            .engine
            .deposit(wallet.user_id, &code("USDx"), dec!(5))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConcurrentModification);
        assert!(err.is_retryable());
        assert_eq!(h.engine.metrics().optimistic_retries, u64::from(retries));
        assert_eq!(
            h.engine.balances(&wallet.user_id).await.unwrap(),
            wallet.balances
        );
    }

    #[tokio::test]
    async fn test_out_of_range_amounts_rejected() {
        let engine = engine();
        let wallet = funded(&engine, "USDx", dec!(100)).await;

        let deposit = engine
            .deposit(wallet.user_id, &code("USDx"), Decimal::MAX)
            .await
            .unwrap_err();
        assert_eq!(deposit.kind(), ErrorKind::InvalidAmount);

        let swap = engine
            .swap(wallet.user_id, &code("USDx"), &code("cNGN"), Decimal::MAX)
            .await
            .unwrap_err();
        assert_eq!(swap.kind(), ErrorKind::InvalidAmount);

        // In range on the way in, out of range once converted.
        engine
            .deposit(wallet.user_id, &code("USDx"), max_amount())
            .await
            .unwrap();
        let converted = engine
            .swap(wallet.user_id, &code("USDx"), &code("cNGN"), max_amount())
            .await
            .unwrap_err();
        assert_eq!(converted.kind(), ErrorKind::InvalidAmount);

        let balances = engine.balances(&wallet.user_id).await.unwrap();
        assert_eq!(balances.get(&code("USDx")), Some(&(max_amount() + dec!(100))));
        assert_eq!(balances.get(&code("cNGN")), None);
    }

    #[tokio::test]
    async fn test_balance_overflow_rejected() {
        let engine = engine();
        let wallet = funded(&engine, "USDx", dec!(100)).await;
        engine
            .mutate_wallet(wallet.id, |w| w.credit(&code("USDx"), Decimal::MAX - dec!(100)))
            .await
            .unwrap();

        let err = engine
            .deposit(wallet.user_id, &code("USDx"), dec!(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
        assert_eq!(
            engine.balance(&wallet.user_id, &code("USDx")).await.unwrap(),
            Decimal::MAX
        );
    }

    #[tokio::test]
    async fn test_failed_deposit_record_reverts_credit() {
        let h = harness();
        let wallet = h.engine.open_wallet(UserId::new()).await.unwrap();

        h.transactions.failing.store(true, Ordering::SeqCst);
        let err = h
            .engine
            .deposit(wallet.user_id, &code("USDx"), dec!(25))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistenceFailed);
        assert_eq!(
            h.engine.balance(&wallet.user_id, &code("USDx")).await.unwrap(),
            dec!(0)
        );
    }

    #[tokio::test]
    async fn test_audit_event_per_mutating_call() {
        let (sink, mut rx) = ChannelAuditSink::new(16);
        let engine = engine().with_audit(Arc::new(sink));

        let wallet = engine.open_wallet(UserId::new()).await.unwrap();
        engine
            .deposit(wallet.user_id, &code("USDx"), dec!(1))
            .await
            .unwrap();
        let _ = engine
            .transfer(wallet.user_id, &wallet.address, &code("USDx"), dec!(1), None)
            .await;

        let opened = rx.recv().await.unwrap();
        assert_eq!(opened.operation, AuditOperation::OpenWallet);
        assert_eq!(opened.wallet_id, Some(wallet.id));

        let deposited = rx.recv().await.unwrap();
        assert!(deposited.is_success());
        assert!(deposited.transaction_id.is_some());

        let rejected = rx.recv().await.unwrap();
        assert_eq!(rejected.outcome, "SELF_TRANSFER_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn test_transaction_queries_page_newest_first() {
        let engine = engine();
        let wallet = engine.open_wallet(UserId::new()).await.unwrap();
        for _ in 0..3 {
            engine
                .deposit(wallet.user_id, &code("USDx"), dec!(1))
                .await
                .unwrap();
        }

        let all = engine
            .transactions_for_user(&wallet.user_id, 0, 0)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let page = engine
            .transactions_for_user(&wallet.user_id, 2, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);

        let missing = engine.transaction(&TransactionId::new()).await.unwrap_err();
        assert!(matches!(missing, LedgerError::TransactionNotFound));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Deposit(u32),
        Swap(u32),
        Transfer(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..500).prop_map(Op::Deposit),
            (1u32..500).prop_map(Op::Swap),
            (1u32..500).prop_map(Op::Transfer),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_balances_never_negative(ops in proptest::collection::vec(op(), 1..40)) {
            tokio_test::block_on(async {
                let engine = engine();
                let wallet = engine.open_wallet(UserId::new()).await.unwrap();
                let other = engine.open_wallet(UserId::new()).await.unwrap();
                let usdx = code("USDx");
                let cngn = code("cNGN");

                for op in ops {
                    let _ = match op {
                        Op::Deposit(n) => engine
                            .deposit(wallet.user_id, &usdx, Decimal::from(n))
                            .await,
                        Op::Swap(n) => engine
                            .swap(wallet.user_id, &usdx, &cngn, Decimal::from(n))
                            .await,
                        Op::Transfer(n) => engine
                            .transfer(wallet.user_id, &other.address, &usdx, Decimal::from(n), None)
                            .await,
                    };

                    let current = engine.wallet(&wallet.user_id).await.unwrap();
                    assert!(current.is_solvent());
                }
            });
        }
    }
}
