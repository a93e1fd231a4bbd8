//! In-memory store implementations.
//!
//! Used by tests, the simulator, and deployments without `DATABASE_URL`.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use interstellar_common::{IntentId, TransactionId, UserId, WalletAddress, WalletId};

use crate::error::{StoreError, StoreResult};
use crate::journal::{IntentStage, TransferIntent, TransferJournal};
use crate::store::{TransactionStore, WalletStore};
use crate::transaction::{Transaction, TransactionStatus};
use crate::wallet::Wallet;

/// Wallets held in concurrent maps.
#[derive(Default)]
pub struct InMemoryWalletStore {
    wallets: DashMap<WalletId, Wallet>,
    by_user: DashMap<UserId, WalletId>,
    by_address: DashMap<WalletAddress, WalletId>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of wallets stored.
    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn create(&self, wallet: &Wallet) -> StoreResult<()> {
        match self.by_user.entry(wallet.user_id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!(
                "wallet for user {}",
                wallet.user_id
            ))),
            Entry::Vacant(slot) => {
                if self.by_address.contains_key(&wallet.address) {
                    return Err(StoreError::Duplicate(format!(
                        "wallet address {}",
                        wallet.address
                    )));
                }
                self.by_address.insert(wallet.address.clone(), wallet.id);
                self.wallets.insert(wallet.id, wallet.clone());
                slot.insert(wallet.id);
                Ok(())
            }
        }
    }

    async fn get_by_id(&self, id: &WalletId) -> StoreResult<Wallet> {
        self.wallets
            .get(id)
            .map(|w| w.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_user(&self, user_id: &UserId) -> StoreResult<Wallet> {
        let id = self
            .by_user
            .get(user_id)
            .map(|id| *id)
            .ok_or(StoreError::NotFound)?;
        self.get_by_id(&id).await
    }

    async fn get_by_address(&self, address: &WalletAddress) -> StoreResult<Wallet> {
        let id = self
            .by_address
            .get(address)
            .map(|id| *id)
            .ok_or(StoreError::NotFound)?;
        self.get_by_id(&id).await
    }

    async fn apply_balance_update(&self, wallet: &Wallet) -> StoreResult<Wallet> {
        let mut stored = self.wallets.get_mut(&wallet.id).ok_or(StoreError::NotFound)?;

        if stored.version != wallet.version {
            return Err(StoreError::ConcurrentModification(wallet.id));
        }

        stored.balances = wallet.balances.clone();
        stored.version += 1;
        stored.updated_at = Utc::now();

        Ok(stored.clone())
    }
}

/// Transactions held in a concurrent map.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    transactions: DashMap<TransactionId, Transaction>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn page<F>(&self, filter: F, limit: usize, offset: usize) -> Vec<Transaction>
    where
        F: Fn(&Transaction) -> bool,
    {
        let mut matching: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| filter(t.value()))
            .map(|t| t.value().clone())
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matching.into_iter().skip(offset).take(limit).collect()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, transaction: &Transaction) -> StoreResult<()> {
        match self.transactions.entry(transaction.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!(
                "transaction {}",
                transaction.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(transaction.clone());
                Ok(())
            }
        }
    }

    async fn get_by_id(&self, id: &TransactionId) -> StoreResult<Transaction> {
        self.transactions
            .get(id)
            .map(|t| t.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_user_id(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Transaction>> {
        Ok(self.page(|t| t.user_id == *user_id, limit, offset))
    }

    async fn get_by_wallet_id(
        &self,
        wallet_id: &WalletId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Transaction>> {
        Ok(self.page(|t| t.involves(wallet_id), limit, offset))
    }

    async fn update_status(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
    ) -> StoreResult<()> {
        let mut stored = self.transactions.get_mut(id).ok_or(StoreError::NotFound)?;

        if !stored.status.can_transition_to(status) {
            return Err(StoreError::Conflict(format!(
                "transaction {} is {}, cannot become {}",
                id, stored.status, status
            )));
        }

        stored.status = status;
        stored.updated_at = Utc::now();
        Ok(())
    }
}

/// Transfer intents held in a concurrent map.
#[derive(Default)]
pub struct InMemoryTransferJournal {
    intents: DashMap<IntentId, TransferIntent>,
}

impl InMemoryTransferJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// All intents currently in `stage`.
    pub fn in_stage(&self, stage: IntentStage) -> Vec<TransferIntent> {
        self.intents
            .iter()
            .filter(|i| i.stage == stage)
            .map(|i| i.value().clone())
            .collect()
    }
}

#[async_trait]
impl TransferJournal for InMemoryTransferJournal {
    async fn begin(&self, intent: &TransferIntent) -> StoreResult<()> {
        match self.intents.entry(intent.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("intent {}", intent.id))),
            Entry::Vacant(slot) => {
                slot.insert(intent.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &IntentId) -> StoreResult<TransferIntent> {
        self.intents
            .get(id)
            .map(|i| i.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn advance(&self, id: &IntentId, from: IntentStage, to: IntentStage) -> StoreResult<()> {
        let mut intent = self.intents.get_mut(id).ok_or(StoreError::NotFound)?;
        if intent.stage != from {
            return Err(StoreError::Conflict(format!(
                "intent {id} is {}, expected {from}",
                intent.stage
            )));
        }
        intent.stage = to;
        intent.updated_at = Utc::now();
        Ok(())
    }

    async fn incomplete(&self) -> StoreResult<Vec<TransferIntent>> {
        let mut pending: Vec<TransferIntent> = self
            .intents
            .iter()
            .filter(|i| !i.stage.is_terminal())
            .map(|i| i.value().clone())
            .collect();
        pending.sort_by_key(|i| i.created_at);
        Ok(pending)
    }
}
