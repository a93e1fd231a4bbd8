//! Persistence traits for wallets and transactions.

use async_trait::async_trait;
use interstellar_common::{TransactionId, UserId, WalletAddress, WalletId};

use crate::error::StoreResult;
use crate::transaction::{Transaction, TransactionStatus};
use crate::wallet::Wallet;

/// Wallet persistence.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Insert a new wallet. Fails with `Duplicate` if the user already has one.
    async fn create(&self, wallet: &Wallet) -> StoreResult<()>;

    async fn get_by_id(&self, id: &WalletId) -> StoreResult<Wallet>;

    async fn get_by_user(&self, user_id: &UserId) -> StoreResult<Wallet>;

    async fn get_by_address(&self, address: &WalletAddress) -> StoreResult<Wallet>;

    /// Replace the wallet's balances if its stored version still equals
    /// `wallet.version`, and return the stored wallet with the version bumped.
    ///
    /// Fails with `ConcurrentModification` when the version moved on and
    /// `NotFound` when the wallet does not exist.
    async fn apply_balance_update(&self, wallet: &Wallet) -> StoreResult<Wallet>;
}

/// Transaction persistence.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, transaction: &Transaction) -> StoreResult<()>;

    async fn get_by_id(&self, id: &TransactionId) -> StoreResult<Transaction>;

    /// Transactions initiated by a user, newest first.
    async fn get_by_user_id(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Transaction>>;

    /// Transactions where the wallet is initiator or recipient, newest first.
    async fn get_by_wallet_id(
        &self,
        wallet_id: &WalletId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Transaction>>;

    /// Move a pending transaction to a terminal status.
    ///
    /// Fails with `Conflict` if the record is already terminal.
    async fn update_status(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
    ) -> StoreResult<()>;
}
