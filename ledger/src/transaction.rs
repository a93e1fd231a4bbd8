//! Transaction records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use interstellar_common::{CurrencyCode, TransactionId, UserId, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of ledger operation a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Swap,
    Transfer,
    /// Reserved; no operation produces withdrawals yet.
    Withdraw,
}

impl TransactionType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Swap => "SWAP",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::Withdraw => "WITHDRAW",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "SWAP" => Ok(TransactionType::Swap),
            "TRANSFER" => Ok(TransactionType::Transfer),
            "WITHDRAW" => Ok(TransactionType::Withdraw),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// Transaction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Check if moving to `next` is allowed. Only pending records move.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Completed)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Converted side of a swap or cross-currency transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLeg {
    /// Currency credited.
    pub to_currency: CurrencyCode,
    /// Amount credited.
    pub to_amount: Decimal,
    /// Rate applied, units of `to_currency` per unit of the source currency.
    pub exchange_rate: Decimal,
}

/// Immutable record of one completed ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    /// Wallet that initiated the operation.
    pub wallet_id: WalletId,
    pub user_id: UserId,
    /// Receiving wallet, transfers only.
    pub recipient_wallet_id: Option<WalletId>,
    pub from_currency: CurrencyCode,
    pub from_amount: Decimal,
    /// Present for swaps and cross-currency transfers.
    #[serde(flatten)]
    pub target: Option<TargetLeg>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    fn completed(
        transaction_type: TransactionType,
        wallet_id: WalletId,
        user_id: UserId,
        from_currency: CurrencyCode,
        from_amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            transaction_type,
            status: TransactionStatus::Completed,
            wallet_id,
            user_id,
            recipient_wallet_id: None,
            from_currency,
            from_amount,
            target: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a deposit into `wallet_id`.
    pub fn deposit(
        wallet_id: WalletId,
        user_id: UserId,
        currency: CurrencyCode,
        amount: Decimal,
    ) -> Self {
        Self::completed(TransactionType::Deposit, wallet_id, user_id, currency, amount)
    }

    /// Record a swap inside one wallet.
    pub fn swap(
        wallet_id: WalletId,
        user_id: UserId,
        from_currency: CurrencyCode,
        from_amount: Decimal,
        target: TargetLeg,
    ) -> Self {
        let mut tx = Self::completed(
            TransactionType::Swap,
            wallet_id,
            user_id,
            from_currency,
            from_amount,
        );
        tx.target = Some(target);
        tx
    }

    /// Record a transfer between two wallets.
    pub fn transfer(
        wallet_id: WalletId,
        user_id: UserId,
        recipient_wallet_id: WalletId,
        from_currency: CurrencyCode,
        from_amount: Decimal,
        target: Option<TargetLeg>,
    ) -> Self {
        let mut tx = Self::completed(
            TransactionType::Transfer,
            wallet_id,
            user_id,
            from_currency,
            from_amount,
        );
        tx.recipient_wallet_id = Some(recipient_wallet_id);
        tx.target = target;
        tx
    }

    /// Check whether a wallet took part, as initiator or recipient.
    pub fn involves(&self, wallet_id: &WalletId) -> bool {
        self.wallet_id == *wallet_id || self.recipient_wallet_id.as_ref() == Some(wallet_id)
    }

    /// Currency and amount credited by this transaction.
    pub fn credited(&self) -> (&CurrencyCode, Decimal) {
        match &self.target {
            Some(leg) => (&leg.to_currency, leg.to_amount),
            None => (&self.from_currency, self.from_amount),
        }
    }
}
