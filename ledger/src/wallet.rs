//! Wallet definitions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use interstellar_common::{CurrencyCode, UserId, ValidationError, WalletAddress, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Currency code to amount. Every entry is non-negative.
pub type Balances = BTreeMap<CurrencyCode, Decimal>;

/// A user's multi-currency wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet identifier.
    pub id: WalletId,
    /// Owning user; one wallet per user.
    pub user_id: UserId,
    /// Public address used by senders.
    pub address: WalletAddress,
    /// Balances keyed by wallet-native currency code.
    pub balances: Balances,
    /// Incremented by the store on every balance write.
    pub version: u64,
    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
    /// When balances were last written.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet for a user.
    pub fn open(user_id: UserId) -> Self {
        let now = Utc::now();

        Self {
            id: WalletId::new(),
            address: WalletAddress::for_user(&user_id),
            user_id,
            balances: Balances::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance for a currency; zero when the wallet never held it.
    pub fn balance(&self, currency: &CurrencyCode) -> Decimal {
        self.balances.get(currency).copied().unwrap_or(Decimal::ZERO)
    }

    /// Check if the wallet holds at least `amount` of `currency`.
    pub fn has_sufficient_funds(&self, currency: &CurrencyCode, amount: Decimal) -> bool {
        self.balance(currency) >= amount
    }

    /// Fail with `InsufficientFunds` unless the wallet holds `amount`.
    pub fn ensure_funds(&self, currency: &CurrencyCode, amount: Decimal) -> LedgerResult<()> {
        let available = self.balance(currency);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                currency: currency.clone(),
                required: amount,
                available,
            });
        }
        Ok(())
    }

    /// Increase a balance, refusing a total the decimal cannot hold.
    pub fn credit(&mut self, currency: &CurrencyCode, amount: Decimal) -> LedgerResult<()> {
        let total = self.balance(currency).checked_add(amount).ok_or_else(|| {
            ValidationError::InvalidAmount(format!("{currency} balance would overflow"))
        })?;
        self.balances.insert(currency.clone(), total);
        Ok(())
    }

    /// Decrease a balance, refusing to go below zero.
    pub fn debit(&mut self, currency: &CurrencyCode, amount: Decimal) -> LedgerResult<()> {
        self.ensure_funds(currency, amount)?;
        self.balances
            .insert(currency.clone(), self.balance(currency) - amount);
        Ok(())
    }

    /// Check the non-negative balance invariant.
    pub fn is_solvent(&self) -> bool {
        self.balances.values().all(|v| *v >= Decimal::ZERO)
    }
}
