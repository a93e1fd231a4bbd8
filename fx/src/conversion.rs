//! Currency conversion records.

use chrono::{DateTime, Utc};
use interstellar_common::{round_amount, CurrencyCode, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{FxError, FxResult};

/// A priced conversion between two wallet currencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Source wallet currency.
    pub from: CurrencyCode,
    /// Target wallet currency.
    pub to: CurrencyCode,
    /// Amount of `from` being converted.
    pub amount: Decimal,
    /// Amount of `to` produced.
    pub result: Decimal,
    /// Rate applied (units of `to` per unit of `from`).
    pub rate: Decimal,
    /// When the rates behind this conversion were fetched.
    pub rates_updated_at: DateTime<Utc>,
}

impl Conversion {
    /// Price `amount` at `rate`, rounding the result toward zero to `scale` places.
    pub fn new(
        from: CurrencyCode,
        to: CurrencyCode,
        amount: Decimal,
        rate: Decimal,
        scale: u32,
        rates_updated_at: DateTime<Utc>,
    ) -> FxResult<Self> {
        let product = amount
            .checked_mul(rate)
            .ok_or_else(|| FxError::ConversionOverflow {
                from: from.clone(),
                to: to.clone(),
                amount,
            })?;

        Ok(Self {
            from,
            to,
            amount,
            result: round_amount(product, scale),
            rate,
            rates_updated_at,
        })
    }

    /// Get the effective rate after rounding.
    pub fn effective_rate(&self) -> Decimal {
        if self.amount.is_zero() {
            return Decimal::ZERO;
        }
        self.result / self.amount
    }

    /// Input side as money.
    pub fn input(&self) -> Money {
        Money::new(self.amount, self.from.clone())
    }

    /// Output side as money.
    pub fn output(&self) -> Money {
        Money::new(self.result, self.to.clone())
    }
}
