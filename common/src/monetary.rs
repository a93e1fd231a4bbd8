//! Monetary types for the wallet ledger.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Default number of fractional digits kept for stored amounts.
pub const DEFAULT_AMOUNT_SCALE: u32 = 8;

/// Maximum length of a currency code.
const MAX_CODE_LEN: usize = 10;

/// Integer digits a stored amount may carry (`NUMERIC(38, 18)` columns).
const MAX_AMOUNT_DIGITS: u32 = 20;

/// A validated currency code.
///
/// Codes are case sensitive: wallet-native stablecoin symbols such as
/// `cNGN` and `USDx` are kept exactly as written. A code is 2 to 10 ASCII
/// alphanumeric characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Validate and wrap a currency code.
    pub fn new(code: impl Into<String>) -> Result<Self, ValidationError> {
        let code = code.into();
        let valid = (2..=MAX_CODE_LEN).contains(&code.len())
            && code.chars().all(|c| c.is_ascii_alphanumeric());

        if !valid {
            return Err(ValidationError::InvalidCurrency(code));
        }
        Ok(Self(code))
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Common codes
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn ngn() -> Self {
        Self("NGN".to_string())
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CurrencyCode {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

/// A monetary amount with currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount value.
    pub value: Decimal,
    /// Currency code the amount is denominated in.
    pub currency: CurrencyCode,
}

impl Money {
    /// Create a new Money instance.
    pub fn new(value: Decimal, currency: CurrencyCode) -> Self {
        Self { value, currency }
    }

    /// Create a zero amount in the given currency.
    pub fn zero(currency: CurrencyCode) -> Self {
        Self {
            value: Decimal::ZERO,
            currency,
        }
    }

    /// Check if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

/// Largest amount a single operation may move.
pub fn max_amount() -> Decimal {
    Decimal::from_i128_with_scale(10i128.pow(MAX_AMOUNT_DIGITS) - 1, 0)
}

/// Reject zero, negative and out-of-range amounts.
pub fn ensure_positive(amount: Decimal) -> Result<Decimal, ValidationError> {
    if amount <= Decimal::ZERO || amount > max_amount() {
        return Err(ValidationError::InvalidAmount(amount.to_string()));
    }
    Ok(amount)
}

/// Parse a positive amount from its decimal string form.
pub fn parse_amount(value: &str) -> Result<Decimal, ValidationError> {
    let amount = Decimal::from_str(value.trim())
        .map_err(|_| ValidationError::InvalidAmount(value.to_string()))?;
    ensure_positive(amount)
}

/// Round an amount to `scale` fractional digits, toward zero.
///
/// Converted amounts are truncated so a conversion can never produce more
/// value than the rate allows.
pub fn round_amount(amount: Decimal, scale: u32) -> Decimal {
    amount
        .round_dp_with_strategy(scale, RoundingStrategy::ToZero)
        .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_code_is_case_sensitive() {
        let a = CurrencyCode::new("cNGN").unwrap();
        let b = CurrencyCode::new("CNGN").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "cNGN");
    }

    #[test]
    fn test_currency_code_validation() {
        assert!(CurrencyCode::new("USDx").is_ok());
        assert!(CurrencyCode::new("").is_err());
        assert!(CurrencyCode::new("U").is_err());
        assert!(CurrencyCode::new("US D").is_err());
        assert!(CurrencyCode::new("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn test_currency_code_serde() {
        let code: CurrencyCode = serde_json::from_str("\"cKES\"").unwrap();
        assert_eq!(code.as_str(), "cKES");
        assert!(serde_json::from_str::<CurrencyCode>("\"c-KES\"").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("12.50").unwrap(), dec!(12.50));
        assert!(matches!(
            parse_amount("0"),
            Err(ValidationError::InvalidAmount(_))
        ));
        assert!(parse_amount("-3").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn test_amounts_beyond_storage_range_rejected() {
        assert_eq!(ensure_positive(max_amount()).unwrap(), max_amount());
        assert!(ensure_positive(max_amount() + dec!(1)).is_err());
        assert!(ensure_positive(Decimal::MAX).is_err());
    }

    #[test]
    fn test_round_amount_truncates() {
        assert_eq!(round_amount(dec!(1.123456789), 8), dec!(1.12345678));
        assert_eq!(round_amount(dec!(75000.000), 8), dec!(75000));
    }
}
