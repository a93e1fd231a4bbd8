//! FX error types.

use interstellar_common::{CurrencyCode, ErrorKind};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur while fetching or using exchange rates.
///
/// `Clone` because one upstream result is shared by every waiter of a
/// single-flight refresh.
#[derive(Debug, Clone, Error)]
pub enum FxError {
    /// Quote currency absent from the snapshot for the base.
    #[error("Rate not found for {base}/{quote}")]
    RateNotFound {
        base: CurrencyCode,
        quote: CurrencyCode,
    },

    /// Rate is zero or negative.
    #[error("Invalid exchange rate {rate} for {base}/{quote}")]
    InvalidRate {
        base: CurrencyCode,
        quote: CurrencyCode,
        rate: Decimal,
    },

    /// Provider answered with a non-success status.
    #[error("Rate provider returned status {status}")]
    UpstreamStatus { status: u16 },

    /// Provider answered with no usable rates.
    #[error("Rate provider returned empty results for {0}")]
    EmptyRates(CurrencyCode),

    /// Transport or decode failure talking to the provider.
    #[error("Rate provider error: {0}")]
    Upstream(String),

    /// Provider did not answer within the fetch timeout.
    #[error("Rate provider timed out after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    /// Converted amount does not fit in a decimal.
    #[error("Converting {amount} {from} into {to} overflows")]
    ConversionOverflow {
        from: CurrencyCode,
        to: CurrencyCode,
        amount: Decimal,
    },

    /// Provider misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FxError {
    /// Get the stable error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FxError::RateNotFound { .. } => ErrorKind::RateNotFound,
            FxError::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            FxError::ConversionOverflow { .. } => ErrorKind::InvalidAmount,
            FxError::Configuration(_) => ErrorKind::Internal,
            FxError::InvalidRate { .. }
            | FxError::UpstreamStatus { .. }
            | FxError::EmptyRates(_)
            | FxError::Upstream(_) => ErrorKind::ExchangeRateUnavailable,
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
