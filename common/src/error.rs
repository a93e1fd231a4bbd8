//! Error kinds shared across the wallet ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable, externally visible classification of ledger and FX failures.
///
/// Internal errors carry detail for logs; callers only ever see the kind and
/// its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    WalletNotFound,
    WalletAlreadyExists,
    TransactionNotFound,
    InsufficientFunds,
    InvalidCurrency,
    InvalidAmount,
    SelfTransferNotAllowed,
    ExchangeRateUnavailable,
    RateNotFound,
    ConcurrentModification,
    PersistenceFailed,
    UpstreamTimeout,
    Internal,
}

impl ErrorKind {
    /// Error code for responses.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::WalletNotFound => "WALLET_NOT_FOUND",
            ErrorKind::WalletAlreadyExists => "WALLET_ALREADY_EXISTS",
            ErrorKind::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::InvalidCurrency => "INVALID_CURRENCY",
            ErrorKind::InvalidAmount => "INVALID_AMOUNT",
            ErrorKind::SelfTransferNotAllowed => "SELF_TRANSFER_NOT_ALLOWED",
            ErrorKind::ExchangeRateUnavailable => "EXCHANGE_RATE_UNAVAILABLE",
            ErrorKind::RateNotFound => "RATE_NOT_FOUND",
            ErrorKind::ConcurrentModification => "CONCURRENT_MODIFICATION",
            ErrorKind::PersistenceFailed => "PERSISTENCE_FAILED",
            ErrorKind::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Check if an operation failing with this kind may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConcurrentModification | ErrorKind::UpstreamTimeout
        )
    }

    /// Check if this kind is a request validation failure (no state was touched).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidCurrency | ErrorKind::InvalidAmount | ErrorKind::SelfTransferNotAllowed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Rejections raised while validating request input at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Malformed currency code.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Zero, negative or unparseable amount.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

impl ValidationError {
    /// Get the stable error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::InvalidCurrency(_) => ErrorKind::InvalidCurrency,
            ValidationError::InvalidAmount(_) => ErrorKind::InvalidAmount,
        }
    }
}

/// Error body handed to callers: a stable code and a generic message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Create a new error body.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code().to_string(),
            message: message.into(),
        }
    }
}
