//! Ledger error types.

use interstellar_common::{CurrencyCode, ErrorBody, ErrorKind, ValidationError, WalletId};
use interstellar_fx::FxError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors returned by store implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record matched.
    #[error("Record not found")]
    NotFound,

    /// The wallet changed between read and write.
    #[error("Wallet {0} was modified concurrently")]
    ConcurrentModification(WalletId),

    /// A uniqueness constraint was violated.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Update not allowed in the record's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend failure (connection, query, encoding).
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Duplicate(db.message().to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by ledger operations.
///
/// `Display` output is safe to hand to callers: storage and upstream detail
/// is kept in the error source for logging only.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Wallet not found")]
    WalletNotFound,

    #[error("User already has a wallet")]
    WalletAlreadyExists,

    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("Insufficient {currency} balance: required {required}, available {available}")]
    InsufficientFunds {
        currency: CurrencyCode,
        required: Decimal,
        available: Decimal,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Cannot swap {0} into itself")]
    SameCurrency(CurrencyCode),

    #[error("Transfers to your own wallet are not allowed")]
    SelfTransferNotAllowed,

    #[error("Exchange rate unavailable")]
    ExchangeRateUnavailable(#[source] FxError),

    #[error("Exchange rate provider timed out")]
    UpstreamTimeout(#[source] FxError),

    #[error("Wallet was modified concurrently, retry the operation")]
    ConcurrentModification,

    #[error("Failed to persist ledger state")]
    PersistenceFailed(#[source] StoreError),
}

impl LedgerError {
    /// Get the stable error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::WalletNotFound => ErrorKind::WalletNotFound,
            LedgerError::WalletAlreadyExists => ErrorKind::WalletAlreadyExists,
            LedgerError::TransactionNotFound => ErrorKind::TransactionNotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::Validation(e) => e.kind(),
            LedgerError::SameCurrency(_) => ErrorKind::InvalidCurrency,
            LedgerError::SelfTransferNotAllowed => ErrorKind::SelfTransferNotAllowed,
            LedgerError::ExchangeRateUnavailable(_) => ErrorKind::ExchangeRateUnavailable,
            LedgerError::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            LedgerError::ConcurrentModification => ErrorKind::ConcurrentModification,
            LedgerError::PersistenceFailed(_) => ErrorKind::PersistenceFailed,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Caller-facing body with the stable code and the display message.
    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.kind(), self.to_string())
    }
}

impl From<FxError> for LedgerError {
    fn from(e: FxError) -> Self {
        match e {
            FxError::UpstreamTimeout(_) => LedgerError::UpstreamTimeout(e),
            FxError::ConversionOverflow { .. } => {
                LedgerError::Validation(ValidationError::InvalidAmount(e.to_string()))
            }
            other => LedgerError::ExchangeRateUnavailable(other),
        }
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_error_hides_backend_detail() {
        let err = LedgerError::PersistenceFailed(StoreError::Backend(
            "connection refused to 10.0.0.5:5432".into(),
        ));
        assert_eq!(err.kind(), ErrorKind::PersistenceFailed);

        let body = err.body();
        assert_eq!(body.code, "PERSISTENCE_FAILED");
        assert_eq!(body.message, "Failed to persist ledger state");
    }

    #[test]
    fn test_fx_errors_map_to_ledger_kinds() {
        let timeout: LedgerError =
            FxError::UpstreamTimeout(std::time::Duration::from_secs(10)).into();
        assert_eq!(timeout.kind(), ErrorKind::UpstreamTimeout);
        assert!(timeout.is_retryable());

        let unavailable: LedgerError = FxError::UpstreamStatus { status: 502 }.into();
        assert_eq!(unavailable.kind(), ErrorKind::ExchangeRateUnavailable);

        let overflow: LedgerError = FxError::ConversionOverflow {
            from: CurrencyCode::new("USDx").unwrap(),
            to: CurrencyCode::new("cNGN").unwrap(),
            amount: Decimal::MAX,
        }
        .into();
        assert_eq!(overflow.kind(), ErrorKind::InvalidAmount);
    }

    #[test]
    fn test_validation_errors_keep_their_kind() {
        let err: LedgerError = ValidationError::InvalidAmount("-1".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
    }
}
