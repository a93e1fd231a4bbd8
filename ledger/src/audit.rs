//! Audit notifications for mutating ledger calls.

use chrono::{DateTime, Utc};
use interstellar_common::{ErrorKind, TransactionId, UserId, WalletId};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Mutating operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    OpenWallet,
    Deposit,
    Swap,
    Transfer,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::OpenWallet => "open_wallet",
            AuditOperation::Deposit => "deposit",
            AuditOperation::Swap => "swap",
            AuditOperation::Transfer => "transfer",
        }
    }
}

/// One audited call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub operation: AuditOperation,
    pub user_id: UserId,
    pub wallet_id: Option<WalletId>,
    pub transaction_id: Option<TransactionId>,
    /// `"OK"` on success, otherwise the error code.
    pub outcome: &'static str,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    /// Successful call.
    pub fn succeeded(
        operation: AuditOperation,
        user_id: UserId,
        wallet_id: Option<WalletId>,
        transaction_id: Option<TransactionId>,
    ) -> Self {
        Self {
            operation,
            user_id,
            wallet_id,
            transaction_id,
            outcome: "OK",
            at: Utc::now(),
        }
    }

    /// Failed call.
    pub fn failed(operation: AuditOperation, user_id: UserId, kind: ErrorKind) -> Self {
        Self {
            operation,
            user_id,
            wallet_id: None,
            transaction_id: None,
            outcome: kind.code(),
            at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == "OK"
    }
}

/// Receiver of audit events. `record` must return without waiting.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "interstellar::audit",
            operation = event.operation.as_str(),
            user_id = %event.user_id,
            wallet_id = ?event.wallet_id.map(|w| w.to_string()),
            transaction_id = ?event.transaction_id.map(|t| t.to_string()),
            outcome = event.outcome,
            "Ledger call"
        );
    }
}

/// Forwards audit events to a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            warn!(reason, "Dropping audit event");
        }
    }
}
