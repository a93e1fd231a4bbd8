//! Ledger operation metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::audit::AuditOperation;

#[derive(Default)]
struct OperationCounters {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl OperationCounters {
    fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Ledger metrics.
#[derive(Default)]
pub struct LedgerMetrics {
    open_wallet: OperationCounters,
    deposit: OperationCounters,
    swap: OperationCounters,
    transfer: OperationCounters,
    /// Version conflicts that were retried.
    pub optimistic_retries: AtomicU64,
    /// Transfers unwound after a partial failure.
    pub compensations: AtomicU64,
    /// Compensations that gave up and left the intent for review.
    pub compensations_failed: AtomicU64,
}

impl LedgerMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, operation: AuditOperation) -> &OperationCounters {
        match operation {
            AuditOperation::OpenWallet => &self.open_wallet,
            AuditOperation::Deposit => &self.deposit,
            AuditOperation::Swap => &self.swap,
            AuditOperation::Transfer => &self.transfer,
        }
    }

    /// Record an operation starting.
    pub fn attempted(&self, operation: AuditOperation) {
        self.counters(operation)
            .attempted
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation outcome.
    pub fn finished(&self, operation: AuditOperation, success: bool) {
        let counters = self.counters(operation);
        if success {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a version conflict retry.
    pub fn optimistic_retry(&self) {
        self.optimistic_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed compensation.
    pub fn compensated(&self) {
        self.compensations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a compensation that gave up.
    pub fn compensation_failed(&self) {
        self.compensations_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            open_wallet: self.open_wallet.snapshot(),
            deposit: self.deposit.snapshot(),
            swap: self.swap.snapshot(),
            transfer: self.transfer.snapshot(),
            optimistic_retries: self.optimistic_retries.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
            compensations_failed: self.compensations_failed.load(Ordering::Relaxed),
        }
    }
}

/// Counters for one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub open_wallet: OperationSnapshot,
    pub deposit: OperationSnapshot,
    pub swap: OperationSnapshot,
    pub transfer: OperationSnapshot,
    pub optimistic_retries: u64,
    pub compensations: u64,
    pub compensations_failed: u64,
}

impl MetricsSnapshot {
    /// Total successful operations of every kind.
    pub fn total_succeeded(&self) -> u64 {
        self.open_wallet.succeeded + self.deposit.succeeded + self.swap.succeeded + self.transfer.succeeded
    }

    /// Total failed operations of every kind.
    pub fn total_failed(&self) -> u64 {
        self.open_wallet.failed + self.deposit.failed + self.swap.failed + self.transfer.failed
    }
}
