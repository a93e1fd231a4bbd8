//! Interstellar Ledger
//!
//! Per-user multi-currency wallets and the operations that move money
//! between them: deposits, currency swaps and peer transfers.
//!
//! Every balance change goes through [`LedgerEngine`], which serializes
//! writes per wallet, checks wallet versions on write, and runs transfers as
//! a journaled saga so a failure part way through is compensated.

pub mod error;
pub mod config;
pub mod wallet;
pub mod transaction;
pub mod store;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod locks;
pub mod audit;
pub mod metrics;
pub mod engine;

pub use error::{LedgerError, LedgerResult, StoreError, StoreResult};
pub use config::LedgerConfig;
pub use wallet::{Balances, Wallet};
pub use transaction::{TargetLeg, Transaction, TransactionStatus, TransactionType};
pub use store::{TransactionStore, WalletStore};
pub use journal::{IntentStage, TransferIntent, TransferJournal};
pub use memory::{InMemoryTransactionStore, InMemoryTransferJournal, InMemoryWalletStore};
pub use audit::{AuditEvent, AuditOperation, AuditSink, ChannelAuditSink, TracingAuditSink};
pub use locks::{WalletGuard, WalletLocks};
pub use metrics::{LedgerMetrics, MetricsSnapshot, OperationSnapshot};
pub use postgres::{PgTransactionStore, PgTransferJournal, PgWalletStore};
pub use engine::{LedgerEngine, RecoveryReport};
