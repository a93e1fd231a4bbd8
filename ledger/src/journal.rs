//! Transfer intent journal.
//!
//! A transfer touches two wallets in two separate writes. Before the first
//! write the engine records an intent, and advances it after each step, so a
//! transfer interrupted part way through can be found and unwound.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interstellar_common::{IntentId, Money, TransactionId, WalletId};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Progress of a transfer intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStage {
    /// Recorded; no wallet written yet, or the debit outcome is unknown.
    Started,
    /// Sender debited.
    Debited,
    /// Recipient credited.
    Credited,
    /// Transaction record written.
    Completed,
    /// Failed before any money moved.
    Aborted,
    /// Failed after the debit and unwound.
    Compensated,
    /// Unwinding failed or the state is ambiguous; needs an operator.
    NeedsReview,
}

impl IntentStage {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStage::Started => "STARTED",
            IntentStage::Debited => "DEBITED",
            IntentStage::Credited => "CREDITED",
            IntentStage::Completed => "COMPLETED",
            IntentStage::Aborted => "ABORTED",
            IntentStage::Compensated => "COMPENSATED",
            IntentStage::NeedsReview => "NEEDS_REVIEW",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "STARTED" => IntentStage::Started,
            "DEBITED" => IntentStage::Debited,
            "CREDITED" => IntentStage::Credited,
            "COMPLETED" => IntentStage::Completed,
            "ABORTED" => IntentStage::Aborted,
            "COMPENSATED" => IntentStage::Compensated,
            "NEEDS_REVIEW" => IntentStage::NeedsReview,
            _ => return None,
        })
    }

    /// Check if no further work is expected for this intent.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStage::Completed
                | IntentStage::Aborted
                | IntentStage::Compensated
                | IntentStage::NeedsReview
        )
    }
}

impl std::fmt::Display for IntentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transfer in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub id: IntentId,
    /// Id the transaction record will carry once written.
    pub transaction_id: TransactionId,
    pub sender_wallet_id: WalletId,
    pub recipient_wallet_id: WalletId,
    /// Amount taken from the sender.
    pub debit: Money,
    /// Amount given to the recipient.
    pub credit: Money,
    pub stage: IntentStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferIntent {
    /// Create a new intent in the `Started` stage.
    pub fn new(
        transaction_id: TransactionId,
        sender_wallet_id: WalletId,
        recipient_wallet_id: WalletId,
        debit: Money,
        credit: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: IntentId::new(),
            transaction_id,
            sender_wallet_id,
            recipient_wallet_id,
            debit,
            credit,
            stage: IntentStage::Started,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable record of transfer intents.
#[async_trait]
pub trait TransferJournal: Send + Sync {
    /// Record a new intent.
    async fn begin(&self, intent: &TransferIntent) -> StoreResult<()>;

    /// Look up an intent by id.
    async fn get(&self, id: &IntentId) -> StoreResult<TransferIntent>;

    /// Move an intent from `from` to `to`.
    ///
    /// Fails with `Conflict` when the intent is no longer in `from`, so two
    /// actors cannot both act on the same stage.
    async fn advance(&self, id: &IntentId, from: IntentStage, to: IntentStage) -> StoreResult<()>;

    /// Intents that have not reached a terminal stage, oldest first.
    async fn incomplete(&self) -> StoreResult<Vec<TransferIntent>>;
}
