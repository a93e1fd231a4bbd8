//! PostgreSQL store implementations.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interstellar_common::{
    CurrencyCode, IntentId, Money, TransactionId, UserId, WalletAddress, WalletId,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::journal::{IntentStage, TransferIntent, TransferJournal};
use crate::store::{TransactionStore, WalletStore};
use crate::transaction::{TargetLeg, Transaction, TransactionStatus, TransactionType};
use crate::wallet::{Balances, Wallet};

/// Open a pool and bring the schema up to date.
pub async fn connect(database_url: &str) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    info!("Ledger schema up to date");
    Ok(pool)
}

fn currency(raw: String) -> StoreResult<CurrencyCode> {
    CurrencyCode::new(raw).map_err(|e| StoreError::Backend(e.to_string()))
}

fn version_to_db(version: u64) -> StoreResult<i64> {
    i64::try_from(version).map_err(|_| StoreError::Backend("wallet version overflow".into()))
}

const WALLET_COLUMNS: &str = "id, user_id, address, balances, version, created_at, updated_at";

fn wallet_from_row(row: &PgRow) -> StoreResult<Wallet> {
    let Json(balances): Json<Balances> = row.try_get("balances")?;
    let version: i64 = row.try_get("version")?;

    Ok(Wallet {
        id: WalletId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        address: WalletAddress::new(row.try_get::<String, _>("address")?),
        balances,
        version: u64::try_from(version)
            .map_err(|_| StoreError::Backend("negative wallet version".into()))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Wallets in PostgreSQL.
#[derive(Clone)]
pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, column: &str, value: Uuid) -> StoreResult<Wallet> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE {column} = $1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        wallet_from_row(&row)
    }
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn create(&self, wallet: &Wallet) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO wallets (id, user_id, address, balances, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(wallet.id.as_uuid())
        .bind(wallet.user_id.as_uuid())
        .bind(wallet.address.as_str())
        .bind(Json(&wallet.balances))
        .bind(version_to_db(wallet.version)?)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &WalletId) -> StoreResult<Wallet> {
        self.fetch_one_where("id", *id.as_uuid()).await
    }

    async fn get_by_user(&self, user_id: &UserId) -> StoreResult<Wallet> {
        self.fetch_one_where("user_id", *user_id.as_uuid()).await
    }

    async fn get_by_address(&self, address: &WalletAddress) -> StoreResult<Wallet> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE address = $1");
        let row = sqlx::query(&sql)
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        wallet_from_row(&row)
    }

    async fn apply_balance_update(&self, wallet: &Wallet) -> StoreResult<Wallet> {
        let sql = format!(
            "UPDATE wallets SET balances = $1, version = version + 1, updated_at = now() \
             WHERE id = $2 AND version = $3 RETURNING {WALLET_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(Json(&wallet.balances))
            .bind(wallet.id.as_uuid())
            .bind(version_to_db(wallet.version)?)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(row) => wallet_from_row(&row),
            None => {
                let exists = sqlx::query("SELECT 1 FROM wallets WHERE id = $1")
                    .bind(wallet.id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?
                    .is_some();
                if exists {
                    Err(StoreError::ConcurrentModification(wallet.id))
                } else {
                    Err(StoreError::NotFound)
                }
            }
        }
    }
}

const TRANSACTION_COLUMNS: &str = "id, type, status, wallet_id, user_id, recipient_wallet_id, \
     from_currency, from_amount, to_currency, to_amount, exchange_rate, created_at, updated_at";

fn transaction_from_row(row: &PgRow) -> StoreResult<Transaction> {
    let transaction_type: TransactionType = row
        .try_get::<String, _>("type")?
        .parse()
        .map_err(StoreError::Backend)?;
    let status: TransactionStatus = row
        .try_get::<String, _>("status")?
        .parse()
        .map_err(StoreError::Backend)?;

    let to_currency: Option<String> = row.try_get("to_currency")?;
    let to_amount: Option<Decimal> = row.try_get("to_amount")?;
    let exchange_rate: Option<Decimal> = row.try_get("exchange_rate")?;
    let target = match (to_currency, to_amount, exchange_rate) {
        (Some(code), Some(to_amount), Some(exchange_rate)) => Some(TargetLeg {
            to_currency: currency(code)?,
            to_amount,
            exchange_rate,
        }),
        _ => None,
    };

    Ok(Transaction {
        id: TransactionId::from_uuid(row.try_get("id")?),
        transaction_type,
        status,
        wallet_id: WalletId::from_uuid(row.try_get("wallet_id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        recipient_wallet_id: row
            .try_get::<Option<Uuid>, _>("recipient_wallet_id")?
            .map(WalletId::from_uuid),
        from_currency: currency(row.try_get("from_currency")?)?,
        from_amount: row.try_get("from_amount")?,
        target,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Transactions in PostgreSQL.
#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create(&self, transaction: &Transaction) -> StoreResult<()> {
        let target = transaction.target.as_ref();

        sqlx::query(
            "INSERT INTO transactions (id, type, status, wallet_id, user_id, recipient_wallet_id, \
             from_currency, from_amount, to_currency, to_amount, exchange_rate, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.status.as_str())
        .bind(transaction.wallet_id.as_uuid())
        .bind(transaction.user_id.as_uuid())
        .bind(transaction.recipient_wallet_id.map(|w| *w.as_uuid()))
        .bind(transaction.from_currency.as_str())
        .bind(transaction.from_amount)
        .bind(target.map(|t| t.to_currency.as_str().to_string()))
        .bind(target.map(|t| t.to_amount))
        .bind(target.map(|t| t.exchange_rate))
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &TransactionId) -> StoreResult<Transaction> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        transaction_from_row(&row)
    }

    async fn get_by_user_id(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn get_by_wallet_id(
        &self,
        wallet_id: &WalletId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE wallet_id = $1 OR recipient_wallet_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(wallet_id.as_uuid())
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn update_status(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
    ) -> StoreResult<()> {
        if !TransactionStatus::Pending.can_transition_to(status) {
            return Err(StoreError::Conflict(format!(
                "transaction {id} cannot become {status}"
            )));
        }

        let result = sqlx::query(
            "UPDATE transactions SET status = $1, updated_at = now() \
             WHERE id = $2 AND status = 'PENDING'",
        )
        .bind(status.as_str())
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_by_id(id).await {
            Ok(current) => Err(StoreError::Conflict(format!(
                "transaction {id} is {}, cannot become {status}",
                current.status
            ))),
            Err(e) => Err(e),
        }
    }
}

const INTENT_COLUMNS: &str = "id, transaction_id, sender_wallet_id, recipient_wallet_id, \
     debit_currency, debit_amount, credit_currency, credit_amount, stage, created_at, updated_at";

fn intent_from_row(row: &PgRow) -> StoreResult<TransferIntent> {
    let stage: String = row.try_get("stage")?;
    let stage = IntentStage::parse(&stage)
        .ok_or_else(|| StoreError::Backend(format!("unknown intent stage: {stage}")))?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(TransferIntent {
        id: IntentId::from_uuid(row.try_get("id")?),
        transaction_id: TransactionId::from_uuid(row.try_get("transaction_id")?),
        sender_wallet_id: WalletId::from_uuid(row.try_get("sender_wallet_id")?),
        recipient_wallet_id: WalletId::from_uuid(row.try_get("recipient_wallet_id")?),
        debit: Money::new(
            row.try_get("debit_amount")?,
            currency(row.try_get("debit_currency")?)?,
        ),
        credit: Money::new(
            row.try_get("credit_amount")?,
            currency(row.try_get("credit_currency")?)?,
        ),
        stage,
        created_at,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Transfer intents in PostgreSQL.
#[derive(Clone)]
pub struct PgTransferJournal {
    pool: PgPool,
}

impl PgTransferJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferJournal for PgTransferJournal {
    async fn begin(&self, intent: &TransferIntent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO transfer_intents (id, transaction_id, sender_wallet_id, recipient_wallet_id, \
             debit_currency, debit_amount, credit_currency, credit_amount, stage, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(intent.id.as_uuid())
        .bind(intent.transaction_id.as_uuid())
        .bind(intent.sender_wallet_id.as_uuid())
        .bind(intent.recipient_wallet_id.as_uuid())
        .bind(intent.debit.currency.as_str())
        .bind(intent.debit.value)
        .bind(intent.credit.currency.as_str())
        .bind(intent.credit.value)
        .bind(intent.stage.as_str())
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &IntentId) -> StoreResult<TransferIntent> {
        let row = sqlx::query(&format!("SELECT {INTENT_COLUMNS} FROM transfer_intents WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        intent_from_row(&row)
    }

    async fn advance(&self, id: &IntentId, from: IntentStage, to: IntentStage) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE transfer_intents SET stage = $1, updated_at = now() WHERE id = $2 AND stage = $3",
        )
        .bind(to.as_str())
        .bind(id.as_uuid())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current = self.get(id).await?;
        Err(StoreError::Conflict(format!(
            "intent {id} is {}, expected {from}",
            current.stage
        )))
    }

    async fn incomplete(&self) -> StoreResult<Vec<TransferIntent>> {
        let rows = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM transfer_intents \
             WHERE stage IN ('STARTED', 'DEBITED', 'CREDITED') ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(intent_from_row).collect()
    }
}
