//! PostgreSQL ledger store.
//!
//! Each atomic unit is a database transaction. Row locks are taken with
//! `SELECT ... FOR UPDATE` and bounded by a per-transaction `lock_timeout`.
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction as PgTransaction};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    BookingId, EscrowHolding, LedgerStore, LedgerTx, NewEscrowHolding, NewTransaction,
    Transaction, TransactionPage, UserId, Wallet, WalletKey, normalize_page,
};
use crate::wallet::{WalletError, WalletResult};

const WALLET_COLUMNS: &str = "id, user_id, balance, pending_balance, total_earnings, \
    total_spent, currency, bank_name, bank_account_no, bank_account_name, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, transaction_code, wallet_id, booking_id, type, amount, \
    fee, status, balance_before, balance_after, description, payment_method, external_tx_id, \
    created_at, updated_at";

const ESCROW_COLUMNS: &str = "id, booking_id, payer_id, payee_id, amount, platform_fee, \
    total_amount, status, released_at, refunded_at, created_at, updated_at";

/// SQLSTATE raised when `lock_timeout` expires
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE raised on a unique index violation
const UNIQUE_VIOLATION: &str = "23505";

fn map_db_error(err: sqlx::Error) -> WalletError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
            return WalletError::LockTimeout;
        }
    }
    WalletError::Database(err)
}

fn decode_error(message: String) -> WalletError {
    WalletError::Database(sqlx::Error::Decode(message.into()))
}

fn wallet_from_row(row: &PgRow) -> WalletResult<Wallet> {
    Ok(Wallet {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        balance: row.try_get("balance")?,
        pending_balance: row.try_get("pending_balance")?,
        total_earnings: row.try_get("total_earnings")?,
        total_spent: row.try_get("total_spent")?,
        currency: row.try_get("currency")?,
        bank_name: row.try_get("bank_name")?,
        bank_account_no: row.try_get("bank_account_no")?,
        bank_account_name: row.try_get("bank_account_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> WalletResult<Transaction> {
    let transaction_type: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        transaction_code: row.try_get("transaction_code")?,
        wallet_id: row.try_get("wallet_id")?,
        booking_id: row.try_get("booking_id")?,
        transaction_type: transaction_type.parse().map_err(decode_error)?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        status: status.parse().map_err(decode_error)?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        description: row.try_get("description")?,
        payment_method: row.try_get("payment_method")?,
        external_tx_id: row.try_get("external_tx_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn escrow_from_row(row: &PgRow) -> WalletResult<EscrowHolding> {
    let status: String = row.try_get("status")?;
    Ok(EscrowHolding {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        payer_id: row.try_get("payer_id")?,
        payee_id: row.try_get("payee_id")?,
        amount: row.try_get("amount")?,
        platform_fee: row.try_get("platform_fee")?,
        total_amount: row.try_get("total_amount")?,
        status: status.parse().map_err(decode_error)?,
        released_at: row.try_get("released_at")?,
        refunded_at: row.try_get("refunded_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Ledger store backed by PostgreSQL
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: Arc<PgPool>,
    currency: String,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    /// Create a new store
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    /// * `currency` - Currency assigned to newly created wallets
    /// * `lock_timeout` - Upper bound on any single row lock wait
    pub fn new(pool: Arc<PgPool>, currency: impl Into<String>, lock_timeout: Duration) -> Self {
        Self {
            pool,
            currency: currency.into(),
            lock_timeout,
        }
    }

    async fn open(&self) -> WalletResult<PgLedgerTx> {
        let mut tx = self.pool.begin().await?;
        // SET does not accept bind parameters.
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&statement).execute(&mut *tx).await?;
        Ok(PgLedgerTx {
            tx,
            currency: self.currency.clone(),
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> WalletResult<Box<dyn LedgerTx>> {
        Ok(Box::new(self.open().await?))
    }

    async fn get_or_create_wallet(&self, user_id: UserId) -> WalletResult<Wallet> {
        if let Some(wallet) = self.find_wallet(user_id).await? {
            return Ok(wallet);
        }
        let mut tx = self.open().await?;
        let wallet = tx.lock_or_create_wallet(user_id).await?;
        Box::new(tx).commit().await?;
        Ok(wallet)
    }

    async fn find_wallet(&self, user_id: UserId) -> WalletResult<Option<Wallet>> {
        let query = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1");
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        page: u32,
        limit: u32,
    ) -> WalletResult<TransactionPage> {
        let (page, limit) = normalize_page(page, limit);
        let offset = i64::from(page - 1) * i64::from(limit);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM transactions t
            JOIN wallets w ON w.id = t.wallet_id
            WHERE w.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        let query = format!(
            "SELECT {cols} FROM transactions \
             WHERE wallet_id = (SELECT id FROM wallets WHERE user_id = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            cols = TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(TransactionPage {
            items: rows
                .iter()
                .map(transaction_from_row)
                .collect::<WalletResult<_>>()?,
            page,
            limit,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn find_escrow(&self, booking_id: BookingId) -> WalletResult<Option<EscrowHolding>> {
        let query = format!("SELECT {ESCROW_COLUMNS} FROM escrow_holdings WHERE booking_id = $1");
        let row = sqlx::query(&query)
            .bind(booking_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.as_ref().map(escrow_from_row).transpose()
    }

    async fn health_check(&self) -> WalletResult<()> {
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
        Ok(())
    }
}

/// Atomic unit over [`PgLedgerStore`]; rolls back when dropped uncommitted
pub struct PgLedgerTx {
    tx: PgTransaction<'static, Postgres>,
    currency: String,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_wallet(&mut self, key: WalletKey) -> WalletResult<Option<Wallet>> {
        let (column, value) = match key {
            WalletKey::User(user_id) => ("user_id", user_id),
            WalletKey::Id(wallet_id) => ("id", wallet_id),
        };
        let query = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE {column} = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn lock_or_create_wallet(&mut self, user_id: UserId) -> WalletResult<Wallet> {
        // A concurrent creator makes this a no-op; the lock below then sees its row.
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, currency)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&self.currency)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        self.lock_wallet(WalletKey::User(user_id))
            .await?
            .ok_or(WalletError::WalletNotFound(user_id))
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> WalletResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = $2, pending_balance = $3, total_earnings = $4, total_spent = $5,
                bank_name = $6, bank_account_no = $7, bank_account_name = $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.balance)
        .bind(wallet.pending_balance)
        .bind(wallet.total_earnings)
        .bind(wallet.total_spent)
        .bind(&wallet.bank_name)
        .bind(&wallet.bank_account_no)
        .bind(&wallet.bank_account_name)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(WalletError::WalletNotFound(wallet.user_id));
        }
        Ok(())
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> WalletResult<Transaction> {
        let code = transaction.transaction_code.clone();
        let query = format!(
            "INSERT INTO transactions (id, transaction_code, wallet_id, booking_id, type, amount, \
             fee, status, balance_before, balance_after, description, payment_method, \
             external_tx_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {TRANSACTION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&transaction.transaction_code)
            .bind(transaction.wallet_id)
            .bind(transaction.booking_id)
            .bind(transaction.transaction_type.to_string())
            .bind(transaction.amount)
            .bind(transaction.fee)
            .bind(transaction.status.to_string())
            .bind(transaction.balance_before)
            .bind(transaction.balance_after)
            .bind(&transaction.description)
            .bind(&transaction.payment_method)
            .bind(&transaction.external_tx_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| match &err {
                sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                    WalletError::DuplicateTransactionCode(code)
                }
                _ => map_db_error(err),
            })?;
        transaction_from_row(&row)
    }

    async fn find_deposit_by_external_id(
        &mut self,
        external_tx_id: &str,
    ) -> WalletResult<Option<Transaction>> {
        let query = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE type = 'DEPOSIT' AND external_tx_id = $1"
        );
        let row = sqlx::query(&query)
            .bind(external_tx_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn lock_escrow(
        &mut self,
        booking_id: BookingId,
    ) -> WalletResult<Option<EscrowHolding>> {
        let query = format!(
            "SELECT {ESCROW_COLUMNS} FROM escrow_holdings WHERE booking_id = $1 FOR UPDATE"
        );
        let row = sqlx::query(&query)
            .bind(booking_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(escrow_from_row).transpose()
    }

    async fn insert_escrow(&mut self, escrow: NewEscrowHolding) -> WalletResult<EscrowHolding> {
        let booking_id = escrow.booking_id;
        let query = format!(
            "INSERT INTO escrow_holdings (id, booking_id, payer_id, payee_id, amount, \
             platform_fee, total_amount, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'HELD') \
             ON CONFLICT (booking_id) DO NOTHING \
             RETURNING {ESCROW_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(booking_id)
            .bind(escrow.payer_id)
            .bind(escrow.payee_id)
            .bind(escrow.amount)
            .bind(escrow.platform_fee)
            .bind(escrow.total_amount())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        match row {
            Some(row) => escrow_from_row(&row),
            None => Err(WalletError::AlreadyHeld(booking_id)),
        }
    }

    async fn save_escrow(&mut self, escrow: &EscrowHolding) -> WalletResult<()> {
        sqlx::query(
            r#"
            UPDATE escrow_holdings
            SET status = $2, released_at = $3, refunded_at = $4, updated_at = NOW()
            WHERE booking_id = $1
            "#,
        )
        .bind(escrow.booking_id)
        .bind(escrow.status.to_string())
        .bind(escrow.released_at)
        .bind(escrow.refunded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> WalletResult<()> {
        self.tx.commit().await.map_err(map_db_error)
    }
}
