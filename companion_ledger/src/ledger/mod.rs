//! Ledger store: wallets, the append-only transaction log and escrow rows.
//!
//! The store is split in two traits:
//!
//! - [`LedgerStore`] is the shared handle. It opens atomic units and serves
//!   plain (non-locking) reads.
//! - [`LedgerTx`] is one atomic unit. Every wallet or escrow row it touches is
//!   locked exclusively until [`LedgerTx::commit`]. Dropping a unit without
//!   committing discards everything it wrote.
//!
//! Two backends are provided: [`PgLedgerStore`] on PostgreSQL row locks and
//! [`MemoryLedgerStore`], an in-process store with the same locking semantics.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::wallet::WalletResult;

pub use memory::MemoryLedgerStore;
pub use models::{
    BankInfo, BookingId, EntryDirection, EscrowHolding, EscrowStatus, NewEscrowHolding,
    NewTransaction, Transaction, TransactionPage, TransactionStatus, TransactionType, UserId,
    Wallet, WalletKey,
};
pub use postgres::PgLedgerStore;

/// Largest page size accepted by [`LedgerStore::list_transactions`]
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Clamp a requested page/limit pair to valid values
pub fn normalize_page(page: u32, limit: u32) -> (u32, u32) {
    (page.max(1), limit.clamp(1, MAX_PAGE_LIMIT))
}

/// Shared handle to the ledger tables
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new atomic unit
    async fn begin(&self) -> WalletResult<Box<dyn LedgerTx>>;

    /// Return the user's wallet, creating a zeroed one if absent
    async fn get_or_create_wallet(&self, user_id: UserId) -> WalletResult<Wallet>;

    /// Non-locking read of a wallet
    async fn find_wallet(&self, user_id: UserId) -> WalletResult<Option<Wallet>>;

    /// Page through a user's transactions, newest first
    async fn list_transactions(
        &self,
        user_id: UserId,
        page: u32,
        limit: u32,
    ) -> WalletResult<TransactionPage>;

    /// Non-locking read of a booking's escrow holding
    async fn find_escrow(&self, booking_id: BookingId) -> WalletResult<Option<EscrowHolding>>;

    /// Check that the backing storage is reachable
    async fn health_check(&self) -> WalletResult<()>;
}

/// One atomic unit of ledger work
#[async_trait]
pub trait LedgerTx: Send {
    /// Lock a wallet row for the rest of the unit
    ///
    /// Locking a row the unit already holds returns the unit's current view
    /// of it instead of waiting on itself.
    async fn lock_wallet(&mut self, key: WalletKey) -> WalletResult<Option<Wallet>>;

    /// Lock a user's wallet row, creating a zeroed wallet if absent
    async fn lock_or_create_wallet(&mut self, user_id: UserId) -> WalletResult<Wallet>;

    /// Write back a wallet previously returned by one of the lock methods
    async fn save_wallet(&mut self, wallet: &Wallet) -> WalletResult<()>;

    /// Insert an immutable transaction row
    async fn append_transaction(&mut self, transaction: NewTransaction)
    -> WalletResult<Transaction>;

    /// Find a deposit previously recorded for a gateway transaction id
    async fn find_deposit_by_external_id(
        &mut self,
        external_tx_id: &str,
    ) -> WalletResult<Option<Transaction>>;

    /// Lock a booking's escrow row, if one exists
    async fn lock_escrow(&mut self, booking_id: BookingId)
    -> WalletResult<Option<EscrowHolding>>;

    /// Create a HELD escrow row
    ///
    /// Fails with `WalletError::AlreadyHeld` when the booking already has
    /// one. On Postgres, a competing uncommitted insert for the same booking
    /// makes this wait, bounded by the lock timeout, until that unit commits
    /// (then `AlreadyHeld`) or rolls back (then the insert proceeds).
    async fn insert_escrow(&mut self, escrow: NewEscrowHolding) -> WalletResult<EscrowHolding>;

    /// Write back an escrow row previously returned by `lock_escrow`
    async fn save_escrow(&mut self, escrow: &EscrowHolding) -> WalletResult<()>;

    /// Make every write of this unit durable and release its locks
    async fn commit(self: Box<Self>) -> WalletResult<()>;
}
