//! In-process ledger store.
//!
//! Rows live behind a single `std::sync::Mutex` that is only ever held for
//! short, synchronous critical sections. Row locks are separate
//! `tokio::sync::Mutex`es keyed by wallet owner or booking, so a unit waiting
//! for a contended row parks its task instead of spinning. A unit stages its
//! writes locally and publishes them in one step on commit; dropping it
//! discards them.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    BookingId, EscrowHolding, LedgerStore, LedgerTx, NewEscrowHolding, NewTransaction,
    Transaction, TransactionPage, TransactionType, UserId, Wallet, WalletKey, normalize_page,
};
use crate::wallet::{WalletError, WalletResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Wallet(UserId),
    Escrow(BookingId),
}

/// Unique values claimed by a unit that has not committed yet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Reservation {
    Escrow(BookingId),
    Code(String),
    Deposit(String),
}

#[derive(Default)]
struct Tables {
    wallets: HashMap<UserId, Wallet>,
    transactions: Vec<Transaction>,
    codes: HashSet<String>,
    escrows: HashMap<BookingId, EscrowHolding>,
    reserved: HashSet<Reservation>,
}

impl Tables {
    fn wallet_owner(&self, wallet_id: Uuid) -> Option<UserId> {
        self.wallets
            .values()
            .find(|w| w.id == wallet_id)
            .map(|w| w.user_id)
    }

    fn committed_deposit(&self, external_tx_id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| {
            t.transaction_type == TransactionType::Deposit
                && t.external_tx_id.as_deref() == Some(external_tx_id)
        })
    }
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, key: RowKey) -> Arc<RowMutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key).or_default().clone()
    }
}

/// Ledger store kept entirely in process memory
#[derive(Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
    currency: String,
}

impl MemoryLedgerStore {
    /// Create an empty store whose new wallets use `currency`
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            currency: currency.into(),
        }
    }

    fn open(&self) -> MemoryLedgerTx {
        MemoryLedgerTx {
            shared: self.shared.clone(),
            currency: self.currency.clone(),
            held: HashMap::new(),
            wallets: HashMap::new(),
            dirty_wallets: HashSet::new(),
            escrows: HashMap::new(),
            dirty_escrows: HashSet::new(),
            transactions: Vec::new(),
            reservations: Vec::new(),
            committed: false,
        }
    }

    /// Snapshot of every committed wallet
    pub fn wallets(&self) -> Vec<Wallet> {
        self.shared.tables().wallets.values().cloned().collect()
    }

    /// Snapshot of the committed transaction log, in commit order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.shared.tables().transactions.clone()
    }

    /// Snapshot of every committed escrow holding
    pub fn escrows(&self) -> Vec<EscrowHolding> {
        self.shared.tables().escrows.values().cloned().collect()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new("VND")
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> WalletResult<Box<dyn LedgerTx>> {
        Ok(Box::new(self.open()))
    }

    async fn get_or_create_wallet(&self, user_id: UserId) -> WalletResult<Wallet> {
        if let Some(wallet) = self.find_wallet(user_id).await? {
            return Ok(wallet);
        }
        let mut tx = self.open();
        let wallet = tx.lock_or_create_wallet(user_id).await?;
        Box::new(tx).commit().await?;
        Ok(wallet)
    }

    async fn find_wallet(&self, user_id: UserId) -> WalletResult<Option<Wallet>> {
        Ok(self.shared.tables().wallets.get(&user_id).cloned())
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        page: u32,
        limit: u32,
    ) -> WalletResult<TransactionPage> {
        let (page, limit) = normalize_page(page, limit);
        let tables = self.shared.tables();
        let Some(wallet_id) = tables.wallets.get(&user_id).map(|w| w.id) else {
            return Ok(TransactionPage {
                items: Vec::new(),
                page,
                limit,
                total: 0,
            });
        };

        let mine: Vec<&Transaction> = tables
            .transactions
            .iter()
            .rev()
            .filter(|t| t.wallet_id == wallet_id)
            .collect();
        let offset = ((page - 1) as usize).saturating_mul(limit as usize);
        let items = mine
            .iter()
            .skip(offset)
            .take(limit as usize)
            .map(|t| (*t).clone())
            .collect();

        Ok(TransactionPage {
            items,
            page,
            limit,
            total: mine.len() as u64,
        })
    }

    async fn find_escrow(&self, booking_id: BookingId) -> WalletResult<Option<EscrowHolding>> {
        Ok(self.shared.tables().escrows.get(&booking_id).cloned())
    }

    async fn health_check(&self) -> WalletResult<()> {
        Ok(())
    }
}

/// Atomic unit over [`MemoryLedgerStore`]
pub struct MemoryLedgerTx {
    shared: Arc<Shared>,
    currency: String,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    wallets: HashMap<UserId, Wallet>,
    dirty_wallets: HashSet<UserId>,
    escrows: HashMap<BookingId, EscrowHolding>,
    dirty_escrows: HashSet<BookingId>,
    transactions: Vec<Transaction>,
    reservations: Vec<Reservation>,
    committed: bool,
}

impl MemoryLedgerTx {
    async fn lock_row(&mut self, key: RowKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let row = self.shared.row_lock(key);
        let guard = row.lock_owned().await;
        self.held.insert(key, guard);
    }

    fn reserve(&mut self, tables: &mut Tables, reservation: Reservation) {
        tables.reserved.insert(reservation.clone());
        self.reservations.push(reservation);
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_wallet(&mut self, key: WalletKey) -> WalletResult<Option<Wallet>> {
        let user_id = match key {
            WalletKey::User(user_id) => user_id,
            WalletKey::Id(wallet_id) => {
                let staged = self
                    .wallets
                    .values()
                    .find(|w| w.id == wallet_id)
                    .map(|w| w.user_id);
                match staged.or_else(|| self.shared.tables().wallet_owner(wallet_id)) {
                    Some(user_id) => user_id,
                    None => return Ok(None),
                }
            }
        };

        self.lock_row(RowKey::Wallet(user_id)).await;

        if let Some(wallet) = self.wallets.get(&user_id) {
            return Ok(Some(wallet.clone()));
        }
        let committed = self.shared.tables().wallets.get(&user_id).cloned();
        if let Some(wallet) = &committed {
            self.wallets.insert(user_id, wallet.clone());
        }
        Ok(committed)
    }

    async fn lock_or_create_wallet(&mut self, user_id: UserId) -> WalletResult<Wallet> {
        if let Some(wallet) = self.lock_wallet(WalletKey::User(user_id)).await? {
            return Ok(wallet);
        }
        let wallet = Wallet::empty(user_id, &self.currency);
        self.wallets.insert(user_id, wallet.clone());
        self.dirty_wallets.insert(user_id);
        Ok(wallet)
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> WalletResult<()> {
        if !self.wallets.contains_key(&wallet.user_id) {
            return Err(WalletError::InvariantViolation(format!(
                "wallet {} written without holding its lock",
                wallet.id
            )));
        }
        if wallet.balance.is_sign_negative() || wallet.pending_balance.is_sign_negative() {
            return Err(WalletError::InvariantViolation(format!(
                "wallet {} would go negative",
                wallet.id
            )));
        }
        let mut row = wallet.clone();
        row.updated_at = Utc::now();
        self.wallets.insert(wallet.user_id, row);
        self.dirty_wallets.insert(wallet.user_id);
        Ok(())
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> WalletResult<Transaction> {
        let shared = self.shared.clone();
        let mut tables = shared.tables();

        let code = transaction.transaction_code.clone();
        if tables.codes.contains(&code)
            || tables.reserved.contains(&Reservation::Code(code.clone()))
        {
            return Err(WalletError::DuplicateTransactionCode(code));
        }

        let deposit_key = match (&transaction.transaction_type, &transaction.external_tx_id) {
            (TransactionType::Deposit, Some(external)) => Some(external.clone()),
            _ => None,
        };
        if let Some(external) = &deposit_key {
            if tables.committed_deposit(external).is_some()
                || tables
                    .reserved
                    .contains(&Reservation::Deposit(external.clone()))
            {
                return Err(WalletError::DuplicateTransactionCode(format!(
                    "deposit {external}"
                )));
            }
        }

        self.reserve(&mut tables, Reservation::Code(code));
        if let Some(external) = deposit_key {
            self.reserve(&mut tables, Reservation::Deposit(external));
        }
        drop(tables);

        let row = transaction.into_transaction();
        self.transactions.push(row.clone());
        Ok(row)
    }

    async fn find_deposit_by_external_id(
        &mut self,
        external_tx_id: &str,
    ) -> WalletResult<Option<Transaction>> {
        let staged = self.transactions.iter().find(|t| {
            t.transaction_type == TransactionType::Deposit
                && t.external_tx_id.as_deref() == Some(external_tx_id)
        });
        if let Some(found) = staged {
            return Ok(Some(found.clone()));
        }
        Ok(self
            .shared
            .tables()
            .committed_deposit(external_tx_id)
            .cloned())
    }

    async fn lock_escrow(
        &mut self,
        booking_id: BookingId,
    ) -> WalletResult<Option<EscrowHolding>> {
        self.lock_row(RowKey::Escrow(booking_id)).await;

        if let Some(escrow) = self.escrows.get(&booking_id) {
            return Ok(Some(escrow.clone()));
        }
        let committed = self.shared.tables().escrows.get(&booking_id).cloned();
        if let Some(escrow) = &committed {
            self.escrows.insert(booking_id, escrow.clone());
        }
        Ok(committed)
    }

    async fn insert_escrow(&mut self, escrow: NewEscrowHolding) -> WalletResult<EscrowHolding> {
        let booking_id = escrow.booking_id;
        let shared = self.shared.clone();
        let mut tables = shared.tables();
        if self.escrows.contains_key(&booking_id)
            || tables.escrows.contains_key(&booking_id)
            || tables.reserved.contains(&Reservation::Escrow(booking_id))
        {
            return Err(WalletError::AlreadyHeld(booking_id));
        }
        self.reserve(&mut tables, Reservation::Escrow(booking_id));
        drop(tables);

        let holding = escrow.into_holding();
        self.escrows.insert(booking_id, holding.clone());
        self.dirty_escrows.insert(booking_id);
        Ok(holding)
    }

    async fn save_escrow(&mut self, escrow: &EscrowHolding) -> WalletResult<()> {
        if !self.escrows.contains_key(&escrow.booking_id) {
            return Err(WalletError::InvariantViolation(format!(
                "escrow for booking {} written without holding its lock",
                escrow.booking_id
            )));
        }
        let mut row = escrow.clone();
        row.updated_at = Utc::now();
        self.escrows.insert(escrow.booking_id, row);
        self.dirty_escrows.insert(escrow.booking_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> WalletResult<()> {
        let mut this = *self;
        {
            let shared = this.shared.clone();
            let mut tables = shared.tables();
            for user_id in this.dirty_wallets.drain() {
                if let Some(wallet) = this.wallets.remove(&user_id) {
                    tables.wallets.insert(user_id, wallet);
                }
            }
            for booking_id in this.dirty_escrows.drain() {
                if let Some(escrow) = this.escrows.remove(&booking_id) {
                    tables.escrows.insert(booking_id, escrow);
                }
            }
            for transaction in this.transactions.drain(..) {
                tables.codes.insert(transaction.transaction_code.clone());
                tables.transactions.push(transaction);
            }
            for reservation in this.reservations.drain(..) {
                tables.reserved.remove(&reservation);
            }
        }
        this.committed = true;
        // Row locks are released when `this` drops here.
        Ok(())
    }
}

impl Drop for MemoryLedgerTx {
    fn drop(&mut self) {
        if self.committed || self.reservations.is_empty() {
            return;
        }
        let mut tables = self.shared.tables();
        for reservation in self.reservations.drain(..) {
            tables.reserved.remove(&reservation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{EscrowStatus, TransactionStatus};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn deposit(wallet: &Wallet, amount: Decimal, code: &str) -> NewTransaction {
        NewTransaction {
            transaction_code: code.to_string(),
            wallet_id: wallet.id,
            booking_id: None,
            transaction_type: TransactionType::Deposit,
            amount,
            fee: Decimal::ZERO,
            status: TransactionStatus::Completed,
            balance_before: wallet.balance,
            balance_after: wallet.balance + amount,
            description: None,
            payment_method: None,
            external_tx_id: None,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_wallet_is_stable() {
        let store = MemoryLedgerStore::new("VND");
        let user = Uuid::new_v4();

        let first = store.get_or_create_wallet(user).await.unwrap();
        let second = store.get_or_create_wallet(user).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.balance, Decimal::ZERO);
        assert_eq!(first.currency, "VND");
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_writes() {
        let store = MemoryLedgerStore::default();
        let user = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let mut wallet = tx.lock_or_create_wallet(user).await.unwrap();
        let entry = deposit(&wallet, dec!(100), "TOP-1");
        wallet.balance += dec!(100);
        tx.save_wallet(&wallet).await.unwrap();
        tx.append_transaction(entry).await.unwrap();

        assert!(store.find_wallet(user).await.unwrap().is_none());
        tx.commit().await.unwrap();

        let wallet = store.find_wallet(user).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(100));
        assert_eq!(store.transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let store = MemoryLedgerStore::default();
        let user = Uuid::new_v4();
        store.get_or_create_wallet(user).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            let mut wallet = tx.lock_wallet(WalletKey::User(user)).await.unwrap().unwrap();
            let entry = deposit(&wallet, dec!(50), "TOP-ROLLBACK");
            wallet.balance += dec!(50);
            tx.save_wallet(&wallet).await.unwrap();
            tx.append_transaction(entry).await.unwrap();
        }

        let wallet = store.find_wallet(user).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert!(store.transactions().is_empty());

        // The rolled back code is free again.
        let mut tx = store.begin().await.unwrap();
        let wallet = tx.lock_wallet(WalletKey::User(user)).await.unwrap().unwrap();
        tx.append_transaction(deposit(&wallet, dec!(50), "TOP-ROLLBACK"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lock_by_wallet_id() {
        let store = MemoryLedgerStore::default();
        let user = Uuid::new_v4();
        let wallet = store.get_or_create_wallet(user).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let locked = tx.lock_wallet(WalletKey::Id(wallet.id)).await.unwrap();
        assert_eq!(locked.map(|w| w.user_id), Some(user));

        let missing = tx.lock_wallet(WalletKey::Id(Uuid::new_v4())).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_relocking_same_row_is_reentrant() {
        let store = MemoryLedgerStore::default();
        let user = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let mut wallet = tx.lock_or_create_wallet(user).await.unwrap();
        wallet.balance = dec!(10);
        tx.save_wallet(&wallet).await.unwrap();

        let again = tokio::time::timeout(
            Duration::from_millis(200),
            tx.lock_wallet(WalletKey::User(user)),
        )
        .await
        .expect("re-locking a held row must not block")
        .unwrap()
        .unwrap();
        assert_eq!(again.balance, dec!(10));
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_unit_until_commit() {
        let store = MemoryLedgerStore::default();
        let user = Uuid::new_v4();
        store.get_or_create_wallet(user).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut wallet = first.lock_wallet(WalletKey::User(user)).await.unwrap().unwrap();

        let contender = store.clone();
        let waiter = tokio::spawn(async move {
            let mut second = contender.begin().await.unwrap();
            let seen = second
                .lock_wallet(WalletKey::User(user))
                .await
                .unwrap()
                .unwrap();
            seen.balance
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "second unit must wait for the lock");

        wallet.balance = dec!(77);
        first.save_wallet(&wallet).await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), dec!(77));
    }

    #[tokio::test]
    async fn test_save_wallet_rejects_negative_balance() {
        let store = MemoryLedgerStore::default();
        let mut tx = store.begin().await.unwrap();
        let mut wallet = tx.lock_or_create_wallet(Uuid::new_v4()).await.unwrap();
        wallet.balance = dec!(-1);

        let err = tx.save_wallet(&wallet).await.unwrap_err();
        assert!(matches!(err, WalletError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_save_wallet_requires_lock() {
        let store = MemoryLedgerStore::default();
        let wallet = Wallet::empty(Uuid::new_v4(), "VND");
        let mut tx = store.begin().await.unwrap();

        let err = tx.save_wallet(&wallet).await.unwrap_err();
        assert!(matches!(err, WalletError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_escrow_insert_is_rejected() {
        let store = MemoryLedgerStore::default();
        let booking = Uuid::new_v4();
        let new_escrow = || NewEscrowHolding {
            booking_id: booking,
            payer_id: Uuid::new_v4(),
            payee_id: Uuid::new_v4(),
            amount: dec!(100),
            platform_fee: dec!(15),
        };

        let mut first = store.begin().await.unwrap();
        first.insert_escrow(new_escrow()).await.unwrap();

        // Uncommitted insert already claims the booking.
        let mut second = store.begin().await.unwrap();
        let err = second.insert_escrow(new_escrow()).await.unwrap_err();
        assert!(matches!(err, WalletError::AlreadyHeld(b) if b == booking));

        first.commit().await.unwrap();
        let err = second.insert_escrow(new_escrow()).await.unwrap_err();
        assert!(matches!(err, WalletError::AlreadyHeld(_)));

        let held = store.find_escrow(booking).await.unwrap().unwrap();
        assert_eq!(held.status, EscrowStatus::Held);
        assert_eq!(held.total_amount, dec!(115));
    }

    #[tokio::test]
    async fn test_list_transactions_pages_newest_first() {
        let store = MemoryLedgerStore::default();
        let user = Uuid::new_v4();

        for i in 0..5 {
            let mut tx = store.begin().await.unwrap();
            let mut wallet = tx.lock_or_create_wallet(user).await.unwrap();
            let entry = deposit(&wallet, dec!(1), &format!("TOP-{i}"));
            wallet.balance += dec!(1);
            tx.save_wallet(&wallet).await.unwrap();
            tx.append_transaction(entry).await.unwrap();
            tx.commit().await.unwrap();
        }

        let page = store.list_transactions(user, 1, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].transaction_code, "TOP-4");

        let last = store.list_transactions(user, 3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].transaction_code, "TOP-0");

        let nobody = store.list_transactions(Uuid::new_v4(), 1, 10).await.unwrap();
        assert_eq!(nobody.total, 0);
    }
}
