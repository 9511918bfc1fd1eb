//! Wallet service: the only writer of wallet balances.
//!
//! Every money movement runs in one atomic unit opened by
//! [`WalletService::atomic`]: the unit locks the rows it reads, stages its
//! writes and commits them together. Any error or timeout drops the unit,
//! which rolls everything back. Notifications go out only after commit.

use futures_util::future::BoxFuture;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::codes::generate_transaction_code;
use super::errors::{WalletError, WalletResult};
use crate::db::timeouts::{DEFAULT_TRANSACTION_TIMEOUT, with_timeout};
use crate::escrow::{EscrowManager, EscrowResolution};
use crate::ledger::{
    BankInfo, BookingId, EscrowHolding, EscrowStatus, LedgerStore, LedgerTx, NewEscrowHolding, NewTransaction,
    Transaction, TransactionPage, TransactionStatus, TransactionType, UserId, Wallet, WalletKey,
};
use crate::notify::{NotificationKind, Notifier};

/// Wallet service configuration
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Upper bound on one atomic unit, lock waits included
    pub transaction_timeout: Duration,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }
}

/// Result of [`WalletService::pay_and_hold_escrow`]
#[derive(Debug, Clone, PartialEq)]
pub enum HoldOutcome {
    /// Funds moved from balance into a new holding
    Held {
        escrow: EscrowHolding,
        transaction: Transaction,
    },
    /// The booking already has a HELD holding; nothing changed
    AlreadyHeld(EscrowHolding),
}

impl HoldOutcome {
    pub fn escrow(&self) -> &EscrowHolding {
        match self {
            HoldOutcome::Held { escrow, .. } | HoldOutcome::AlreadyHeld(escrow) => escrow,
        }
    }
}

/// Result of releasing or refunding a booking's holding
#[derive(Debug, Clone, PartialEq)]
pub enum EscrowOutcome {
    Released {
        escrow: EscrowHolding,
        transaction: Transaction,
    },
    Refunded {
        escrow: EscrowHolding,
        transaction: Transaction,
    },
    /// Already RELEASED or REFUNDED by an earlier call
    AlreadyResolved(EscrowHolding),
    /// The booking was never paid
    NotFound,
}

impl EscrowOutcome {
    /// Whether this call moved money
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            EscrowOutcome::Released { .. } | EscrowOutcome::Refunded { .. }
        )
    }
}

/// Result of [`WalletService::top_up`]
#[derive(Debug, Clone, PartialEq)]
pub enum TopUpOutcome {
    Credited(Transaction),
    /// The gateway transaction was already credited
    Duplicate(Transaction),
}

impl TopUpOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            TopUpOutcome::Credited(t) | TopUpOutcome::Duplicate(t) => t,
        }
    }
}

/// Largest amount a single operation may move (10^15)
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xA4C6_8000, 0x0003_8D7E, 0, false, 0);

/// Exclusive ceiling of any wallet figure, the capacity of a NUMERIC(20, 2)
/// column (10^18)
const BALANCE_CEILING: Decimal = Decimal::from_parts(0xA764_0000, 0x0DE0_B6B3, 0, false, 0);

fn ensure_positive(amount: Decimal) -> WalletResult<()> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    ensure_within_limit(amount)
}

fn ensure_within_limit(amount: Decimal) -> WalletResult<()> {
    if amount > MAX_AMOUNT {
        return Err(WalletError::InvalidAmount(format!(
            "amount must not exceed {MAX_AMOUNT}, got {amount}"
        )));
    }
    Ok(())
}

fn credit(value: Decimal, amount: Decimal) -> WalletResult<Decimal> {
    value
        .checked_add(amount)
        .filter(|total| *total < BALANCE_CEILING)
        .ok_or_else(|| {
            WalletError::InvalidAmount(format!("{value} + {amount} exceeds the wallet limit"))
        })
}

fn debit(value: Decimal, amount: Decimal) -> WalletResult<Decimal> {
    value
        .checked_sub(amount)
        .ok_or_else(|| WalletError::InvalidAmount(format!("{value} - {amount} is out of range")))
}

fn validate_bank_info(info: &BankInfo) -> WalletResult<()> {
    match info.missing_field() {
        Some(field) => Err(WalletError::InvalidBankInfo(format!(
            "{field} must not be empty"
        ))),
        None => Ok(()),
    }
}

fn mask_account(account_no: &str) -> String {
    let chars: Vec<char> = account_no.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("****{tail}")
}

/// Completed entry with no fee, description or gateway fields
fn entry(
    wallet: &Wallet,
    booking_id: Option<BookingId>,
    transaction_type: TransactionType,
    amount: Decimal,
    balance_before: Decimal,
) -> NewTransaction {
    NewTransaction {
        transaction_code: generate_transaction_code(transaction_type),
        wallet_id: wallet.id,
        booking_id,
        transaction_type,
        amount,
        fee: Decimal::ZERO,
        status: TransactionStatus::Completed,
        balance_before,
        balance_after: wallet.balance,
        description: None,
        payment_method: None,
        external_tx_id: None,
    }
}

async fn lock_existing(tx: &mut dyn LedgerTx, user_id: UserId) -> WalletResult<Wallet> {
    tx.lock_wallet(WalletKey::User(user_id))
        .await?
        .ok_or(WalletError::WalletNotFound(user_id))
}

/// Answer a repeated payment from the booking's existing holding
///
/// Only a HELD holding stands in for a new payment. A resolved one means the
/// money already went back to the payer or on to the payee.
fn existing_hold(existing: EscrowHolding) -> WalletResult<HoldOutcome> {
    if existing.status != EscrowStatus::Held {
        log::warn!(
            "Booking {} has a {} escrow; refusing to pay again",
            existing.booking_id,
            existing.status
        );
        return Err(WalletError::EscrowClosed {
            booking_id: existing.booking_id,
            status: existing.status,
        });
    }
    log::warn!(
        "Booking {} already has a HELD escrow; not charging again",
        existing.booking_id
    );
    Ok(HoldOutcome::AlreadyHeld(existing))
}

/// Take a resolved holding's total back out of the payer's pending balance
fn clear_pending(payer: &mut Wallet, escrow: &EscrowHolding) -> WalletResult<()> {
    if payer.pending_balance < escrow.total_amount {
        return Err(WalletError::InvariantViolation(format!(
            "wallet {} has pending {} but escrow for booking {} holds {}",
            payer.id, payer.pending_balance, escrow.booking_id, escrow.total_amount
        )));
    }
    payer.pending_balance = debit(payer.pending_balance, escrow.total_amount)?;
    Ok(())
}

/// Wallet service
#[derive(Clone)]
pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    notifier: Notifier,
    config: WalletConfig,
}

impl WalletService {
    /// Create a new wallet service
    ///
    /// # Arguments
    ///
    /// * `store` - Ledger store backend
    /// * `notifier` - Post-commit notification dispatcher
    /// * `config` - Timeouts
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Notifier, config: WalletConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Run `operation` inside one atomic unit
    ///
    /// The unit commits only if `operation` returns `Ok` within the configured
    /// transaction timeout. Otherwise it is dropped and rolled back.
    ///
    /// ```ignore
    /// let wallet = service
    ///     .atomic(move |tx| Box::pin(async move { tx.lock_or_create_wallet(user_id).await }))
    ///     .await?;
    /// ```
    pub async fn atomic<T, F>(&self, operation: F) -> WalletResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn LedgerTx) -> BoxFuture<'t, WalletResult<T>> + Send,
    {
        let store = self.store.clone();
        with_timeout(self.config.transaction_timeout, async move {
            let mut tx = store.begin().await?;
            let value = operation(tx.as_mut()).await?;
            tx.commit().await?;
            Ok(value)
        })
        .await
    }

    /// Debit the payer and hold the funds in escrow for a booking
    ///
    /// # Arguments
    ///
    /// * `payer_id` - Customer paying for the booking
    /// * `payee_id` - Partner who will receive `subtotal` on release
    /// * `subtotal` - Service amount owed to the partner
    /// * `fee` - Platform fee, already rounded
    /// * `booking_id` - Booking being paid
    ///
    /// # Errors
    ///
    /// * `WalletError::InsufficientBalance` - Balance below `subtotal + fee`
    /// * `WalletError::InvalidAmount` - Non-positive subtotal, negative fee, or
    ///   either above [`MAX_AMOUNT`]
    /// * `WalletError::EscrowClosed` - The booking's holding was already
    ///   released or refunded
    pub async fn pay_and_hold_escrow(
        &self,
        payer_id: UserId,
        payee_id: UserId,
        subtotal: Decimal,
        fee: Decimal,
        booking_id: BookingId,
    ) -> WalletResult<HoldOutcome> {
        ensure_positive(subtotal)?;
        if fee < Decimal::ZERO {
            return Err(WalletError::InvalidAmount(format!(
                "fee must not be negative, got {fee}"
            )));
        }
        ensure_within_limit(fee)?;

        if let Some(existing) = self.store.find_escrow(booking_id).await? {
            return existing_hold(existing);
        }

        let result = self
            .atomic(move |tx| {
                Box::pin(async move {
                    let total = credit(subtotal, fee)?;
                    let mut payer = tx.lock_or_create_wallet(payer_id).await?;
                    if payer.balance < total {
                        return Err(WalletError::InsufficientBalance {
                            available: payer.balance,
                            required: total,
                        });
                    }

                    let escrow = EscrowManager::hold(
                        tx,
                        NewEscrowHolding {
                            booking_id,
                            payer_id,
                            payee_id,
                            amount: subtotal,
                            platform_fee: fee,
                        },
                    )
                    .await?;

                    let balance_before = payer.balance;
                    payer.balance = debit(payer.balance, total)?;
                    payer.pending_balance = credit(payer.pending_balance, total)?;
                    payer.total_spent = credit(payer.total_spent, total)?;
                    tx.save_wallet(&payer).await?;

                    let transaction = tx
                        .append_transaction(NewTransaction {
                            fee,
                            description: Some(format!("Payment held for booking {booking_id}")),
                            payment_method: Some("wallet".to_string()),
                            ..entry(
                                &payer,
                                Some(booking_id),
                                TransactionType::EscrowHold,
                                total,
                                balance_before,
                            )
                        })
                        .await?;

                    Ok::<_, WalletError>(HoldOutcome::Held {
                        escrow,
                        transaction,
                    })
                })
            })
            .await;

        match result {
            Ok(HoldOutcome::Held {
                escrow,
                transaction,
            }) => {
                log::info!(
                    "Held {} for booking {booking_id} from wallet {} ({})",
                    escrow.total_amount,
                    transaction.wallet_id,
                    transaction.transaction_code
                );
                self.notifier.dispatch(
                    payer_id,
                    NotificationKind::PaymentHeld,
                    json!({
                        "booking_id": booking_id,
                        "amount": escrow.total_amount,
                        "transaction_code": transaction.transaction_code,
                    }),
                );
                Ok(HoldOutcome::Held {
                    escrow,
                    transaction,
                })
            }
            Ok(outcome) => Ok(outcome),
            // Another unit inserted the holding between our check and insert.
            Err(WalletError::AlreadyHeld(_)) => match self.store.find_escrow(booking_id).await? {
                Some(existing) => existing_hold(existing),
                None => Err(WalletError::AlreadyHeld(booking_id)),
            },
            Err(e) => Err(e),
        }
    }

    /// Pay out a booking's held funds to the payee
    ///
    /// A booking with no HELD escrow is a logged no-op.
    pub async fn release_escrow(&self, booking_id: BookingId) -> WalletResult<EscrowOutcome> {
        let outcome = self
            .atomic(move |tx| {
                Box::pin(async move {
                    let escrow = match EscrowManager::release(tx, booking_id).await? {
                        EscrowResolution::Resolved(escrow) => escrow,
                        EscrowResolution::AlreadyResolved(escrow) => {
                            return Ok(EscrowOutcome::AlreadyResolved(escrow));
                        }
                        EscrowResolution::NotFound => return Ok(EscrowOutcome::NotFound),
                    };

                    // Wallets are locked in user id order: the payer of one
                    // booking can be the payee of another.
                    if escrow.payee_id < escrow.payer_id {
                        tx.lock_or_create_wallet(escrow.payee_id).await?;
                    }
                    let mut payer = lock_existing(tx, escrow.payer_id).await?;
                    clear_pending(&mut payer, &escrow)?;
                    tx.save_wallet(&payer).await?;

                    let mut payee = tx.lock_or_create_wallet(escrow.payee_id).await?;
                    let balance_before = payee.balance;
                    payee.balance = credit(payee.balance, escrow.amount)?;
                    payee.total_earnings = credit(payee.total_earnings, escrow.amount)?;
                    tx.save_wallet(&payee).await?;

                    let transaction = tx
                        .append_transaction(NewTransaction {
                            fee: escrow.platform_fee,
                            description: Some(format!("Earnings for booking {booking_id}")),
                            ..entry(
                                &payee,
                                Some(booking_id),
                                TransactionType::EscrowRelease,
                                escrow.amount,
                                balance_before,
                            )
                        })
                        .await?;

                    Ok::<_, WalletError>(EscrowOutcome::Released {
                        escrow,
                        transaction,
                    })
                })
            })
            .await?;

        if let EscrowOutcome::Released {
            escrow,
            transaction,
        } = &outcome
        {
            log::info!(
                "Released {} for booking {booking_id} to {} (fee {})",
                escrow.amount,
                escrow.payee_id,
                escrow.platform_fee
            );
            self.notifier.dispatch(
                escrow.payee_id,
                NotificationKind::EarningsReleased,
                json!({
                    "booking_id": booking_id,
                    "amount": escrow.amount,
                    "transaction_code": transaction.transaction_code,
                }),
            );
        }
        Ok(outcome)
    }

    /// Return a booking's held funds to the payer
    ///
    /// A booking with no HELD escrow is a logged no-op.
    pub async fn refund_escrow(&self, booking_id: BookingId) -> WalletResult<EscrowOutcome> {
        let outcome = self
            .atomic(move |tx| {
                Box::pin(async move {
                    let escrow = match EscrowManager::refund(tx, booking_id).await? {
                        EscrowResolution::Resolved(escrow) => escrow,
                        EscrowResolution::AlreadyResolved(escrow) => {
                            return Ok(EscrowOutcome::AlreadyResolved(escrow));
                        }
                        EscrowResolution::NotFound => return Ok(EscrowOutcome::NotFound),
                    };

                    let mut payer = lock_existing(tx, escrow.payer_id).await?;
                    clear_pending(&mut payer, &escrow)?;
                    let balance_before = payer.balance;
                    payer.balance = credit(payer.balance, escrow.total_amount)?;
                    payer.total_spent = debit(payer.total_spent, escrow.total_amount)?;
                    tx.save_wallet(&payer).await?;

                    let transaction = tx
                        .append_transaction(NewTransaction {
                            description: Some(format!("Refund for booking {booking_id}")),
                            ..entry(
                                &payer,
                                Some(booking_id),
                                TransactionType::EscrowRefund,
                                escrow.total_amount,
                                balance_before,
                            )
                        })
                        .await?;

                    Ok::<_, WalletError>(EscrowOutcome::Refunded {
                        escrow,
                        transaction,
                    })
                })
            })
            .await?;

        if let EscrowOutcome::Refunded {
            escrow,
            transaction,
        } = &outcome
        {
            log::info!(
                "Refunded {} for booking {booking_id} to {}",
                escrow.total_amount,
                escrow.payer_id
            );
            self.notifier.dispatch(
                escrow.payer_id,
                NotificationKind::RefundIssued,
                json!({
                    "booking_id": booking_id,
                    "amount": escrow.total_amount,
                    "transaction_code": transaction.transaction_code,
                }),
            );
        }
        Ok(outcome)
    }

    /// Debit the wallet and record a PENDING withdrawal
    ///
    /// Bank details passed here are saved on the wallet; otherwise the ones
    /// on file are used.
    ///
    /// # Errors
    ///
    /// * `WalletError::InsufficientBalance` - Balance below `amount`
    /// * `WalletError::BankInfoRequired` - No bank details given or on file
    /// * `WalletError::WalletNotFound` - User has no wallet
    pub async fn request_withdraw(
        &self,
        user_id: UserId,
        amount: Decimal,
        bank_info: Option<BankInfo>,
    ) -> WalletResult<Transaction> {
        ensure_positive(amount)?;
        if let Some(info) = &bank_info {
            validate_bank_info(info)?;
        }

        let transaction = self
            .atomic(move |tx| {
                Box::pin(async move {
                    let mut wallet = lock_existing(tx, user_id).await?;
                    if wallet.balance < amount {
                        return Err(WalletError::InsufficientBalance {
                            available: wallet.balance,
                            required: amount,
                        });
                    }

                    if let Some(info) = &bank_info {
                        wallet.set_bank_info(info);
                    }
                    let bank = wallet.bank_info().ok_or(WalletError::BankInfoRequired)?;

                    let balance_before = wallet.balance;
                    wallet.balance = debit(wallet.balance, amount)?;
                    tx.save_wallet(&wallet).await?;

                    tx.append_transaction(NewTransaction {
                        status: TransactionStatus::Pending,
                        description: Some(format!(
                            "Withdrawal to {} {}",
                            bank.bank_name,
                            mask_account(&bank.account_no)
                        )),
                        payment_method: Some("bank_transfer".to_string()),
                        ..entry(
                            &wallet,
                            None,
                            TransactionType::Withdrawal,
                            amount,
                            balance_before,
                        )
                    })
                    .await
                })
            })
            .await?;

        log::info!(
            "Withdrawal {} of {amount} requested by {user_id}",
            transaction.transaction_code
        );
        self.notifier.dispatch(
            user_id,
            NotificationKind::WithdrawalRequested,
            json!({
                "amount": amount,
                "transaction_code": transaction.transaction_code,
            }),
        );
        Ok(transaction)
    }

    /// Credit a confirmed gateway payment
    ///
    /// Repeating a call with the same `external_tx_id` returns the original
    /// deposit without crediting again.
    pub async fn top_up(
        &self,
        user_id: UserId,
        amount: Decimal,
        payment_method: &str,
        external_tx_id: Option<String>,
    ) -> WalletResult<TopUpOutcome> {
        ensure_positive(amount)?;
        let payment_method = payment_method.to_string();
        let external_tx_id = external_tx_id.filter(|id| !id.trim().is_empty());

        let outcome = self
            .atomic(move |tx| {
                Box::pin(async move {
                    let mut wallet = tx.lock_or_create_wallet(user_id).await?;

                    if let Some(external) = &external_tx_id {
                        if let Some(existing) = tx.find_deposit_by_external_id(external).await? {
                            if existing.wallet_id != wallet.id {
                                return Err(WalletError::DuplicateTransactionCode(format!(
                                    "deposit {external}"
                                )));
                            }
                            return Ok(TopUpOutcome::Duplicate(existing));
                        }
                    }

                    let balance_before = wallet.balance;
                    wallet.balance = credit(wallet.balance, amount)?;
                    tx.save_wallet(&wallet).await?;

                    let transaction = tx
                        .append_transaction(NewTransaction {
                            description: Some(format!("Top-up via {payment_method}")),
                            payment_method: Some(payment_method.clone()),
                            external_tx_id: external_tx_id.clone(),
                            ..entry(
                                &wallet,
                                None,
                                TransactionType::Deposit,
                                amount,
                                balance_before,
                            )
                        })
                        .await?;
                    Ok::<_, WalletError>(TopUpOutcome::Credited(transaction))
                })
            })
            .await?;

        match &outcome {
            TopUpOutcome::Credited(transaction) => {
                log::info!(
                    "Top-up {} of {amount} credited to {user_id}",
                    transaction.transaction_code
                );
                self.notifier.dispatch(
                    user_id,
                    NotificationKind::TopUpCompleted,
                    json!({
                        "amount": amount,
                        "transaction_code": transaction.transaction_code,
                    }),
                );
            }
            TopUpOutcome::Duplicate(transaction) => {
                log::warn!(
                    "Top-up for {user_id} repeats gateway transaction {:?}; returning {}",
                    transaction.external_tx_id,
                    transaction.transaction_code
                );
            }
        }
        Ok(outcome)
    }

    /// Replace the bank details on file
    pub async fn update_bank_info(&self, user_id: UserId, info: BankInfo) -> WalletResult<Wallet> {
        validate_bank_info(&info)?;
        self.atomic(move |tx| {
            Box::pin(async move {
                let mut wallet = tx.lock_or_create_wallet(user_id).await?;
                wallet.set_bank_info(&info);
                tx.save_wallet(&wallet).await?;
                Ok::<_, WalletError>(wallet)
            })
        })
        .await
    }

    /// Return the user's wallet, creating an empty one if needed
    pub async fn get_or_create_wallet(&self, user_id: UserId) -> WalletResult<Wallet> {
        self.store.get_or_create_wallet(user_id).await
    }

    /// Get a user's wallet
    ///
    /// # Errors
    ///
    /// * `WalletError::WalletNotFound` - User has no wallet yet
    pub async fn get_wallet(&self, user_id: UserId) -> WalletResult<Wallet> {
        self.store
            .find_wallet(user_id)
            .await?
            .ok_or(WalletError::WalletNotFound(user_id))
    }

    /// Page through a user's transactions, newest first
    pub async fn list_transactions(
        &self,
        user_id: UserId,
        page: u32,
        limit: u32,
    ) -> WalletResult<TransactionPage> {
        self.store.list_transactions(user_id, page, limit).await
    }

    /// Get a booking's escrow holding, if it was ever paid
    pub async fn get_escrow(&self, booking_id: BookingId) -> WalletResult<Option<EscrowHolding>> {
        self.store.find_escrow(booking_id).await
    }

    /// Check that the ledger store is reachable
    pub async fn health_check(&self) -> WalletResult<()> {
        self.store.health_check().await
    }
}

impl std::fmt::Debug for WalletService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedgerStore;
    use crate::notify::MemoryNotificationSink;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn service() -> (WalletService, Arc<MemoryLedgerStore>) {
        let store = Arc::new(MemoryLedgerStore::new("VND"));
        let service = WalletService::new(store.clone(), Notifier::default(), WalletConfig::default());
        (service, store)
    }

    fn bank() -> BankInfo {
        BankInfo {
            bank_name: "Vietcombank".to_string(),
            account_no: "0123456789".to_string(),
            account_name: "NGUYEN VAN A".to_string(),
        }
    }

    #[test]
    fn test_mask_account() {
        assert_eq!(mask_account("0123456789"), "****6789");
        assert_eq!(mask_account("12"), "****12");
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amounts() {
        let (service, _) = service();
        let user = Uuid::new_v4();

        let err = service.top_up(user, dec!(0), "momo", None).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));

        let err = service
            .pay_and_hold_escrow(user, Uuid::new_v4(), dec!(100), dec!(-1), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));

        let err = service
            .request_withdraw(user, dec!(-5), Some(bank()))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
    }

    #[test]
    fn test_credit_and_debit_never_overflow() {
        assert!(matches!(
            credit(Decimal::MAX, Decimal::ONE),
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(matches!(
            credit(BALANCE_CEILING - Decimal::ONE, Decimal::ONE),
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(matches!(
            debit(Decimal::MIN, Decimal::ONE),
            Err(WalletError::InvalidAmount(_))
        ));
        assert_eq!(credit(dec!(10), dec!(5)).unwrap(), dec!(15));
        assert_eq!(debit(dec!(10), dec!(5)).unwrap(), dec!(5));
    }

    #[tokio::test]
    async fn test_rejects_amounts_above_limit() {
        let (service, store) = service();
        let user = Uuid::new_v4();

        let err = service
            .top_up(user, Decimal::MAX, "momo", None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));

        service.top_up(user, MAX_AMOUNT, "momo", None).await.unwrap();
        service.top_up(user, dec!(1), "momo", None).await.unwrap();
        assert_eq!(
            service.get_wallet(user).await.unwrap().balance,
            MAX_AMOUNT + dec!(1)
        );

        let err = service
            .pay_and_hold_escrow(user, Uuid::new_v4(), dec!(100), Decimal::MAX, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
        assert_eq!(store.transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_withdraw_requires_bank_info() {
        let (service, store) = service();
        let user = Uuid::new_v4();
        service.top_up(user, dec!(1000), "momo", None).await.unwrap();

        let err = service
            .request_withdraw(user, dec!(100), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::BankInfoRequired));
        assert_eq!(service.get_wallet(user).await.unwrap().balance, dec!(1000));
        assert_eq!(store.transactions().len(), 1);

        let blank = BankInfo {
            account_no: "  ".to_string(),
            ..bank()
        };
        let err = service
            .request_withdraw(user, dec!(100), Some(blank))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidBankInfo(_)));
    }

    #[tokio::test]
    async fn test_withdraw_persists_bank_info_and_stays_pending() {
        let (service, _) = service();
        let user = Uuid::new_v4();
        service.top_up(user, dec!(1000), "momo", None).await.unwrap();

        let tx = service
            .request_withdraw(user, dec!(400), Some(bank()))
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.transaction_code.starts_with("WD-"));
        assert_eq!(tx.balance_before, dec!(1000));
        assert_eq!(tx.balance_after, dec!(600));
        assert!(tx.description.unwrap().ends_with("****6789"));

        let wallet = service.get_wallet(user).await.unwrap();
        assert_eq!(wallet.bank_info(), Some(bank()));

        // Details on file are reused.
        service.request_withdraw(user, dec!(100), None).await.unwrap();
        assert_eq!(service.get_wallet(user).await.unwrap().balance, dec!(500));
    }

    #[tokio::test]
    async fn test_withdraw_without_wallet() {
        let (service, _) = service();
        let user = Uuid::new_v4();
        let err = service
            .request_withdraw(user, dec!(1), Some(bank()))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::WalletNotFound(u) if u == user));
    }

    #[tokio::test]
    async fn test_atomic_timeout_rolls_back() {
        let store = Arc::new(MemoryLedgerStore::default());
        let service = WalletService::new(
            store.clone(),
            Notifier::default(),
            WalletConfig {
                transaction_timeout: Duration::from_millis(50),
            },
        );
        let user = Uuid::new_v4();

        let err = service
            .atomic(move |tx| {
                Box::pin(async move {
                    let mut wallet = tx.lock_or_create_wallet(user).await?;
                    wallet.balance = dec!(999);
                    tx.save_wallet(&wallet).await?;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, WalletError>(())
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WalletError::Timeout(_)));
        assert!(store.wallets().is_empty());
    }

    #[tokio::test]
    async fn test_update_bank_info_creates_wallet() {
        let (service, _) = service();
        let user = Uuid::new_v4();
        let wallet = service.update_bank_info(user, bank()).await.unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(
            service.get_wallet(user).await.unwrap().bank_info(),
            Some(bank())
        );
    }

    #[tokio::test]
    async fn test_top_up_notifies_after_commit() {
        let store = Arc::new(MemoryLedgerStore::default());
        let sink = Arc::new(MemoryNotificationSink::new());
        let service = WalletService::new(
            store,
            Notifier::new(sink.clone()),
            WalletConfig::default(),
        );
        let user = Uuid::new_v4();

        service
            .top_up(user, dec!(250000), "vnpay", Some("VNP-1".to_string()))
            .await
            .unwrap();
        assert!(sink.wait_for(1, Duration::from_secs(1)).await);
        assert_eq!(sink.sent_to(user)[0].kind, NotificationKind::TopUpCompleted);
    }
}
