//! Integration tests for the booking state machine driving the wallet service.

#![allow(clippy::unreadable_literal)]

use chrono::{Duration, Utc};
use async_trait::async_trait;
use companion_ledger::booking::{
    Actor, Booking, BookingError, BookingPolicy, BookingRepository, BookingResult,
    BookingStateMachine, BookingStatus, DisputeResolution, MemoryBookingRepository,
    SettlementOutcome, StatusChange,
};
use companion_ledger::ledger::{EscrowStatus, MemoryLedgerStore};
use companion_ledger::notify::{MemoryNotificationSink, NotificationKind, Notifier};
use companion_ledger::settings::{self, MapSettingsStore};
use companion_ledger::wallet::{WalletConfig, WalletError, WalletService};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

struct Harness {
    machine: BookingStateMachine,
    wallets: WalletService,
    sink: Arc<MemoryNotificationSink>,
    customer: Uuid,
    partner: Uuid,
}

/// Bookings whose first change to PAID fails with a store error
#[derive(Default)]
struct FlakyPaidRepository {
    inner: MemoryBookingRepository,
    failed: AtomicBool,
}

#[async_trait]
impl BookingRepository for FlakyPaidRepository {
    async fn insert(&self, booking: &Booking) -> BookingResult<()> {
        self.inner.insert(booking).await
    }

    async fn find(&self, id: Uuid) -> BookingResult<Option<Booking>> {
        self.inner.find(id).await
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: BookingStatus,
        change: StatusChange,
    ) -> BookingResult<Option<Booking>> {
        if change.to == BookingStatus::Paid && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(BookingError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.transition(id, expected, change).await
    }
}

async fn harness(customer_funds: Decimal) -> Harness {
    harness_with(customer_funds, Arc::new(MemoryBookingRepository::new())).await
}

async fn harness_with(customer_funds: Decimal, bookings: Arc<dyn BookingRepository>) -> Harness {
    let sink = Arc::new(MemoryNotificationSink::new());
    let notifier = Notifier::new(sink.clone());
    let wallets = WalletService::new(
        Arc::new(MemoryLedgerStore::new("VND")),
        notifier.clone(),
        WalletConfig::default(),
    );
    let settings = MapSettingsStore::new()
        .with(settings::SERVICE_FEE_PERCENT, "15")
        .with(settings::CANCELLATION_HOURS, "24");
    let machine = BookingStateMachine::new(
        bookings,
        wallets.clone(),
        Arc::new(settings),
        notifier,
        BookingPolicy::default(),
    );

    let customer = Uuid::new_v4();
    let partner = Uuid::new_v4();
    if customer_funds > Decimal::ZERO {
        wallets
            .top_up(customer, customer_funds, "momo", None)
            .await
            .unwrap();
    }
    Harness {
        machine,
        wallets,
        sink,
        customer,
        partner,
    }
}

impl Harness {
    async fn confirmed_booking(&self, start_in: Duration) -> Uuid {
        let booking = self
            .machine
            .create_booking(
                self.customer,
                self.partner,
                dec!(300000),
                Utc::now() + start_in,
            )
            .await
            .unwrap();
        self.machine
            .confirm(booking.id, Actor::User(self.partner))
            .await
            .unwrap();
        booking.id
    }

    /// Wait for a notification of `kind` to reach `user`
    async fn notified(&self, user: Uuid, kind: NotificationKind) -> bool {
        let poll = async {
            while !self.sink.sent_to(user).iter().any(|n| n.kind == kind) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(1), poll)
            .await
            .is_ok()
    }

    async fn paid_booking(&self, start_in: Duration) -> Uuid {
        let id = self.confirmed_booking(start_in).await;
        self.machine
            .pay(id, Actor::User(self.customer))
            .await
            .unwrap();
        id
    }
}

#[tokio::test]
async fn test_happy_path_pays_partner() {
    let h = harness(dec!(1000000)).await;
    let id = h.confirmed_booking(Duration::days(3)).await;

    let paid = h.machine.pay(id, Actor::User(h.customer)).await.unwrap();
    assert_eq!(paid.booking.status, BookingStatus::Paid);
    assert!(paid.booking.paid_at.is_some());
    assert!(matches!(paid.settlement, SettlementOutcome::Settled { .. }));

    let customer = h.wallets.get_wallet(h.customer).await.unwrap();
    assert_eq!(customer.balance, dec!(655000));
    assert_eq!(customer.pending_balance, dec!(345000));

    let started = h.machine.start(id, Actor::User(h.partner)).await.unwrap();
    assert_eq!(started.booking.status, BookingStatus::InProgress);

    let done = h.machine.complete(id, Actor::User(h.customer)).await.unwrap();
    assert_eq!(done.booking.status, BookingStatus::Completed);
    let SettlementOutcome::Settled { transaction } = &done.settlement else {
        panic!("expected settlement, got {:?}", done.settlement);
    };
    assert!(transaction.transaction_code.starts_with("EARN-"));

    assert_eq!(
        h.wallets.get_wallet(h.partner).await.unwrap().balance,
        dec!(300000)
    );
    assert_eq!(
        h.wallets.get_wallet(h.customer).await.unwrap().pending_balance,
        Decimal::ZERO
    );
}

#[tokio::test]
async fn test_pay_without_funds_stays_confirmed() {
    let h = harness(dec!(100000)).await;
    let id = h.confirmed_booking(Duration::days(3)).await;

    let err = h.machine.pay(id, Actor::User(h.customer)).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::Wallet(WalletError::InsufficientBalance { .. })
    ));
    assert!(err.client_message().contains("top up"));

    let booking = h.machine.get_booking(id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert!(h.wallets.get_escrow(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_only_customer_pays_and_completes() {
    let h = harness(dec!(1000000)).await;
    let id = h.confirmed_booking(Duration::days(3)).await;

    let err = h.machine.pay(id, Actor::User(h.partner)).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    h.machine.pay(id, Actor::User(h.customer)).await.unwrap();
    let err = h.machine.complete(id, Actor::User(h.partner)).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    let stranger = Uuid::new_v4();
    let err = h.machine.start(id, Actor::User(stranger)).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));
}

#[tokio::test]
async fn test_cancel_paid_booking_refunds() {
    let h = harness(dec!(1000000)).await;
    let id = h.paid_booking(Duration::days(3)).await;

    let cancelled = h
        .machine
        .cancel(id, Actor::User(h.customer), Some("plans changed".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.booking.cancelled_by, Some(h.customer));
    assert!(matches!(cancelled.settlement, SettlementOutcome::Settled { .. }));

    let customer = h.wallets.get_wallet(h.customer).await.unwrap();
    assert_eq!(customer.balance, dec!(1000000));
    assert_eq!(customer.pending_balance, Decimal::ZERO);
    assert_eq!(
        h.wallets.get_escrow(id).await.unwrap().unwrap().status,
        EscrowStatus::Refunded
    );

    assert!(h.notified(h.partner, NotificationKind::BookingCancelled).await);
    assert!(h.notified(h.partner, NotificationKind::BookingRequested).await);
    assert!(h.notified(h.customer, NotificationKind::RefundIssued).await);
}

#[tokio::test]
async fn test_cancel_unpaid_booking_moves_no_money() {
    let h = harness(dec!(1000000)).await;
    let id = h.confirmed_booking(Duration::days(3)).await;

    let cancelled = h
        .machine
        .cancel(id, Actor::User(h.partner), None)
        .await
        .unwrap();
    assert_eq!(cancelled.settlement, SettlementOutcome::NotRequired);
    assert_eq!(
        h.wallets.get_wallet(h.customer).await.unwrap().balance,
        dec!(1000000)
    );
}

#[tokio::test]
async fn test_late_cancel_blocked_unless_admin() {
    let h = harness(dec!(1000000)).await;
    let id = h.paid_booking(Duration::hours(5)).await;

    let err = h
        .machine
        .cancel(id, Actor::User(h.customer), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::CancellationWindow { .. }));
    assert_eq!(
        h.machine.get_booking(id).await.unwrap().status,
        BookingStatus::Paid
    );

    let forced = h.machine.cancel(id, Actor::Admin, None).await.unwrap();
    assert_eq!(forced.booking.status, BookingStatus::Cancelled);
    assert!(matches!(forced.settlement, SettlementOutcome::Settled { .. }));
    assert_eq!(
        h.wallets.get_wallet(h.customer).await.unwrap().balance,
        dec!(1000000)
    );
}

#[tokio::test]
async fn test_in_progress_booking_cannot_be_cancelled() {
    let h = harness(dec!(1000000)).await;
    let id = h.paid_booking(Duration::days(3)).await;
    h.machine.start(id, Actor::User(h.customer)).await.unwrap();

    let err = h.machine.cancel(id, Actor::Admin, None).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::InvalidTransition {
            from: BookingStatus::InProgress,
            to: BookingStatus::Cancelled
        }
    ));
}

#[tokio::test]
async fn test_complete_twice_credits_once() {
    let h = harness(dec!(1000000)).await;
    let id = h.paid_booking(Duration::days(3)).await;

    h.machine.complete(id, Actor::User(h.customer)).await.unwrap();
    let err = h
        .machine
        .complete(id, Actor::User(h.customer))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));

    assert_eq!(
        h.wallets.get_wallet(h.partner).await.unwrap().balance,
        dec!(300000)
    );
}

#[tokio::test]
async fn test_dispute_resolved_for_partner() {
    let h = harness(dec!(1000000)).await;
    let id = h.paid_booking(Duration::days(3)).await;

    let disputed = h
        .machine
        .dispute(id, Actor::User(h.customer), Some("no show".to_string()))
        .await
        .unwrap();
    assert_eq!(disputed.booking.status, BookingStatus::Disputed);

    // Disputed bookings only leave through resolution.
    let err = h.machine.complete(id, Actor::User(h.customer)).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));
    let err = h.machine.cancel(id, Actor::Admin, None).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));

    let resolved = h
        .machine
        .resolve(id, Actor::Admin, DisputeResolution::Complete)
        .await
        .unwrap();
    assert_eq!(resolved.booking.status, BookingStatus::Completed);
    assert!(matches!(resolved.settlement, SettlementOutcome::Settled { .. }));
    assert_eq!(
        h.wallets.get_wallet(h.partner).await.unwrap().balance,
        dec!(300000)
    );
}

#[tokio::test]
async fn test_dispute_resolved_for_customer() {
    let h = harness(dec!(1000000)).await;
    let id = h.paid_booking(Duration::days(3)).await;
    h.machine.start(id, Actor::User(h.partner)).await.unwrap();
    h.machine
        .dispute(id, Actor::User(h.partner), None)
        .await
        .unwrap();

    let resolved = h
        .machine
        .resolve(id, Actor::Admin, DisputeResolution::Cancel)
        .await
        .unwrap();
    assert_eq!(resolved.booking.status, BookingStatus::Cancelled);
    assert_eq!(resolved.booking.cancelled_by, None);
    assert_eq!(
        h.wallets.get_wallet(h.customer).await.unwrap().balance,
        dec!(1000000)
    );
}

#[tokio::test]
async fn test_concurrent_pay_charges_once() {
    let h = harness(dec!(1000000)).await;
    let id = h.confirmed_booking(Duration::days(3)).await;

    let first = h.machine.clone();
    let second = h.machine.clone();
    let customer = h.customer;
    let a = tokio::spawn(async move { first.pay(id, Actor::User(customer)).await });
    let b = tokio::spawn(async move { second.pay(id, Actor::User(customer)).await });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert!(succeeded >= 1);
    assert_eq!(
        h.machine.get_booking(id).await.unwrap().status,
        BookingStatus::Paid
    );
    let customer = h.wallets.get_wallet(h.customer).await.unwrap();
    assert_eq!(customer.balance, dec!(655000));
    assert_eq!(customer.pending_balance, dec!(345000));
}

#[tokio::test]
async fn test_pay_retry_after_store_error_keeps_hold() {
    let h = harness_with(dec!(1000000), Arc::new(FlakyPaidRepository::default())).await;
    let id = h.confirmed_booking(Duration::days(3)).await;

    let err = h.machine.pay(id, Actor::User(h.customer)).await.unwrap_err();
    assert!(matches!(err, BookingError::Database(_)));
    assert_eq!(
        h.machine.get_booking(id).await.unwrap().status,
        BookingStatus::Confirmed
    );
    let escrow = h.wallets.get_escrow(id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Held);

    let paid = h.machine.pay(id, Actor::User(h.customer)).await.unwrap();
    assert_eq!(paid.booking.status, BookingStatus::Paid);
    assert_eq!(paid.settlement, SettlementOutcome::AlreadySettled);
    let customer = h.wallets.get_wallet(h.customer).await.unwrap();
    assert_eq!(customer.balance, dec!(655000));
    assert_eq!(customer.pending_balance, dec!(345000));

    let completed = h.machine.complete(id, Actor::User(h.customer)).await.unwrap();
    assert!(matches!(completed.settlement, SettlementOutcome::Settled { .. }));
    assert_eq!(
        h.wallets.get_wallet(h.partner).await.unwrap().balance,
        dec!(300000)
    );
}

#[tokio::test]
async fn test_cancel_refunds_hold_left_by_failed_pay() {
    let h = harness_with(dec!(1000000), Arc::new(FlakyPaidRepository::default())).await;
    let id = h.confirmed_booking(Duration::days(3)).await;
    h.machine.pay(id, Actor::User(h.customer)).await.unwrap_err();

    let cancelled = h
        .machine
        .cancel(id, Actor::User(h.customer), None)
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    assert!(matches!(cancelled.settlement, SettlementOutcome::Settled { .. }));

    let customer = h.wallets.get_wallet(h.customer).await.unwrap();
    assert_eq!(customer.balance, dec!(1000000));
    assert_eq!(customer.pending_balance, Decimal::ZERO);
    assert_eq!(
        h.wallets.get_escrow(id).await.unwrap().unwrap().status,
        EscrowStatus::Refunded
    );
}
