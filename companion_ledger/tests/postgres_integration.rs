//! End-to-end tests against PostgreSQL.
//!
//! These need a database at `DATABASE_URL` and are ignored by default:
//!
//! ```text
//! DATABASE_URL=postgres://postgres@localhost/companion_ledger_test \
//!     cargo test --test postgres_integration -- --ignored
//! ```

#![allow(clippy::unreadable_literal)]

use chrono::{Duration as ChronoDuration, Utc};
use companion_ledger::booking::{
    Actor, BookingPolicy, BookingStateMachine, BookingStatus, PgBookingRepository,
    SettlementOutcome,
};
use companion_ledger::db::{Database, DatabaseConfig};
use companion_ledger::ledger::{EscrowStatus, PgLedgerStore, TransactionType};
use companion_ledger::notify::Notifier;
use companion_ledger::settings::{self, PgSettingsStore, SettingsStore};
use companion_ledger::wallet::{TopUpOutcome, WalletConfig, WalletError, WalletService};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

async fn setup_test_db() -> (Arc<PgPool>, DatabaseConfig) {
    let mut config = DatabaseConfig::development();
    config.max_connections = 10;
    config.min_connections = 1;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database_url = url;
    }

    let db = Database::new(&config)
        .await
        .expect("Failed to connect to test database");
    db.migrate().await.expect("Failed to run migrations");
    (Arc::new(db.pool().clone()), config)
}

async fn setup_service() -> (WalletService, Arc<PgPool>) {
    let (pool, config) = setup_test_db().await;
    let store = PgLedgerStore::new(pool.clone(), "VND", config.lock_timeout());
    let service = WalletService::new(Arc::new(store), Notifier::default(), WalletConfig::default());
    (service, pool)
}

#[tokio::test]
#[serial]
#[ignore = "requires a PostgreSQL instance at DATABASE_URL"]
async fn test_pg_pay_release_round_trip() {
    let (service, pool) = setup_service().await;
    let customer = Uuid::new_v4();
    let partner = Uuid::new_v4();
    let booking = Uuid::new_v4();

    service.top_up(customer, dec!(1000000), "momo", None).await.unwrap();
    service
        .pay_and_hold_escrow(customer, partner, dec!(300000), dec!(45000), booking)
        .await
        .unwrap();

    let payer = service.get_wallet(customer).await.unwrap();
    assert_eq!(payer.balance, dec!(655000));
    assert_eq!(payer.pending_balance, dec!(345000));

    assert!(service.release_escrow(booking).await.unwrap().is_settled());
    assert!(!service.refund_escrow(booking).await.unwrap().is_settled());

    let payer = service.get_wallet(customer).await.unwrap();
    let payee = service.get_wallet(partner).await.unwrap();
    assert_eq!(payer.pending_balance, Decimal::ZERO);
    assert_eq!(payee.balance, dec!(300000));
    assert_eq!(payee.total_earnings, dec!(300000));

    let escrow = service.get_escrow(booking).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Released);
    assert!(escrow.released_at.is_some());

    let entries: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE booking_id = $1")
            .bind(booking)
            .fetch_one(pool.as_ref())
            .await
            .unwrap();
    assert_eq!(entries, 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires a PostgreSQL instance at DATABASE_URL"]
async fn test_pg_concurrent_withdrawals_serialize() {
    let (service, _) = setup_service().await;
    let user = Uuid::new_v4();
    service.top_up(user, dec!(200000), "bank", None).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .request_withdraw(
                    user,
                    dec!(200000),
                    Some(companion_ledger::ledger::BankInfo {
                        bank_name: "TCB".to_string(),
                        account_no: "19033344455".to_string(),
                        account_name: "PHAM THI D".to_string(),
                    }),
                )
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(tx) => {
                assert_eq!(tx.transaction_type, TransactionType::Withdrawal);
                succeeded += 1;
            }
            Err(WalletError::InsufficientBalance { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(service.get_wallet(user).await.unwrap().balance, Decimal::ZERO);
}

#[tokio::test]
#[serial]
#[ignore = "requires a PostgreSQL instance at DATABASE_URL"]
async fn test_pg_top_up_external_id_is_idempotent() {
    let (service, _) = setup_service().await;
    let user = Uuid::new_v4();
    let external = format!("momo-{}", Uuid::new_v4());

    let first = service
        .top_up(user, dec!(50000), "momo", Some(external.clone()))
        .await
        .unwrap();
    let second = service
        .top_up(user, dec!(50000), "momo", Some(external))
        .await
        .unwrap();

    assert!(matches!(first, TopUpOutcome::Credited(_)));
    assert!(matches!(second, TopUpOutcome::Duplicate(_)));
    assert_eq!(first.transaction().id, second.transaction().id);
    assert_eq!(service.get_wallet(user).await.unwrap().balance, dec!(50000));
}

#[tokio::test]
#[serial]
#[ignore = "requires a PostgreSQL instance at DATABASE_URL"]
async fn test_pg_booking_cancel_refunds() {
    let (pool, config) = setup_test_db().await;
    let store = PgLedgerStore::new(pool.clone(), "VND", config.lock_timeout());
    let wallets = WalletService::new(Arc::new(store), Notifier::default(), WalletConfig::default());
    let machine = BookingStateMachine::new(
        Arc::new(PgBookingRepository::new(pool.clone())),
        wallets.clone(),
        Arc::new(PgSettingsStore::new(pool.clone())),
        Notifier::default(),
        BookingPolicy::default(),
    );

    let customer = Uuid::new_v4();
    let partner = Uuid::new_v4();
    wallets.top_up(customer, dec!(500000), "momo", None).await.unwrap();

    let booking = machine
        .create_booking(
            customer,
            partner,
            dec!(200000),
            Utc::now() + ChronoDuration::days(7),
        )
        .await
        .unwrap();
    machine.confirm(booking.id, Actor::User(partner)).await.unwrap();
    machine.pay(booking.id, Actor::User(customer)).await.unwrap();

    let cancelled = machine
        .cancel(booking.id, Actor::User(customer), Some("sick".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.booking.cancel_reason.as_deref(), Some("sick"));
    assert!(cancelled.booking.cancelled_at.is_some());
    assert!(matches!(cancelled.settlement, SettlementOutcome::Settled { .. }));

    let reloaded = machine.get_booking(booking.id).await.unwrap();
    assert_eq!(reloaded, cancelled.booking);
    assert_eq!(wallets.get_wallet(customer).await.unwrap().balance, dec!(500000));
}

#[tokio::test]
#[serial]
#[ignore = "requires a PostgreSQL instance at DATABASE_URL"]
async fn test_pg_settings_fall_back_to_default() {
    let (pool, _) = setup_test_db().await;
    let settings = PgSettingsStore::new(pool.clone());

    sqlx::query(
        "INSERT INTO system_settings (key, value) VALUES ($1, 'not-a-number') \
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(settings::PLATFORM_FEE_RATE)
    .execute(pool.as_ref())
    .await
    .unwrap();

    let rate = settings
        .get_number(settings::PLATFORM_FEE_RATE, dec!(0.15))
        .await;
    assert_eq!(rate, dec!(0.15));

    let missing = settings.get_number("no_such_setting", dec!(3)).await;
    assert_eq!(missing, dec!(3));
}
