//! # Companion Ledger
//!
//! Wallet, escrow and booking-payment core of a companion-booking
//! marketplace. Customers pay for a booking from their wallet; the money sits
//! in escrow until the booking completes (paid out to the partner) or is
//! cancelled (refunded to the customer).
//!
//! ## Core Modules
//!
//! - [`ledger`]: Wallets, the append-only transaction log and escrow rows,
//!   behind a row-locking store with PostgreSQL and in-memory backends
//! - [`escrow`]: HELD -> RELEASED / REFUNDED lifecycle of one booking's funds
//! - [`wallet`]: The wallet service, sole writer of balances
//! - [`booking`]: Booking state machine driving the wallet service
//! - [`settings`]: Key-value system settings
//! - [`notify`]: Fire-and-forget notification delivery
//! - [`db`]: Connection pool, migrations and timeouts
//!
//! ## Invariants
//!
//! - Balances and pending balances never go negative
//! - Every balance change has exactly one transaction row, with
//!   `balance_after - balance_before` equal to its signed amount
//! - An escrow holding is resolved at most once
//!
//! ## Example
//!
//! ```
//! use companion_ledger::ledger::MemoryLedgerStore;
//! use companion_ledger::notify::Notifier;
//! use companion_ledger::wallet::{WalletConfig, WalletService};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let wallets = WalletService::new(
//!         Arc::new(MemoryLedgerStore::new("VND")),
//!         Notifier::default(),
//!         WalletConfig::default(),
//!     );
//!     let user = Uuid::new_v4();
//!     wallets.top_up(user, Decimal::from(50_000), "momo", None).await.unwrap();
//!     assert_eq!(wallets.get_wallet(user).await.unwrap().balance, Decimal::from(50_000));
//! });
//! ```

/// Booking lifecycle and its payment transitions.
pub mod booking;

/// Database connection pool and configuration.
pub mod db;

/// Escrow holding lifecycle.
pub mod escrow;

/// Ledger storage and row locking.
pub mod ledger;

/// Notification delivery.
pub mod notify;

/// System settings lookup.
pub mod settings;

/// Wallet service and errors.
pub mod wallet;

pub use booking::{Actor, Booking, BookingError, BookingStateMachine, BookingStatus};
pub use ledger::{EscrowHolding, LedgerStore, Transaction, Wallet};
pub use wallet::{WalletError, WalletResult, WalletService};
