//! Wallet module: balances, escrow payments, top-ups and withdrawals.
//!
//! This module implements:
//! - Atomic units that lock every row they read until commit
//! - Escrow hold, release and refund for booking payments
//! - Idempotent gateway top-ups keyed by the gateway transaction id
//! - PENDING withdrawals against bank details on file
//!
//! ## Example
//!
//! ```no_run
//! use companion_ledger::ledger::MemoryLedgerStore;
//! use companion_ledger::notify::Notifier;
//! use companion_ledger::wallet::{WalletConfig, WalletService};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryLedgerStore::new("VND"));
//!     let wallets = WalletService::new(store, Notifier::default(), WalletConfig::default());
//!
//!     let (customer, partner, booking) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
//!     wallets
//!         .top_up(customer, Decimal::from(1_000_000), "momo", None)
//!         .await?;
//!     wallets
//!         .pay_and_hold_escrow(
//!             customer,
//!             partner,
//!             Decimal::from(300_000),
//!             Decimal::from(45_000),
//!             booking,
//!         )
//!         .await?;
//!     wallets.release_escrow(booking).await?;
//!     Ok(())
//! }
//! ```

pub mod codes;
pub mod errors;
pub mod service;

pub use codes::generate_transaction_code;
pub use errors::{WalletError, WalletResult};
pub use service::{
    EscrowOutcome, HoldOutcome, MAX_AMOUNT, TopUpOutcome, WalletConfig, WalletService,
};
