//! HTTP server for the companion-booking wallet and escrow ledger.
//!
//! Wires the [`companion_ledger`] services to an axum router, picking the
//! PostgreSQL or in-memory ledger backend from configuration.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;

use anyhow::Context;
use companion_ledger::booking::{
    BookingPolicy, BookingRepository, BookingStateMachine, MemoryBookingRepository,
    PgBookingRepository,
};
use companion_ledger::db::Database;
use companion_ledger::ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
use companion_ledger::notify::Notifier;
use companion_ledger::settings::{self, MapSettingsStore, PgSettingsStore, SettingsStore};
use companion_ledger::wallet::{WalletConfig, WalletService};
use std::sync::Arc;

use api::AppState;
use config::{LedgerBackend, ServerConfig};

/// Build the services behind the API
///
/// For the Postgres backend this connects and runs pending migrations.
pub async fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let policy = BookingPolicy {
        cancellation_hours: config.settings.cancellation_hours,
        service_fee_percent: config.settings.service_fee_percent,
        ..BookingPolicy::default()
    };

    let (ledger, bookings, settings): (
        Arc<dyn LedgerStore>,
        Arc<dyn BookingRepository>,
        Arc<dyn SettingsStore>,
    ) = match config.ledger.backend {
        LedgerBackend::Postgres => {
            let db = Database::new(&config.database)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Database connected and migrated");

            let pool = Arc::new(db.pool().clone());
            (
                Arc::new(PgLedgerStore::new(
                    pool.clone(),
                    config.ledger.currency.clone(),
                    config.database.lock_timeout(),
                )),
                Arc::new(PgBookingRepository::new(pool.clone())),
                Arc::new(PgSettingsStore::new(pool)),
            )
        }
        LedgerBackend::Memory => {
            tracing::warn!("Using the in-memory ledger; all data is lost on shutdown");
            (
                Arc::new(MemoryLedgerStore::new(config.ledger.currency.clone())),
                Arc::new(MemoryBookingRepository::new()),
                Arc::new(
                    MapSettingsStore::new()
                        .with(settings::CANCELLATION_HOURS, config.settings.cancellation_hours)
                        .with(
                            settings::SERVICE_FEE_PERCENT,
                            config.settings.service_fee_percent,
                        ),
                ),
            )
        }
    };

    let notifier = Notifier::default();
    let wallets = WalletService::new(
        ledger,
        notifier.clone(),
        WalletConfig {
            transaction_timeout: config.ledger.transaction_timeout(),
        },
    );
    let bookings = BookingStateMachine::new(bookings, wallets.clone(), settings, notifier, policy);

    Ok(AppState { wallets, bookings })
}
