//! Companion ledger HTTP server.

use std::net::SocketAddr;

use anyhow::Error;
use ledger_server::config::{LedgerBackend, ServerConfig};
use ledger_server::{api, build_state, logging, metrics};
use pico_args::Arguments;

const HELP: &str = "\
Run the companion-booking wallet and escrow ledger server

USAGE:
  ledger_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]
  --backend    NAME        Ledger backend: postgres or memory  [default: env LEDGER_BACKEND or postgres]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND                        Server bind address (e.g., 0.0.0.0:8080)
  METRICS_BIND                       Prometheus scrape address (disabled if unset)
  DATABASE_URL                       PostgreSQL connection string
  DB_MAX_CONNECTIONS, DB_MIN_CONNECTIONS, DB_CONNECTION_TIMEOUT_SECS,
  DB_IDLE_TIMEOUT_SECS, DB_MAX_LIFETIME_SECS
                                     Connection pool tuning
  LEDGER_BACKEND                     postgres or memory
  LEDGER_CURRENCY                    Currency of new wallets [default: VND]
  LEDGER_TRANSACTION_TIMEOUT_SECS    Bound on one atomic ledger unit [default: 10]
  LEDGER_LOCK_TIMEOUT_MS             Bound on one row lock wait [default: 5000]
  SETTING_CANCELLATION_HOURS         Default cancellation notice [default: 24]
  SETTING_SERVICE_FEE_PERCENT        Default service fee [default: 15]
  RUST_LOG                           Log filter [default: info,sqlx=warn,hyper=warn]
";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let bind: Option<SocketAddr> = pargs.opt_value_from_str("--bind")?;
    let database_url: Option<String> = pargs.opt_value_from_str("--db-url")?;
    let backend: Option<LedgerBackend> = pargs.opt_value_from_str("--backend")?;

    logging::init();

    let config = ServerConfig::from_env(bind, database_url, backend)?;
    config.validate()?;
    tracing::info!(
        backend = ?config.ledger.backend,
        currency = %config.ledger.currency,
        "Starting ledger server at {}",
        config.bind
    );

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!("Prometheus metrics exposed at http://{addr}/metrics");
    }

    let state = build_state(&config).await?;
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.bind, e))?;

    tracing::info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    tracing::info!("Shutting down server...");

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
