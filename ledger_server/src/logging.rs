//! Structured logging configuration.
//!
//! The ledger library logs through the `log` facade; the subscriber installed
//! here picks those records up alongside the server's own `tracing` events.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Log levels come from the `RUST_LOG` env var, defaulting to
/// `info,sqlx=warn,hyper=warn`.
///
/// # Example
///
/// ```no_run
/// use ledger_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log API request/response
///
/// # Arguments
///
/// * `method` - HTTP method
/// * `path` - Matched route
/// * `status_code` - Response status code
/// * `duration_ms` - Request duration in milliseconds
pub fn log_api_request(method: &str, path: &str, status_code: u16, duration_ms: u64) {
    if status_code >= 500 {
        tracing::warn!(
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "API request failed"
        );
    } else {
        tracing::info!(
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "API request completed"
        );
    }
}

/// Log a money-moving operation's outcome
///
/// # Arguments
///
/// * `operation` - Wallet or booking operation name
/// * `subject` - Booking or user the operation acted on
/// * `outcome` - Short outcome label, e.g. `held` or `insufficient_balance`
pub fn log_ledger_operation(operation: &str, subject: &str, outcome: &str) {
    tracing::info!(
        operation = operation,
        subject = subject,
        outcome = outcome,
        "Ledger operation"
    );
}
