//! Prometheus metrics for monitoring ledger server health.
//!
//! Metrics are exposed in Prometheus text format on a separate listener
//! (`METRICS_BIND`) for scraping by monitoring systems.
//!
//! # Metrics Categories
//!
//! - **HTTP Metrics**: Request counts, duration, status codes
//! - **Ledger Metrics**: Wallet operation outcomes, escrow settlements
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use ledger_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::http_requests_total("POST", "/api/v1/wallet/withdraw", 200);
//! metrics::wallet_operations_total("withdraw", "ok");
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
///
/// # Arguments
///
/// - `addr`: Address to bind the metrics server to (e.g., `0.0.0.0:9090`)
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
///
/// Increments the total HTTP request counter with method, path, and status labels.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Ledger Metrics
// ============================================================================

/// Count a wallet operation by its outcome label.
pub fn wallet_operations_total(operation: &str, outcome: &str) {
    metrics::counter!("wallet_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Count the money side of a booking transition.
///
/// `Failed` settlements need manual reconciliation and should be alerted on.
pub fn booking_settlements_total(transition: &str, settlement: &str) {
    metrics::counter!("booking_settlements_total",
        "transition" => transition.to_string(),
        "settlement" => settlement.to_string()
    )
    .increment(1);
}
