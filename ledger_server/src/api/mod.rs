//! HTTP API for the ledger server.
//!
//! # Modules
//!
//! - [`wallet`]: The caller's wallet, transactions, withdrawals and top-ups
//! - [`bookings`]: Booking creation and lifecycle transitions
//! - [`escrows`]: Escrow holding lookup
//! - [`middleware`]: Caller identity and request metrics
//! - [`request_id`]: Request correlation ids
//! - [`error`]: Error to HTTP status mapping
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                                - Health check (public)
//! GET  /api/v1/wallet                         - Caller's wallet
//! GET  /api/v1/wallet/transactions            - Caller's transactions (?page=&limit=)
//! POST /api/v1/wallet/withdraw                - Request a withdrawal
//! POST /api/v1/wallet/top-up                  - Credit a gateway payment
//! PUT  /api/v1/wallet/bank                    - Replace bank details
//! POST /api/v1/bookings                       - Create a booking
//! GET  /api/v1/bookings/{id}                  - Get a booking
//! POST /api/v1/bookings/{id}/confirm          - Partner confirms
//! POST /api/v1/bookings/{id}/pay              - Customer pays into escrow
//! POST /api/v1/bookings/{id}/start            - Either party starts
//! POST /api/v1/bookings/{id}/complete         - Customer completes; escrow released
//! POST /api/v1/bookings/{id}/cancel           - Cancel; paid bookings refunded
//! POST /api/v1/bookings/{id}/dispute          - Either party disputes
//! POST /api/v1/bookings/{id}/resolve          - Admin settles a dispute
//! GET  /api/v1/escrows/{booking_id}           - Escrow holding of a booking
//! ```
//!
//! Every `/api/v1` route requires the `x-user-id` header (or
//! `x-user-role: admin`) set by the upstream gateway.

pub mod bookings;
pub mod error;
pub mod escrows;
pub mod middleware;
pub mod request_id;
pub mod wallet;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
};
use companion_ledger::{BookingStateMachine, WalletService};
use serde_json::json;
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; both services are cheap handles over shared stores.
#[derive(Clone)]
pub struct AppState {
    pub wallets: WalletService,
    pub bookings: BookingStateMachine,
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use ledger_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router();

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .route_layer(axum::middleware::from_fn(middleware::metrics_middleware))
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API v1 routes; all of them need a caller identity.
fn create_v1_router() -> Router<AppState> {
    let wallet_routes = Router::new()
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route("/wallet/withdraw", post(wallet::withdraw))
        .route("/wallet/top-up", post(wallet::top_up))
        .route("/wallet/bank", put(wallet::update_bank_info));

    let booking_routes = Router::new()
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/{booking_id}", get(bookings::get_booking))
        .route("/bookings/{booking_id}/confirm", post(bookings::confirm))
        .route("/bookings/{booking_id}/pay", post(bookings::pay))
        .route("/bookings/{booking_id}/start", post(bookings::start))
        .route("/bookings/{booking_id}/complete", post(bookings::complete))
        .route("/bookings/{booking_id}/cancel", post(bookings::cancel))
        .route("/bookings/{booking_id}/dispute", post(bookings::dispute))
        .route("/bookings/{booking_id}/resolve", post(bookings::resolve));

    Router::new()
        .merge(wallet_routes)
        .merge(booking_routes)
        .route("/escrows/{booking_id}", get(escrows::get_escrow))
        .layer(axum::middleware::from_fn(middleware::identity_middleware))
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the ledger store answers, `503 Service Unavailable`
/// otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","ledger":true,"version":"0.1.0","timestamp":"2026-10-18T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let ledger_healthy = match state.wallets.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Ledger health check failed");
            false
        }
    };

    let status_code = if ledger_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if ledger_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "ledger": ledger_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
