//! Booking API handlers.
//!
//! Each transition endpoint returns the updated booking together with what
//! happened to its money:
//!
//! ```json
//! {
//!   "booking": { "id": "…", "status": "PAID", "total_amount": "345000", … },
//!   "settlement": { "status": "settled", "transaction": { … } }
//! }
//! ```
//!
//! A `"failed"` settlement means the booking moved but its escrow did not;
//! the server logs it for reconciliation.

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use companion_ledger::booking::{DisputeResolution, SettlementOutcome, TransitionOutcome};
use companion_ledger::ledger::{BookingId, UserId};
use companion_ledger::{Actor, Booking, BookingError};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::wallet::wallet_owner;
use crate::{logging, metrics};

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub partner_id: UserId,
    pub subtotal: Decimal,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolution: DisputeResolution,
}

fn settlement_label(settlement: &SettlementOutcome) -> &'static str {
    match settlement {
        SettlementOutcome::Settled { .. } => "settled",
        SettlementOutcome::AlreadySettled => "already_settled",
        SettlementOutcome::NotRequired => "not_required",
        SettlementOutcome::Failed { .. } => "failed",
    }
}

fn record(
    transition: &str,
    result: Result<TransitionOutcome, BookingError>,
) -> ApiResult<Json<TransitionOutcome>> {
    let outcome = result?;
    let label = settlement_label(&outcome.settlement);
    if !matches!(outcome.settlement, SettlementOutcome::NotRequired) {
        metrics::booking_settlements_total(transition, label);
        logging::log_ledger_operation(transition, &outcome.booking.id.to_string(), label);
    }
    Ok(Json(outcome))
}

/// Create a booking with the caller as customer.
///
/// # Response
///
/// `201 Created` with the PENDING booking, priced with the current service fee.
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateBookingRequest>,
) -> ApiResult<(StatusCode, Json<Booking>)> {
    let customer_id = wallet_owner(actor)?;
    let booking = state
        .bookings
        .create_booking(
            customer_id,
            request.partner_id,
            request.subtotal,
            request.start_time,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// Get a booking; visible to its two parties and admins.
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Json<Booking>> {
    let booking = state.bookings.get_booking(booking_id).await?;
    let visible = match actor {
        Actor::Admin => true,
        Actor::User(id) => booking.user_id == id || booking.partner_id == id,
    };
    if !visible {
        return Err(ApiError::NotFound("Booking".to_string()));
    }
    Ok(Json(booking))
}

pub async fn confirm(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Json<TransitionOutcome>> {
    record("confirm", state.bookings.confirm(booking_id, actor).await)
}

/// Pay for a confirmed booking; the total is held in escrow.
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Balance below the booking total
/// - `409 Conflict`: Booking is not CONFIRMED
pub async fn pay(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Json<TransitionOutcome>> {
    record("pay", state.bookings.pay(booking_id, actor).await)
}

pub async fn start(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Json<TransitionOutcome>> {
    record("start", state.bookings.start(booking_id, actor).await)
}

/// Complete a booking; releases the escrow to the partner.
pub async fn complete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Json<TransitionOutcome>> {
    record("complete", state.bookings.complete(booking_id, actor).await)
}

/// Cancel a booking; a paid booking is refunded.
///
/// # Errors
///
/// - `409 Conflict`: Inside the cancellation window, or not cancellable
pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<BookingId>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Json<TransitionOutcome>> {
    record(
        "cancel",
        state.bookings.cancel(booking_id, actor, request.reason).await,
    )
}

pub async fn dispute(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<BookingId>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Json<TransitionOutcome>> {
    record(
        "dispute",
        state.bookings.dispute(booking_id, actor, request.reason).await,
    )
}

/// Settle a disputed booking for either side; admin only.
pub async fn resolve(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<BookingId>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<TransitionOutcome>> {
    record(
        "resolve",
        state
            .bookings
            .resolve(booking_id, actor, request.resolution)
            .await,
    )
}
