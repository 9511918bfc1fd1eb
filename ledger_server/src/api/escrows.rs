//! Escrow lookup.

use axum::{
    Json,
    extract::{Extension, Path, State},
};
use companion_ledger::Actor;
use companion_ledger::ledger::{BookingId, EscrowHolding};

use super::AppState;
use super::error::{ApiError, ApiResult};

/// Get a booking's escrow holding; visible to payer, payee and admins.
///
/// # Errors
///
/// - `404 Not Found`: Booking never paid, or caller is not a party to it
pub async fn get_escrow(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Json<EscrowHolding>> {
    let escrow = state
        .wallets
        .get_escrow(booking_id)
        .await?
        .filter(|e| match actor {
            Actor::Admin => true,
            Actor::User(id) => e.payer_id == id || e.payee_id == id,
        })
        .ok_or_else(|| ApiError::NotFound("Escrow".to_string()))?;
    Ok(Json(escrow))
}
