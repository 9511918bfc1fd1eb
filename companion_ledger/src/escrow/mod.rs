//! Escrow lifecycle for a single booking.
//!
//! A holding is created HELD and resolved exactly once, to RELEASED or
//! REFUNDED. The manager only touches the escrow row; balance movements are
//! made by the wallet service inside the same atomic unit.

use chrono::Utc;

use crate::ledger::{BookingId, EscrowHolding, EscrowStatus, LedgerTx, NewEscrowHolding};
use crate::wallet::WalletResult;

/// Result of trying to resolve a holding
#[derive(Debug, Clone, PartialEq)]
pub enum EscrowResolution {
    /// This unit moved the holding out of HELD
    Resolved(EscrowHolding),
    /// The holding was already RELEASED or REFUNDED
    AlreadyResolved(EscrowHolding),
    /// The booking has no holding
    NotFound,
}

/// Stateless escrow operations over a caller supplied unit
pub struct EscrowManager;

impl EscrowManager {
    /// Create a HELD holding for a booking
    ///
    /// # Errors
    ///
    /// * `WalletError::AlreadyHeld` - The booking already has a holding
    pub async fn hold(
        tx: &mut dyn LedgerTx,
        escrow: NewEscrowHolding,
    ) -> WalletResult<EscrowHolding> {
        let holding = tx.insert_escrow(escrow).await?;
        log::debug!(
            "Escrow {} held for booking {}: {} + fee {}",
            holding.id,
            holding.booking_id,
            holding.amount,
            holding.platform_fee
        );
        Ok(holding)
    }

    /// Move a HELD holding to RELEASED
    pub async fn release(
        tx: &mut dyn LedgerTx,
        booking_id: BookingId,
    ) -> WalletResult<EscrowResolution> {
        Self::resolve(tx, booking_id, EscrowStatus::Released).await
    }

    /// Move a HELD holding to REFUNDED
    pub async fn refund(
        tx: &mut dyn LedgerTx,
        booking_id: BookingId,
    ) -> WalletResult<EscrowResolution> {
        Self::resolve(tx, booking_id, EscrowStatus::Refunded).await
    }

    async fn resolve(
        tx: &mut dyn LedgerTx,
        booking_id: BookingId,
        target: EscrowStatus,
    ) -> WalletResult<EscrowResolution> {
        let Some(mut holding) = tx.lock_escrow(booking_id).await? else {
            log::warn!("No escrow holding for booking {booking_id}; nothing to mark {target}");
            return Ok(EscrowResolution::NotFound);
        };

        // Whoever locked the row first already decided the outcome.
        if !holding.is_held() {
            log::warn!(
                "Escrow for booking {booking_id} is already {}; skipping {target}",
                holding.status
            );
            return Ok(EscrowResolution::AlreadyResolved(holding));
        }

        let now = Utc::now();
        match target {
            EscrowStatus::Released => holding.released_at = Some(now),
            EscrowStatus::Refunded => holding.refunded_at = Some(now),
            EscrowStatus::Held => {}
        }
        holding.status = target;
        holding.updated_at = now;
        tx.save_escrow(&holding).await?;

        Ok(EscrowResolution::Resolved(holding))
    }
}
