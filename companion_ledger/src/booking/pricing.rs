//! Service fee quoting.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Price breakdown of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    pub subtotal: Decimal,
    pub service_fee: Decimal,
    pub total_amount: Decimal,
}

/// Quote the service fee for a subtotal
///
/// The fee is `subtotal * fee_percent / 100`, rounded half away from zero to
/// `scale` decimal places (0 for VND).
pub fn quote(subtotal: Decimal, fee_percent: Decimal, scale: u32) -> FeeQuote {
    let service_fee = (subtotal * fee_percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ZERO);
    FeeQuote {
        subtotal,
        service_fee,
        total_amount: subtotal + service_fee,
    }
}
