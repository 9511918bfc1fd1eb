//! Booking error types.

use rust_decimal::Decimal;
use thiserror::Error;

use super::models::BookingStatus;
use crate::ledger::BookingId;
use crate::wallet::WalletError;

/// Booking errors
#[derive(Debug, Error)]
pub enum BookingError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Booking not found
    #[error("Booking not found: {0}")]
    NotFound(BookingId),

    /// The machine has no edge between the two statuses, or another request
    /// moved the booking first
    #[error("Cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    /// Caller is not allowed to drive this transition
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Too close to the start time to cancel
    #[error("Bookings must be cancelled at least {hours} hours before the start time")]
    CancellationWindow { hours: Decimal },

    /// Bad request data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Wallet operation failed
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl BookingError {
    /// Whether the error is an actionable rejection the end user can fix.
    pub fn is_user_visible(&self) -> bool {
        match self {
            BookingError::Database(_) => false,
            BookingError::Wallet(e) => e.is_user_visible(),
            _ => true,
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            BookingError::NotFound(_) => "Booking not found".to_string(),
            BookingError::Forbidden(_) => {
                "You are not allowed to perform this action on this booking".to_string()
            }
            BookingError::InvalidTransition { .. }
            | BookingError::CancellationWindow { .. }
            | BookingError::InvalidInput(_) => self.to_string(),
            BookingError::Wallet(e) => e.client_message(),
            BookingError::Database(_) => {
                "Something went wrong while processing your booking. Please try again."
                    .to_string()
            }
        }
    }
}

/// Result type for booking operations
pub type BookingResult<T> = Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_wallet_errors_keep_wallet_policy() {
        let err = BookingError::from(WalletError::InsufficientBalance {
            available: dec!(1),
            required: dec!(2),
        });
        assert!(err.is_user_visible());
        assert!(err.client_message().contains("top up"));

        let err = BookingError::from(WalletError::LockTimeout);
        assert!(!err.is_user_visible());
        assert!(err.client_message().contains("try again"));
    }

    #[test]
    fn test_not_found_hides_id() {
        let id = Uuid::new_v4();
        let err = BookingError::NotFound(id);
        assert!(!err.client_message().contains(&id.to_string()));
    }

    #[test]
    fn test_transition_message() {
        let err = BookingError::InvalidTransition {
            from: BookingStatus::Completed,
            to: BookingStatus::Cancelled,
        };
        assert_eq!(
            err.client_message(),
            "Cannot move booking from COMPLETED to CANCELLED"
        );
    }
}
