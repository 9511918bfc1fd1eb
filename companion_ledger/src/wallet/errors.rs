//! Wallet error types.

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::EscrowStatus;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Insufficient balance
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        available: Decimal,
        required: Decimal,
    },

    /// Withdrawal attempted with no bank details supplied or on file
    #[error("Bank account information is required for withdrawal")]
    BankInfoRequired,

    /// Bank details supplied but incomplete
    #[error("Invalid bank information: {0}")]
    InvalidBankInfo(String),

    /// An escrow holding already exists for the booking
    #[error("Escrow already held for booking {0}")]
    AlreadyHeld(Uuid),

    /// The booking's holding is already RELEASED or REFUNDED
    #[error("Escrow for booking {booking_id} is already {status}")]
    EscrowClosed {
        booking_id: Uuid,
        status: EscrowStatus,
    },

    /// Wallet not found
    #[error("Wallet not found for user {0}")]
    WalletNotFound(Uuid),

    /// Invalid amount (must be positive)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Transaction code collided with an existing ledger row
    #[error("Duplicate transaction code: {0}")]
    DuplicateTransactionCode(String),

    /// A mutation would break a ledger invariant (negative balance etc.)
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    /// Could not acquire a row lock in time
    #[error("Timed out waiting for a ledger row lock")]
    LockTimeout,

    /// The atomic unit did not commit in time and was rolled back
    #[error("Ledger operation timed out after {0:?}")]
    Timeout(Duration),
}

impl WalletError {
    /// Whether the error is an actionable rejection the end user can fix.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            WalletError::InsufficientBalance { .. }
                | WalletError::BankInfoRequired
                | WalletError::InvalidBankInfo(_)
                | WalletError::InvalidAmount(_)
        )
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Insufficient funds and missing bank details are translated into
    /// actionable messages. Everything else becomes a generic retry message;
    /// full detail only goes to server logs.
    pub fn client_message(&self) -> String {
        match self {
            WalletError::InsufficientBalance { .. } => {
                "Your wallet balance is too low for this operation. Please top up and try again."
                    .to_string()
            }
            WalletError::BankInfoRequired => {
                "Please add your bank account details before requesting a withdrawal.".to_string()
            }
            WalletError::InvalidBankInfo(_) | WalletError::InvalidAmount(_) => self.to_string(),
            WalletError::EscrowClosed { .. } => {
                "The payment for this booking was already settled.".to_string()
            }
            _ => "Something went wrong while processing your payment. Please try again."
                .to_string(),
        }
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;
