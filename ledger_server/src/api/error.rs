//! Mapping of ledger and booking errors onto HTTP responses.
//!
//! Bodies carry only the client-safe message; full detail of server-side
//! failures goes to the log.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use companion_ledger::{BookingError, WalletError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by every API handler
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Booking(#[from] BookingError),

    /// No caller identity on the request
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

fn wallet_status(err: &WalletError) -> StatusCode {
    match err {
        WalletError::InsufficientBalance { .. }
        | WalletError::BankInfoRequired
        | WalletError::InvalidBankInfo(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WalletError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        WalletError::WalletNotFound(_) => StatusCode::NOT_FOUND,
        WalletError::AlreadyHeld(_) | WalletError::EscrowClosed { .. } => StatusCode::CONFLICT,
        WalletError::Database(_)
        | WalletError::DuplicateTransactionCode(_)
        | WalletError::InvariantViolation(_)
        | WalletError::LockTimeout
        | WalletError::Timeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Wallet(e) => wallet_status(e),
            ApiError::Booking(e) => match e {
                BookingError::NotFound(_) => StatusCode::NOT_FOUND,
                BookingError::InvalidTransition { .. } | BookingError::CancellationWindow { .. } => {
                    StatusCode::CONFLICT
                }
                BookingError::Forbidden(_) => StatusCode::FORBIDDEN,
                BookingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                BookingError::Wallet(e) => wallet_status(e),
                BookingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn client_message(&self) -> String {
        match self {
            ApiError::Wallet(WalletError::WalletNotFound(_)) => {
                "No wallet exists for this account yet".to_string()
            }
            ApiError::Wallet(e) => e.client_message(),
            ApiError::Booking(e) => e.client_message(),
            ApiError::Unauthorized(_) => "Authentication required".to_string(),
            ApiError::Forbidden(_) => "You are not allowed to perform this action".to_string(),
            ApiError::NotFound(what) => format!("{what} not found"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.client_message(),
            }),
        )
            .into_response()
    }
}
