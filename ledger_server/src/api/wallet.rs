//! Wallet API handlers.
//!
//! All endpoints act on the caller's own wallet.
//!
//! # Examples
//!
//! Request a withdrawal:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/wallet/withdraw \
//!   -H "x-user-id: 6f1c2c9e-8a43-4a38-9d6b-1f0e2b7d4c11" \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": "50000"}'
//! ```

use axum::{
    Json,
    extract::{Extension, Query, State},
    http::StatusCode,
};
use companion_ledger::Actor;
use companion_ledger::ledger::{BankInfo, Transaction, TransactionPage, UserId, Wallet};
use companion_ledger::wallet::{TopUpOutcome, WalletError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::metrics;

const DEFAULT_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub amount: Decimal,
    /// Replaces the bank details on file when given
    #[serde(default)]
    pub bank_info: Option<BankInfo>,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: Decimal,
    pub payment_method: String,
    /// Gateway transaction id; repeats are credited once
    #[serde(default)]
    pub external_tx_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TopUpResponse {
    pub duplicate: bool,
    pub transaction: Transaction,
}

/// The caller's user id; admins have no wallet of their own
pub(super) fn wallet_owner(actor: Actor) -> ApiResult<UserId> {
    actor
        .user_id()
        .ok_or_else(|| ApiError::Forbidden("admin accounts have no wallet".to_string()))
}

/// Short label for metrics
pub(super) fn outcome_label(err: &WalletError) -> &'static str {
    match err {
        WalletError::InsufficientBalance { .. } => "insufficient_balance",
        WalletError::BankInfoRequired => "bank_info_required",
        WalletError::InvalidBankInfo(_) => "invalid_bank_info",
        WalletError::InvalidAmount(_) => "invalid_amount",
        WalletError::WalletNotFound(_) => "wallet_not_found",
        WalletError::AlreadyHeld(_) => "already_held",
        WalletError::EscrowClosed { .. } => "escrow_closed",
        WalletError::LockTimeout | WalletError::Timeout(_) => "timeout",
        WalletError::Database(_)
        | WalletError::DuplicateTransactionCode(_)
        | WalletError::InvariantViolation(_) => "error",
    }
}

fn track<T>(operation: &str, result: Result<T, WalletError>) -> ApiResult<T> {
    match &result {
        Ok(_) => metrics::wallet_operations_total(operation, "ok"),
        Err(e) => metrics::wallet_operations_total(operation, outcome_label(e)),
    }
    result.map_err(ApiError::from)
}

/// Get the caller's wallet, creating an empty one on first access.
///
/// # Response
///
/// `200 OK` with the wallet; amounts are decimal strings.
pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Wallet>> {
    let user_id = wallet_owner(actor)?;
    let wallet = state.wallets.get_or_create_wallet(user_id).await?;
    Ok(Json(wallet))
}

/// Page through the caller's transactions, newest first.
///
/// `limit` is clamped to 1..=100; `page` starts at 1.
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListTransactionsQuery>,
) -> ApiResult<Json<TransactionPage>> {
    let user_id = wallet_owner(actor)?;
    let page = state
        .wallets
        .list_transactions(
            user_id,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
        .await?;
    Ok(Json(page))
}

/// Request a withdrawal to the bank account on file.
///
/// The amount leaves the spendable balance immediately and the request is
/// recorded as a PENDING transaction.
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Insufficient balance or missing bank details
/// - `400 Bad Request`: Non-positive amount
/// - `404 Not Found`: Caller has no wallet
pub async fn withdraw(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<WithdrawRequest>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    let user_id = wallet_owner(actor)?;
    let transaction = track(
        "withdraw",
        state
            .wallets
            .request_withdraw(user_id, request.amount, request.bank_info)
            .await,
    )?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// Credit a confirmed gateway payment.
///
/// A repeated `external_tx_id` returns the original transaction with
/// `duplicate: true` and `200 OK` instead of `201 Created`.
pub async fn top_up(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<TopUpRequest>,
) -> ApiResult<(StatusCode, Json<TopUpResponse>)> {
    let user_id = wallet_owner(actor)?;
    let outcome = track(
        "top_up",
        state
            .wallets
            .top_up(
                user_id,
                request.amount,
                &request.payment_method,
                request.external_tx_id,
            )
            .await,
    )?;

    let (status, duplicate, transaction) = match outcome {
        TopUpOutcome::Credited(tx) => (StatusCode::CREATED, false, tx),
        TopUpOutcome::Duplicate(tx) => (StatusCode::OK, true, tx),
    };
    Ok((
        status,
        Json(TopUpResponse {
            duplicate,
            transaction,
        }),
    ))
}

/// Replace the caller's bank details.
pub async fn update_bank_info(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(info): Json<BankInfo>,
) -> ApiResult<Json<Wallet>> {
    let user_id = wallet_owner(actor)?;
    let wallet = state.wallets.update_bank_info(user_id, info).await?;
    Ok(Json(wallet))
}
