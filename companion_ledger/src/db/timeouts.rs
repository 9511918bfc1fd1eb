//! Timeout helpers for ledger units of work.
//!
//! A unit that exceeds its bound is dropped before commit, which rolls back
//! every write it staged.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::wallet::{WalletError, WalletResult};

/// Default timeout for a single query (5 seconds)
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a whole atomic financial operation (10 seconds)
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on waiting for a wallet or escrow row lock (5 seconds)
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a ledger future with a timeout
///
/// # Arguments
///
/// * `duration` - Timeout duration
/// * `future` - Ledger operation to execute
///
/// # Returns
///
/// * `WalletResult<T>` - The operation result, or `WalletError::Timeout`
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> WalletResult<T>
where
    F: Future<Output = WalletResult<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(WalletError::Timeout(duration)),
    }
}

/// Run a single query with the default query timeout
pub async fn with_query_timeout<F, T>(future: F) -> WalletResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    with_timeout(DEFAULT_QUERY_TIMEOUT, async { future.await.map_err(WalletError::from) }).await
}
