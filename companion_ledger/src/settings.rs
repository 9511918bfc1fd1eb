//! Key-value system settings.
//!
//! Lookups never fail: a missing key, a storage error or an unparsable value
//! all fall back to the caller's default, the latter two with a warning.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::db::timeouts::with_query_timeout;
use crate::wallet::WalletResult;

/// Minimum notice, in hours, for a non-admin cancellation
pub const CANCELLATION_HOURS: &str = "cancellation_hours";
/// Service fee as a percentage of the booking subtotal
pub const SERVICE_FEE_PERCENT: &str = "service_fee_percent";
/// Reserved: delay before held funds are released automatically
pub const ESCROW_RELEASE_DELAY_HOURS: &str = "escrow_release_delay_hours";
/// Reserved: platform fee rate applied on top of the service fee
pub const PLATFORM_FEE_RATE: &str = "platform_fee_rate";

/// Read access to system settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_number(&self, key: &str, default: Decimal) -> Decimal;
    async fn get_bool(&self, key: &str, default: bool) -> bool;
}

fn parse_number(key: &str, raw: &str, default: Decimal) -> Decimal {
    Decimal::from_str(raw.trim()).unwrap_or_else(|_| {
        log::warn!("Setting {key} has non-numeric value {raw:?}; using {default}");
        default
    })
}

fn parse_bool(key: &str, raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            log::warn!("Setting {key} has non-boolean value {raw:?}; using {default}");
            default
        }
    }
}

/// Settings held in process memory
#[derive(Debug, Default)]
pub struct MapSettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl MapSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: impl ToString) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    fn raw(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl SettingsStore for MapSettingsStore {
    async fn get_number(&self, key: &str, default: Decimal) -> Decimal {
        self.raw(key)
            .map_or(default, |raw| parse_number(key, &raw, default))
    }

    async fn get_bool(&self, key: &str, default: bool) -> bool {
        self.raw(key)
            .map_or(default, |raw| parse_bool(key, &raw, default))
    }
}

/// Settings read from the `system_settings` table
#[derive(Clone)]
pub struct PgSettingsStore {
    pool: Arc<PgPool>,
}

impl PgSettingsStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn raw(&self, key: &str) -> Option<String> {
        let result: WalletResult<Option<String>> = with_query_timeout(
            sqlx::query_scalar("SELECT value FROM system_settings WHERE key = $1")
                .bind(key)
                .fetch_optional(self.pool.as_ref()),
        )
        .await;
        match result {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to read setting {key}: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn get_number(&self, key: &str, default: Decimal) -> Decimal {
        self.raw(key)
            .await
            .map_or(default, |raw| parse_number(key, &raw, default))
    }

    async fn get_bool(&self, key: &str, default: bool) -> bool {
        self.raw(key)
            .await
            .map_or(default, |raw| parse_bool(key, &raw, default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_missing_key_uses_default() {
        let store = MapSettingsStore::new();
        assert_eq!(store.get_number(CANCELLATION_HOURS, dec!(24)).await, dec!(24));
        assert!(store.get_bool("maintenance_mode", true).await);
    }

    #[tokio::test]
    async fn test_stored_values_are_parsed() {
        let store = MapSettingsStore::new()
            .with(SERVICE_FEE_PERCENT, "12.5")
            .with("maintenance_mode", "off");
        assert_eq!(store.get_number(SERVICE_FEE_PERCENT, dec!(15)).await, dec!(12.5));
        assert!(!store.get_bool("maintenance_mode", true).await);
    }

    #[tokio::test]
    async fn test_garbage_falls_back_to_default() {
        let store = MapSettingsStore::new()
            .with(CANCELLATION_HOURS, "two days")
            .with("maintenance_mode", "maybe");
        assert_eq!(store.get_number(CANCELLATION_HOURS, dec!(24)).await, dec!(24));
        assert!(!store.get_bool("maintenance_mode", false).await);
    }
}
