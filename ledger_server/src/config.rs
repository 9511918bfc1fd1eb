//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use companion_ledger::db::DatabaseConfig;
use companion_ledger::db::timeouts::DEFAULT_TRANSACTION_TIMEOUT;
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Prometheus scrape endpoint; disabled when unset
    pub metrics_bind: Option<SocketAddr>,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Ledger configuration
    pub ledger: LedgerConfig,
    /// Fallback values for system settings
    pub settings: SettingsDefaults,
}

/// Where wallets, escrows and bookings are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Postgres,
    /// Process-local; everything is lost on restart
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(LedgerBackend::Postgres),
            "memory" => Ok(LedgerBackend::Memory),
            other => Err(format!("unknown ledger backend: {other}")),
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// ISO currency code given to new wallets
    pub currency: String,
    /// Bound on a whole atomic unit, in seconds
    pub transaction_timeout_secs: u64,
}

impl LedgerConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

/// Values used when the settings table has no entry
#[derive(Debug, Clone)]
pub struct SettingsDefaults {
    pub cancellation_hours: Decimal,
    pub service_fee_percent: Decimal,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `backend_override` - Optional ledger backend override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        backend_override: Option<LedgerBackend>,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_env_required_or("SERVER_BIND", SocketAddr::from(([127, 0, 0, 1], 8080)))?,
        };
        let metrics_bind = match std::env::var("METRICS_BIND") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("'{raw}' is not an IP:PORT address"),
            })?),
            Err(_) => None,
        };

        let backend = match backend_override {
            Some(backend) => backend,
            None => match std::env::var("LEDGER_BACKEND") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|reason| ConfigError::Invalid {
                        var: "LEDGER_BACKEND".to_string(),
                        reason,
                    })?,
                Err(_) => LedgerBackend::Postgres,
            },
        };

        // Database configuration
        let database_url = database_url_override.or_else(|| std::env::var("DATABASE_URL").ok());
        let database_url = match (database_url, backend) {
            (Some(url), _) => url,
            (None, LedgerBackend::Memory) => String::new(),
            (None, LedgerBackend::Postgres) => {
                return Err(ConfigError::MissingRequired {
                    var: "DATABASE_URL".to_string(),
                    hint: "e.g. postgres://postgres@localhost/companion_ledger, or set LEDGER_BACKEND=memory"
                        .to_string(),
                });
            }
        };

        let defaults = DatabaseConfig::development();
        let database = DatabaseConfig {
            database_url,
            max_connections: parse_env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_env_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            connection_timeout_secs: parse_env_or(
                "DB_CONNECTION_TIMEOUT_SECS",
                defaults.connection_timeout_secs,
            ),
            idle_timeout_secs: parse_env_or("DB_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            max_lifetime_secs: parse_env_or("DB_MAX_LIFETIME_SECS", defaults.max_lifetime_secs),
            lock_timeout_ms: parse_env_or("LEDGER_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
        };

        let ledger = LedgerConfig {
            backend,
            currency: std::env::var("LEDGER_CURRENCY").unwrap_or_else(|_| "VND".to_string()),
            transaction_timeout_secs: parse_env_or(
                "LEDGER_TRANSACTION_TIMEOUT_SECS",
                DEFAULT_TRANSACTION_TIMEOUT.as_secs(),
            ),
        };

        let settings = SettingsDefaults {
            cancellation_hours: parse_env_required_or(
                "SETTING_CANCELLATION_HOURS",
                Decimal::from(24),
            )?,
            service_fee_percent: parse_env_required_or(
                "SETTING_SERVICE_FEE_PERCENT",
                Decimal::from(15),
            )?,
        };

        Ok(ServerConfig {
            bind,
            metrics_bind,
            database,
            ledger,
            settings,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.backend == LedgerBackend::Postgres {
            if self.database.max_connections == 0 {
                return Err(ConfigError::Invalid {
                    var: "DB_MAX_CONNECTIONS".to_string(),
                    reason: "Must be greater than 0".to_string(),
                });
            }

            if self.database.min_connections > self.database.max_connections {
                return Err(ConfigError::Invalid {
                    var: "DB_MIN_CONNECTIONS".to_string(),
                    reason: format!(
                        "Cannot exceed max connections ({})",
                        self.database.max_connections
                    ),
                });
            }
        }

        let currency = &self.ledger.currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Invalid {
                var: "LEDGER_CURRENCY".to_string(),
                reason: format!("'{currency}' is not a three-letter ISO code"),
            });
        }

        if self.ledger.transaction_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "LEDGER_TRANSACTION_TIMEOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.database.lock_timeout() >= self.ledger.transaction_timeout() {
            return Err(ConfigError::Invalid {
                var: "LEDGER_LOCK_TIMEOUT_MS".to_string(),
                reason: format!(
                    "Must be shorter than the transaction timeout ({}s)",
                    self.ledger.transaction_timeout_secs
                ),
            });
        }

        if self.settings.cancellation_hours.is_sign_negative() {
            return Err(ConfigError::Invalid {
                var: "SETTING_CANCELLATION_HOURS".to_string(),
                reason: "Must not be negative".to_string(),
            });
        }

        if self.settings.service_fee_percent.is_sign_negative()
            || self.settings.service_fee_percent > Decimal::ONE_HUNDRED
        {
            return Err(ConfigError::Invalid {
                var: "SETTING_SERVICE_FEE_PERCENT".to_string(),
                reason: "Must be between 0 and 100".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Like `parse_env_or`, but a present and unparsable value is an error
fn parse_env_required_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}
