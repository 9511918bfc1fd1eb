//! Database configuration module.
//!
//! Provides configuration structures for database connection management.

use std::time::Duration;

use super::timeouts::DEFAULT_LOCK_TIMEOUT;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,

    /// How long a ledger transaction may wait for a row lock, in milliseconds
    pub lock_timeout_ms: u64,
}

impl DatabaseConfig {
    /// Create a default configuration for development
    ///
    /// Uses `postgres://postgres@localhost/companion_ledger` as the database URL
    pub fn development() -> Self {
        Self {
            database_url: "postgres://postgres@localhost/companion_ledger".to_string(),
            max_connections: 20,
            min_connections: 5,
            connection_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
        }
    }

    /// Row lock wait bound as a [`Duration`]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::development()
    }
}
