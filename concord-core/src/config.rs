//! Configuration types

use crate::id_generator::DEFAULT_EPOCH_MILLIS;
use crate::*;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default name of the cluster-replicated cache holding lock records.
pub const DEFAULT_LOCK_CACHE_NAME: &str = "concord.locks";

/// Default name of the request-scoped cache tracking locks held by a request.
pub const DEFAULT_LOCK_REQUEST_CACHE_NAME: &str = "concord.locks.request";

/// Master configuration for one Concord node.
///
/// Only the server number is required; everything else has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcordConfig {
    // Identity (REQUIRED)
    pub server_number: u16,

    // ID generation
    /// Reference instant for identifiers, in Unix milliseconds
    pub id_epoch_millis: i64,

    // Locking
    pub lock_cache_name: String,
    pub lock_request_cache_name: String,
    /// Budget for blocking lock acquisition
    pub lock_wait_timeout: Duration,
    /// First backoff between acquisition attempts
    pub lock_initial_backoff: Duration,
    /// Backoff ceiling between acquisition attempts
    pub lock_max_backoff: Duration,
}

impl ConcordConfig {
    /// Build a configuration with defaults for everything except the server number.
    pub fn new(server_number: u16) -> Self {
        Self {
            server_number,
            id_epoch_millis: DEFAULT_EPOCH_MILLIS,
            lock_cache_name: DEFAULT_LOCK_CACHE_NAME.to_string(),
            lock_request_cache_name: DEFAULT_LOCK_REQUEST_CACHE_NAME.to_string(),
            lock_wait_timeout: Duration::from_secs(30),
            lock_initial_backoff: Duration::from_millis(10),
            lock_max_backoff: Duration::from_millis(500),
        }
    }

    /// Set the lock wait budget.
    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    /// Set the backoff bounds used while waiting for a lock.
    pub fn with_lock_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.lock_initial_backoff = initial;
        self.lock_max_backoff = max;
        self
    }

    /// Get the validated server number.
    pub fn server_number(&self) -> ConcordResult<ServerNumber> {
        Ok(ServerNumber::new(self.server_number)?)
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(ConcordError::Config) if invalid.
    ///
    /// Validates:
    /// - server_number <= MAX_SERVER_NUMBER
    /// - id_epoch_millis is not in the future
    /// - lock durations are positive and initial backoff <= max backoff
    /// - lock cache names are non-empty and distinct
    pub fn validate(&self) -> ConcordResult<()> {
        self.server_number()?;

        if self.id_epoch_millis > Utc::now().timestamp_millis() {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "id_epoch_millis".to_string(),
                value: self.id_epoch_millis.to_string(),
                reason: "id_epoch_millis must not be in the future".to_string(),
            }));
        }

        for (field, value) in [
            ("lock_wait_timeout", self.lock_wait_timeout),
            ("lock_initial_backoff", self.lock_initial_backoff),
            ("lock_max_backoff", self.lock_max_backoff),
        ] {
            if value.is_zero() {
                return Err(ConcordError::Config(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: format!("{} must be positive", field),
                }));
            }
        }

        if self.lock_initial_backoff > self.lock_max_backoff {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "lock_initial_backoff".to_string(),
                value: format!("{:?}", self.lock_initial_backoff),
                reason: "lock_initial_backoff must not exceed lock_max_backoff".to_string(),
            }));
        }

        if self.lock_cache_name.trim().is_empty() {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "lock_cache_name".to_string(),
                value: self.lock_cache_name.clone(),
                reason: "lock_cache_name must not be empty".to_string(),
            }));
        }

        if self.lock_request_cache_name.trim().is_empty() {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "lock_request_cache_name".to_string(),
                value: self.lock_request_cache_name.clone(),
                reason: "lock_request_cache_name must not be empty".to_string(),
            }));
        }

        if self.lock_cache_name == self.lock_request_cache_name {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "lock_request_cache_name".to_string(),
                value: self.lock_request_cache_name.clone(),
                reason: "lock_request_cache_name must differ from lock_cache_name".to_string(),
            }));
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CONCORD_SERVER_NUMBER`: this node's server number (required)
    /// - `CONCORD_ID_EPOCH_MILLIS`: ID epoch in Unix milliseconds (default: 2010-01-01)
    /// - `CONCORD_LOCK_WAIT_TIMEOUT_MS`: lock wait budget (default: 30000)
    /// - `CONCORD_LOCK_INITIAL_BACKOFF_MS`: first lock retry backoff (default: 10)
    /// - `CONCORD_LOCK_MAX_BACKOFF_MS`: lock retry backoff ceiling (default: 500)
    pub fn from_env() -> ConcordResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ConcordConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> ConcordResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup("CONCORD_SERVER_NUMBER").ok_or_else(|| {
            ConcordError::Config(ConfigError::MissingRequired {
                field: "CONCORD_SERVER_NUMBER".to_string(),
            })
        })?;
        let server_number = raw.trim().parse::<u16>().map_err(|e| {
            ConcordError::Config(ConfigError::InvalidValue {
                field: "CONCORD_SERVER_NUMBER".to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })?;

        let defaults = Self::new(server_number);
        let millis = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let config = Self {
            id_epoch_millis: lookup("CONCORD_ID_EPOCH_MILLIS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.id_epoch_millis),
            lock_wait_timeout: millis("CONCORD_LOCK_WAIT_TIMEOUT_MS", defaults.lock_wait_timeout),
            lock_initial_backoff: millis(
                "CONCORD_LOCK_INITIAL_BACKOFF_MS",
                defaults.lock_initial_backoff,
            ),
            lock_max_backoff: millis("CONCORD_LOCK_MAX_BACKOFF_MS", defaults.lock_max_backoff),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// TESTS
// =============================================================================
