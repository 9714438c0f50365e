//! Error types for Concord operations

use crate::CacheScope;
use std::time::Duration;
use thiserror::Error;

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned: {cache}")]
    LockPoisoned { cache: String },

    #[error("Cache {name} ({scope}) holds {found}, requested as {expected}")]
    TypeMismatch {
        name: String,
        scope: CacheScope,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Cache {name} ({scope}) replicates values and requires a serializable value type")]
    RequiresSerialization { name: String, scope: CacheScope },

    #[error("Cache {name} ({scope}) cannot hold bound resources")]
    BindingNotSupported { name: String, scope: CacheScope },

    #[error("Serialization failed for {name}/{key}: {reason}")]
    Serialization {
        name: String,
        key: String,
        reason: String,
    },

    #[error("Operation {operation} is unsupported for this view ({view})")]
    UnsupportedForView {
        operation: &'static str,
        view: &'static str,
    },
}

/// Advisory lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },

    #[error("Lock {key} is not owned by the caller")]
    NotOwner { key: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Identifier decoding errors.
///
/// Generating identifiers never fails; only parsing their text form can.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Malformed identifier {id}: {reason}")]
    Malformed { id: String, reason: String },
}

/// Master error type for all Concord errors.
#[derive(Debug, Clone, Error)]
pub enum ConcordError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Id error: {0}")]
    Id(#[from] IdError),
}

/// Result type alias for Concord operations.
pub type ConcordResult<T> = Result<T, ConcordError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_type_mismatch() {
        let err = CacheError::TypeMismatch {
            name: "sessions".to_string(),
            scope: CacheScope::Thread,
            expected: "u32",
            found: "alloc::string::String",
        };
        let msg = format!("{}", err);
        assert!(msg.contains("sessions"));
        assert!(msg.contains("thread"));
        assert!(msg.contains("u32"));
    }

    #[test]
    fn test_cache_error_display_unsupported_for_view() {
        let err = CacheError::UnsupportedForView {
            operation: "put",
            view: "read-only",
        };
        let msg = format!("{}", err);
        assert!(msg.contains("unsupported for this view"));
        assert!(msg.contains("put"));
        assert!(msg.contains("read-only"));
    }

    #[test]
    fn test_lock_error_display_timeout() {
        let err = LockError::Timeout {
            key: "/_user/message/admin".to_string(),
            waited: Duration::from_millis(1500),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Timed out"));
        assert!(msg.contains("/_user/message/admin"));
        assert!(msg.contains("1.5s"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "server_number".to_string(),
            value: "12000".to_string(),
            reason: "too large".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("server_number"));
        assert!(msg.contains("12000"));
        assert!(msg.contains("too large"));
    }

    #[test]
    fn test_concord_error_from_variants() {
        let cache = ConcordError::from(CacheError::LockPoisoned {
            cache: "locks".to_string(),
        });
        assert!(matches!(cache, ConcordError::Cache(_)));

        let lock = ConcordError::from(LockError::NotOwner {
            key: "foo".to_string(),
        });
        assert!(matches!(lock, ConcordError::Lock(_)));

        let config = ConcordError::from(ConfigError::MissingRequired {
            field: "server_number".to_string(),
        });
        assert!(matches!(config, ConcordError::Config(_)));

        let id = ConcordError::from(IdError::Malformed {
            id: "!!".to_string(),
            reason: "bad base64".to_string(),
        });
        assert!(matches!(id, ConcordError::Id(_)));
    }
}
