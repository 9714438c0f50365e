//! Identity types for Concord cluster members

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Highest server number a cluster member may use.
///
/// The last four decimal digits of every identifier are reserved for the
/// server number, so at most 10,000 members can coexist.
pub const MAX_SERVER_NUMBER: u16 = 9_999;

/// Number of decimal slots reserved for the server number in a composed ID.
pub const SERVER_NUMBER_SLOTS: u128 = 10_000;

/// Identifier of one running process participating in the cluster.
///
/// Uses UUIDv7 so node identifiers sort by start time in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Mint a fresh node identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Small per-process number, unique per cluster member, baked into every ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct ServerNumber(u16);

impl ServerNumber {
    /// Create a validated server number.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `value` exceeds [`MAX_SERVER_NUMBER`].
    pub fn new(value: u16) -> Result<Self, ConfigError> {
        if value > MAX_SERVER_NUMBER {
            return Err(ConfigError::InvalidValue {
                field: "server_number".to_string(),
                value: value.to_string(),
                reason: format!("server_number must be at most {}", MAX_SERVER_NUMBER),
            });
        }
        Ok(Self(value))
    }

    /// Get the raw value.
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for ServerNumber {
    type Error = ConfigError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServerNumber> for u16 {
    fn from(value: ServerNumber) -> Self {
        value.0
    }
}

impl fmt::Display for ServerNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_number_bounds() {
        assert_eq!(ServerNumber::new(0).map(ServerNumber::get), Ok(0));
        assert_eq!(
            ServerNumber::new(MAX_SERVER_NUMBER).map(ServerNumber::get),
            Ok(MAX_SERVER_NUMBER)
        );
        assert!(matches!(
            ServerNumber::new(MAX_SERVER_NUMBER + 1),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_server_number_serde_rejects_out_of_range() {
        let ok: ServerNumber = serde_json::from_str("42").unwrap();
        assert_eq!(ok.get(), 42);

        let err = serde_json::from_str::<ServerNumber>("10000");
        assert!(err.is_err());
    }

    #[test]
    fn test_node_ids_are_distinct() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
        assert_eq!(NodeId::from_uuid(a.as_uuid()), a);
    }
}
