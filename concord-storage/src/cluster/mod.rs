//! Cluster propagation for the two cluster cache scopes.
//!
//! A [`ClusterTransport`] carries [`ClusterMessage`]s between the registries
//! of cluster members. `ClusterReplicated` caches publish every mutation with
//! its encoded value; `ClusterInvalidated` caches publish only invalidation
//! notices so peers drop their local copies. Delivery is fire-and-forget:
//! a write returns once the local copy is updated.
//!
//! The transport is also the single point of cross-node atomicity: the
//! conditional put of a replicated cache is exactly as atomic as
//! [`ClusterTransport::put_if_absent`].

mod local_hub;

pub use local_hub::LocalClusterHub;

use concord_core::{CacheScope, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Weak;

/// One mutation of a cluster scoped cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClusterEvent {
    /// New value for `key`; replicated scope only.
    Put { key: String, value: Value },
    Remove { key: String },
    RemoveChildren { prefix: String },
    Clear,
}

/// A [`ClusterEvent`] addressed to one cache on every other member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMessage {
    pub origin: NodeId,
    pub cache: String,
    pub scope: CacheScope,
    pub event: ClusterEvent,
}

/// Receiving end of a member; implemented by the cache registry.
pub trait ClusterSink: Send + Sync {
    fn deliver(&self, message: &ClusterMessage);
}

/// Message fabric between cluster members.
///
/// Implementations must never deliver a message back to its origin.
pub trait ClusterTransport: Send + Sync {
    /// Register a member; the transport keeps only a weak handle.
    fn subscribe(&self, node: NodeId, sink: Weak<dyn ClusterSink>);

    fn unsubscribe(&self, node: NodeId);

    /// Propagate a mutation to every other member.
    fn publish(&self, message: ClusterMessage);

    /// Cluster-wide create-if-absent for one replicated entry.
    ///
    /// Returns the value already present (the insert lost), or `None` when
    /// this insert won and was propagated to the other members.
    fn put_if_absent(&self, origin: NodeId, cache: &str, key: &str, value: Value)
        -> Option<Value>;

    /// Visit the current cluster-wide entries of a replicated cache, with
    /// deliveries for it held off until the visit returns.
    fn snapshot(&self, cache: &str, visit: &mut dyn FnMut(&str, &Value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_format() {
        let message = ClusterMessage {
            origin: NodeId::new(),
            cache: "locks".to_string(),
            scope: CacheScope::ClusterReplicated,
            event: ClusterEvent::Put {
                key: "a/b".to_string(),
                value: json!({"n": 1}),
            },
        };
        let wire = serde_json::to_value(&message).unwrap();
        assert_eq!(wire["scope"], json!("cluster-replicated"));
        assert_eq!(wire["event"]["op"], json!("put"));
        assert_eq!(wire["event"]["key"], json!("a/b"));

        let back: ClusterMessage = serde_json::from_value(wire).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_clear_has_no_payload() {
        let wire = serde_json::to_string(&ClusterEvent::Clear).unwrap();
        assert_eq!(wire, r#"{"op":"clear"}"#);
    }
}
