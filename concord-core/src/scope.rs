//! Cache scopes: lifetime and cross-node visibility of a named cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared lifetime and visibility policy of a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheScope {
    /// Visible only to the current thread; torn down when the thread's work completes.
    Thread,
    /// Visible only for the duration of one inbound request.
    Request,
    /// Shared by every thread of this process, never leaves the node.
    Instance,
    /// Writes are pushed to every node in the cluster.
    ClusterReplicated,
    /// Nodes hold local copies; writes invalidate the key elsewhere instead of replicating it.
    ClusterInvalidated,
}

impl CacheScope {
    /// All scopes, in declaration order.
    pub const ALL: [CacheScope; 5] = [
        CacheScope::Thread,
        CacheScope::Request,
        CacheScope::Instance,
        CacheScope::ClusterReplicated,
        CacheScope::ClusterInvalidated,
    ];

    /// Whether writes in this scope are visible to other nodes.
    pub fn is_cluster(&self) -> bool {
        matches!(self, CacheScope::ClusterReplicated | CacheScope::ClusterInvalidated)
    }

    /// Whether entries belong to a thread or request context and are torn down with it.
    pub fn is_context_bound(&self) -> bool {
        matches!(self, CacheScope::Thread | CacheScope::Request)
    }

    /// Stable string form used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheScope::Thread => "thread",
            CacheScope::Request => "request",
            CacheScope::Instance => "instance",
            CacheScope::ClusterReplicated => "cluster-replicated",
            CacheScope::ClusterInvalidated => "cluster-invalidated",
        }
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid cache scope string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheScopeParseError(pub String);

impl fmt::Display for CacheScopeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid cache scope: {}", self.0)
    }
}

impl std::error::Error for CacheScopeParseError {}

impl FromStr for CacheScope {
    type Err = CacheScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "thread" => Ok(CacheScope::Thread),
            "request" => Ok(CacheScope::Request),
            "instance" => Ok(CacheScope::Instance),
            "cluster-replicated" | "clusterreplicated" => Ok(CacheScope::ClusterReplicated),
            "cluster-invalidated" | "clusterinvalidated" => Ok(CacheScope::ClusterInvalidated),
            _ => Err(CacheScopeParseError(s.to_string())),
        }
    }
}
