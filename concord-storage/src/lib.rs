//! Concord Storage - Scoped Caches
//!
//! Named, typed caches with thread, request, instance and cluster scopes,
//! the registry handing them out, and the transport seam that carries
//! cluster scoped mutations between nodes.

pub mod cache;
pub mod cluster;

pub use cache::{
    current_request, BoundResource, CacheHolder, CacheLookup, CacheRegistry, CacheStats,
    CacheValue, ClusterValue, ContextId, ReadOnlyView, ReplicatedStore, RequestGuard,
    ScopedCache, ThreadScopeGuard,
};
pub use cluster::{ClusterEvent, ClusterMessage, ClusterSink, ClusterTransport, LocalClusterHub};
