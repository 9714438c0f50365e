//! Scoped caches and the registry that owns them.
//!
//! Every cache has a name, a value type and a [`CacheScope`] that decides
//! who can see its entries:
//!
//! - `Thread` and `Request` entries belong to one thread or one request and
//!   go away when the host unbinds that context.
//! - `Instance` entries are shared by the whole node.
//! - `ClusterReplicated` entries are copied to every node.
//! - `ClusterInvalidated` entries stay local, but a write on one node tells
//!   the others to drop their copy.
//!
//! # Bound resources
//!
//! Values stored with [`ScopedCache::put_bound`] implement
//! [`BoundResource`] and are told exactly once when they leave the cache,
//! whichever way that happens. This is how request-scoped state (such as
//! held locks) cleans up after itself.
//!
//! # Example
//!
//! ```ignore
//! let registry = CacheRegistry::with_transport(hub);
//! let sessions = registry.get_cache::<Session>("sessions", CacheScope::ClusterReplicated)?;
//! sessions.put("user/42", session)?;
//!
//! let request = registry.begin_request();
//! let scratch = registry.get_object_cache::<CacheHolder>("scratch", CacheScope::Request)?;
//! scratch.put("parsed", CacheHolder::new(parsed))?;
//! drop(request); // scratch entries of this request are gone
//! ```
//!
//! [`CacheScope`]: concord_core::CacheScope

pub mod bound;
pub mod context;
pub mod holder;
pub mod keys;
pub mod lookup;
pub mod registry;
pub mod replicated;
pub mod scoped;
pub mod stats;

pub use bound::BoundResource;
pub use context::{current_request, ContextId, RequestGuard, ThreadScopeGuard};
pub use holder::CacheHolder;
pub use keys::{is_same_or_child, join, KEY_SEPARATOR};
pub use lookup::{CacheLookup, ReadOnlyView};
pub use registry::CacheRegistry;
pub use replicated::ReplicatedStore;
pub use scoped::{CacheValue, ClusterValue, ScopedCache};
pub use stats::CacheStats;
