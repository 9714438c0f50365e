//! Concord Coordination - Cluster-Wide Locks
//!
//! Advisory mutual exclusion over string keys, shared by every node of a
//! cluster:
//! - [`LockManager`] acquires, observes and releases locks
//! - [`Lock`] is the caller's view of one key
//! - [`LockRecord`] is the replicated marker that a key is held
//!
//! Lock records live in a `ClusterReplicated` cache, so every node sees
//! every holder. Each acquisition is also recorded in a `Request` scoped
//! cache as a bound resource; when the request ends (or the thread is
//! unbound, outside a request) the locks it took are released.
//!
//! ```ignore
//! let registry = CacheRegistry::new();
//! let locks = LockManager::from_config(&registry, &ConcordConfig::new(1))?;
//!
//! let request = registry.begin_request();
//! let mut lock = locks.get_lock("orders/42")?;
//! if lock.is_owner() {
//!     // ... exclusive work ...
//!     locks.unlock(&mut lock)?;
//! }
//! drop(request);
//! ```

pub mod lock;
pub mod manager;

pub use lock::{Lock, LockRecord};
pub use manager::LockManager;
