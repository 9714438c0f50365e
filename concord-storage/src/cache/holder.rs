//! Opaque holder for arbitrary domain objects.

use chrono::Utc;
use concord_core::Timestamp;
use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

/// Type-erased value plus the instant it was cached.
///
/// Lets higher layers park objects of any type in an object cache
/// (`ScopedCache<CacheHolder>`) and recover them by type later. Cloning is
/// cheap; clones share the same underlying object.
#[derive(Clone)]
pub struct CacheHolder {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    cached_at: Timestamp,
}

impl CacheHolder {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: any::type_name::<T>(),
            cached_at: Utc::now(),
        }
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Shared handle to the held object if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Name of the held type, for diagnostics only.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }
}

impl fmt::Debug for CacheHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHolder")
            .field("type_name", &self.type_name)
            .field("cached_at", &self.cached_at)
            .finish_non_exhaustive()
    }
}
