//! Narrow lookup facade over scoped caches.

use concord_core::{CacheError, ConcordResult};
use std::sync::Arc;

use super::scoped::{CacheValue, ScopedCache};

/// The five basic cache operations, for code that should not care which
/// scope (or which view) it is talking to.
pub trait CacheLookup<V> {
    fn get(&self, key: &str) -> ConcordResult<Option<V>>;

    fn put(&self, key: &str, value: V) -> ConcordResult<Option<V>>;

    fn remove(&self, key: &str) -> ConcordResult<Option<V>>;

    fn contains_key(&self, key: &str) -> ConcordResult<bool>;

    fn clear(&self) -> ConcordResult<()>;
}

impl<V: CacheValue> CacheLookup<V> for ScopedCache<V> {
    fn get(&self, key: &str) -> ConcordResult<Option<V>> {
        ScopedCache::get(self, key)
    }

    fn put(&self, key: &str, value: V) -> ConcordResult<Option<V>> {
        ScopedCache::put(self, key, value)
    }

    fn remove(&self, key: &str) -> ConcordResult<Option<V>> {
        ScopedCache::remove(self, key)
    }

    fn contains_key(&self, key: &str) -> ConcordResult<bool> {
        ScopedCache::contains_key(self, key)
    }

    fn clear(&self) -> ConcordResult<()> {
        ScopedCache::clear(self)
    }
}

impl<V, L: CacheLookup<V> + ?Sized> CacheLookup<V> for Arc<L> {
    fn get(&self, key: &str) -> ConcordResult<Option<V>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: V) -> ConcordResult<Option<V>> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> ConcordResult<Option<V>> {
        (**self).remove(key)
    }

    fn contains_key(&self, key: &str) -> ConcordResult<bool> {
        (**self).contains_key(key)
    }

    fn clear(&self) -> ConcordResult<()> {
        (**self).clear()
    }
}

const READ_ONLY: &str = "read-only";

/// A view that reads through to a cache and refuses every mutation with
/// [`CacheError::UnsupportedForView`].
#[derive(Debug)]
pub struct ReadOnlyView<V> {
    cache: Arc<ScopedCache<V>>,
}

impl<V> Clone for ReadOnlyView<V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<V: CacheValue> ReadOnlyView<V> {
    pub fn new(cache: Arc<ScopedCache<V>>) -> Self {
        Self { cache }
    }

    fn refuse<T>(operation: &'static str) -> ConcordResult<T> {
        Err(CacheError::UnsupportedForView {
            operation,
            view: READ_ONLY,
        }
        .into())
    }
}

impl<V: CacheValue> CacheLookup<V> for ReadOnlyView<V> {
    fn get(&self, key: &str) -> ConcordResult<Option<V>> {
        self.cache.get(key)
    }

    fn put(&self, _key: &str, _value: V) -> ConcordResult<Option<V>> {
        Self::refuse("put")
    }

    fn remove(&self, _key: &str) -> ConcordResult<Option<V>> {
        Self::refuse("remove")
    }

    fn contains_key(&self, key: &str) -> ConcordResult<bool> {
        self.cache.contains_key(key)
    }

    fn clear(&self) -> ConcordResult<()> {
        Self::refuse("clear")
    }
}
