//! Bound resources and the bindings that carry their release hooks.

/// A value that must be told when it stops being reachable through a cache.
///
/// Stored with [`ScopedCache::put_bound`](super::ScopedCache::put_bound).
/// The cache calls [`unbind`](BoundResource::unbind) exactly once per
/// binding: on remove, on overwrite, on clear or `remove_children`, and when
/// the owning thread or request scope is torn down.
///
/// `unbind` runs after the cache has released its internal lock, so it may
/// use other caches (or this one) freely.
pub trait BoundResource {
    fn unbind(&self);
}

fn release_bound<V: BoundResource>(value: &V) {
    value.unbind();
}

/// One stored value plus its optional release hook.
///
/// Dropping the binding fires the hook, so every path that takes a value out
/// of a cache (and dropping the cache itself) releases it. Callers must drop
/// bindings only after letting go of the cache lock.
pub(crate) struct Binding<V> {
    pub(crate) value: V,
    release: Option<fn(&V)>,
}

impl<V> Binding<V> {
    pub(crate) fn plain(value: V) -> Self {
        Self {
            value,
            release: None,
        }
    }

    pub(crate) fn bound(value: V) -> Self
    where
        V: BoundResource,
    {
        Self {
            value,
            release: Some(release_bound::<V>),
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.release.is_some()
    }
}

impl<V: Clone> Binding<V> {
    /// Release the binding and hand back its value.
    pub(crate) fn into_value(self) -> V {
        let value = self.value.clone();
        drop(self);
        value
    }
}

impl<V> Drop for Binding<V> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(&self.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Probe(Arc<AtomicUsize>);

    impl BoundResource for Probe {
        fn unbind(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_bound_binding_releases_once_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let binding = Binding::bound(Probe(count.clone()));
        assert!(binding.is_bound());
        drop(binding);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_into_value_releases_and_returns_value() {
        let count = Arc::new(AtomicUsize::new(0));
        let value = Binding::bound(Probe(count.clone())).into_value();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(value);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_plain_binding_never_releases() {
        let count = Arc::new(AtomicUsize::new(0));
        let binding = Binding::plain(Probe(count.clone()));
        assert!(!binding.is_bound());
        drop(binding);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
