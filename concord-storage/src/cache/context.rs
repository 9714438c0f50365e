//! Thread and request contexts for context-bound scopes.
//!
//! A `Thread` scoped cache keeps one map per OS thread. A `Request` scoped
//! cache keeps one map per request, where a request is opened on a thread by
//! [`CacheRegistry::begin_request`](super::CacheRegistry::begin_request).
//! Outside an open request, the request scope falls back to the current
//! thread.
//!
//! Every thread remembers which registries hold entries for its contexts.
//! When a request ends, every registry that saw it is torn down, not just
//! the one that opened it; when the thread exits, its thread contexts are
//! torn down in every registry still alive.

use concord_core::CacheScope;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use super::CacheRegistry;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_REQUEST: Cell<Option<u64>> = const { Cell::new(None) };
    static OPEN_CONTEXTS: OpenContexts = OpenContexts::default();
}

type OpenKey = (CacheScope, ContextId);

/// Registries holding entries for the contexts of one thread.
#[derive(Default)]
struct OpenContexts {
    registries: RefCell<HashMap<OpenKey, Vec<Weak<CacheRegistry>>>>,
}

impl Drop for OpenContexts {
    fn drop(&mut self) {
        for ((scope, context), registries) in std::mem::take(self.registries.get_mut()) {
            let released = teardown_each(scope, context, registries);
            if released > 0 {
                tracing::debug!(scope = %scope, ?context, released, "thread exit released entries");
            }
        }
    }
}

/// Note that `owner` now holds entries for `context`.
pub(crate) fn track_context(scope: CacheScope, context: ContextId, owner: &Weak<CacheRegistry>) {
    if owner.strong_count() == 0 {
        return;
    }
    // Entries written while the thread is already exiting have no later
    // teardown to join.
    let _ = OPEN_CONTEXTS.try_with(|open| {
        let mut open = open.registries.borrow_mut();
        let registries = open.entry((scope, context)).or_default();
        if !registries.iter().any(|known| known.ptr_eq(owner)) {
            registries.push(owner.clone());
        }
    });
}

fn take_tracked(scope: CacheScope, context: ContextId) -> Vec<Weak<CacheRegistry>> {
    OPEN_CONTEXTS
        .try_with(|open| open.registries.borrow_mut().remove(&(scope, context)))
        .ok()
        .flatten()
        .unwrap_or_default()
}

fn teardown_each(
    scope: CacheScope,
    context: ContextId,
    registries: Vec<Weak<CacheRegistry>>,
) -> usize {
    registries
        .iter()
        .filter_map(Weak::upgrade)
        .map(|registry| registry.teardown(scope, context))
        .sum()
}

/// Identity of one live thread or request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    Thread(ThreadId),
    Request(u64),
}

impl ContextId {
    /// Context the current thread is in for `scope`, or `None` for scopes
    /// that are not context-bound.
    pub fn current(scope: CacheScope) -> Option<Self> {
        ContextKind::of(scope).map(ContextKind::current)
    }
}

/// The two kinds of context a context-bound scope can be keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextKind {
    Thread,
    Request,
}

impl ContextKind {
    pub(crate) fn of(scope: CacheScope) -> Option<Self> {
        match scope {
            CacheScope::Thread => Some(Self::Thread),
            CacheScope::Request => Some(Self::Request),
            _ => None,
        }
    }

    pub(crate) fn scope(self) -> CacheScope {
        match self {
            Self::Thread => CacheScope::Thread,
            Self::Request => CacheScope::Request,
        }
    }

    pub(crate) fn current(self) -> ContextId {
        let on_thread = || ContextId::Thread(thread::current().id());
        match self {
            Self::Thread => on_thread(),
            Self::Request => CURRENT_REQUEST
                .with(Cell::get)
                .map(ContextId::Request)
                .unwrap_or_else(on_thread),
        }
    }
}

/// Id of the request open on this thread, if any.
pub fn current_request() -> Option<u64> {
    CURRENT_REQUEST.with(Cell::get)
}

/// An open request context.
///
/// Dropping the guard (or calling [`RequestGuard::end`]) tears down every
/// request scoped cache entry of this request, in this registry and in any
/// other registry written to while it was open, and restores whatever
/// request was open on the thread before. The guard is tied to the thread
/// that opened it.
#[must_use = "the request ends as soon as the guard is dropped"]
pub struct RequestGuard {
    registry: Arc<CacheRegistry>,
    request: u64,
    previous: Option<u64>,
    ended: bool,
    _not_send: PhantomData<*const ()>,
}

impl RequestGuard {
    pub(crate) fn open(registry: Arc<CacheRegistry>) -> Self {
        let request = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let previous = CURRENT_REQUEST.with(|current| current.replace(Some(request)));
        tracing::debug!(request, "request context opened");
        Self {
            registry,
            request,
            previous,
            ended: false,
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.request
    }

    /// End the request now; returns how many entries were released.
    pub fn end(mut self) -> usize {
        self.finish()
    }

    fn finish(&mut self) -> usize {
        if self.ended {
            return 0;
        }
        self.ended = true;
        CURRENT_REQUEST.with(|current| current.set(self.previous));
        let context = ContextId::Request(self.request);
        let own = Arc::downgrade(&self.registry);
        let mut registries = take_tracked(CacheScope::Request, context);
        if !registries.iter().any(|known| known.ptr_eq(&own)) {
            registries.push(own);
        }
        let released = teardown_each(CacheScope::Request, context, registries);
        tracing::debug!(request = self.request, released, "request context closed");
        released
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Thread scope binding; dropping it unbinds the thread scope of the
/// thread that created it.
#[must_use = "the thread scope is unbound as soon as the guard is dropped"]
pub struct ThreadScopeGuard {
    registry: Arc<CacheRegistry>,
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl ThreadScopeGuard {
    pub(crate) fn open(registry: Arc<CacheRegistry>) -> Self {
        Self {
            registry,
            thread: thread::current().id(),
            _not_send: PhantomData,
        }
    }
}

impl Drop for ThreadScopeGuard {
    fn drop(&mut self) {
        self.registry
            .teardown(CacheScope::Thread, ContextId::Thread(self.thread));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_context_scopes_have_no_context() {
        assert_eq!(ContextId::current(CacheScope::Instance), None);
        assert_eq!(ContextId::current(CacheScope::ClusterReplicated), None);
        assert_eq!(ContextId::current(CacheScope::ClusterInvalidated), None);
    }

    #[test]
    fn test_request_falls_back_to_thread() {
        assert_eq!(current_request(), None);
        assert_eq!(
            ContextId::current(CacheScope::Request),
            ContextId::current(CacheScope::Thread)
        );
    }

    #[test]
    fn test_threads_get_distinct_contexts() {
        let here = ContextId::current(CacheScope::Thread);
        let there = thread::spawn(|| ContextId::current(CacheScope::Thread))
            .join()
            .unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_request_guard_nests_and_restores() {
        let registry = CacheRegistry::new();
        let outer = registry.begin_request();
        assert_eq!(current_request(), Some(outer.id()));
        {
            let inner = registry.begin_request();
            assert_ne!(inner.id(), outer.id());
            assert_eq!(
                ContextId::current(CacheScope::Request),
                Some(ContextId::Request(inner.id()))
            );
        }
        assert_eq!(current_request(), Some(outer.id()));
        outer.end();
        assert_eq!(current_request(), None);
    }
}
