//! The cache registry: one cache per name and scope.

use concord_core::{CacheError, CacheScope, ConcordError, ConcordResult, NodeId};
use dashmap::DashMap;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use super::context::{ContextId, RequestGuard, ThreadScopeGuard};
use super::replicated::ReplicatedStore;
use super::scoped::{CacheValue, ClusterValue, Codec, Publisher, ScopedCache};
use crate::cluster::{ClusterEvent, ClusterMessage, ClusterSink, ClusterTransport};

/// Scope-independent handle the registry keeps for each cache.
trait ErasedCache: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn teardown(&self, context: ContextId) -> ConcordResult<usize>;

    fn invalidate(&self, event: &ClusterEvent) -> ConcordResult<usize>;
}

impl<V: CacheValue> ErasedCache for ScopedCache<V> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn teardown(&self, context: ContextId) -> ConcordResult<usize> {
        ScopedCache::teardown(self, context)
    }

    fn invalidate(&self, event: &ClusterEvent) -> ConcordResult<usize> {
        ScopedCache::invalidate(self, event)
    }
}

struct Registered {
    cache: Arc<dyn ErasedCache>,
    value_type: &'static str,
}

type CacheKey = (String, CacheScope);

/// Factory and owner of every cache on one node.
///
/// Hands out a single shared [`ScopedCache`] per `(name, scope)`; asking
/// again returns the same instance. The registry is also this node's
/// endpoint on the cluster transport (if any): it applies replicated events
/// to node-wide raw stores and forwards invalidations to its caches.
///
/// The hosting framework drives scope lifecycles through
/// [`begin_request`](Self::begin_request), [`bind_thread`](Self::bind_thread)
/// and [`unbind`](Self::unbind). A thread that exits without unbinding has
/// its thread contexts torn down on the way out.
pub struct CacheRegistry {
    node_id: NodeId,
    caches: RwLock<HashMap<CacheKey, Registered>>,
    replicated: DashMap<String, Arc<ReplicatedStore>>,
    transport: Option<Arc<dyn ClusterTransport>>,
    this: Weak<CacheRegistry>,
}

impl CacheRegistry {
    /// A registry for a node that is not part of a cluster.
    ///
    /// Cluster scoped caches still work; their mutations just go nowhere.
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// A registry that joins the cluster behind `transport`.
    pub fn with_transport(transport: Arc<dyn ClusterTransport>) -> Arc<Self> {
        let registry = Self::build(Some(Arc::clone(&transport)));
        let sink: Weak<dyn ClusterSink> = Arc::downgrade(&registry) as Weak<dyn ClusterSink>;
        transport.subscribe(registry.node_id, sink);
        tracing::debug!(node = %registry.node_id, "cache registry joined cluster");
        registry
    }

    fn build(transport: Option<Arc<dyn ClusterTransport>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            node_id: NodeId::new(),
            caches: RwLock::new(HashMap::new()),
            replicated: DashMap::new(),
            transport,
            this: this.clone(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn is_clustered(&self) -> bool {
        self.transport.is_some()
    }

    /// Cache for values that can be serialized; valid for every scope.
    pub fn get_cache<V: ClusterValue>(
        &self,
        name: &str,
        scope: CacheScope,
    ) -> ConcordResult<Arc<ScopedCache<V>>> {
        self.get_or_create(name, scope, || match scope {
            CacheScope::ClusterReplicated => ScopedCache::replicated(
                name,
                self.replicated_store(name),
                Codec::json(),
                self.publisher(),
            ),
            _ => self.local_cache(name, scope),
        })
    }

    /// Cache for values that never leave this process.
    ///
    /// Fails with [`CacheError::RequiresSerialization`] for
    /// [`CacheScope::ClusterReplicated`].
    pub fn get_object_cache<V: CacheValue>(
        &self,
        name: &str,
        scope: CacheScope,
    ) -> ConcordResult<Arc<ScopedCache<V>>> {
        if scope == CacheScope::ClusterReplicated {
            return Err(CacheError::RequiresSerialization {
                name: name.to_string(),
                scope,
            }
            .into());
        }
        self.get_or_create(name, scope, || self.local_cache(name, scope))
    }

    /// Names and scopes of every cache created so far, sorted.
    pub fn cache_names(&self) -> ConcordResult<Vec<(String, CacheScope)>> {
        let caches = self.caches.read().map_err(|_| self.poisoned())?;
        let mut names: Vec<_> = caches.keys().cloned().collect();
        names.sort_by(|l, r| l.0.cmp(&r.0).then(l.1.as_str().cmp(r.1.as_str())));
        Ok(names)
    }

    /// Open a request context on the current thread.
    pub fn begin_request(self: &Arc<Self>) -> RequestGuard {
        RequestGuard::open(Arc::clone(self))
    }

    /// Tie the current thread's thread scope to the returned guard.
    pub fn bind_thread(self: &Arc<Self>) -> ThreadScopeGuard {
        ThreadScopeGuard::open(Arc::clone(self))
    }

    /// Tear down `scope` for the current thread or request.
    ///
    /// Releases every entry of the current context in every cache of that
    /// scope and returns how many went away. Calling it again releases
    /// nothing. Scopes that are not context-bound have nothing to unbind.
    pub fn unbind(&self, scope: CacheScope) -> usize {
        match ContextId::current(scope) {
            Some(context) => self.teardown(scope, context),
            None => {
                tracing::debug!(scope = %scope, "scope is not context-bound, nothing to unbind");
                0
            }
        }
    }

    pub(crate) fn teardown(&self, scope: CacheScope, context: ContextId) -> usize {
        // Teardown has no caller to report to, so it runs even on a poisoned map.
        let targets: Vec<(String, Arc<dyn ErasedCache>)> = self
            .caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((_, cache_scope), _)| *cache_scope == scope)
            .map(|((name, _), registered)| (name.clone(), Arc::clone(&registered.cache)))
            .collect();

        let mut released = 0;
        for (name, cache) in targets {
            match cache.teardown(context) {
                Ok(count) => released += count,
                Err(e) => {
                    tracing::warn!(cache = %name, scope = %scope, error = %e, "scope teardown failed")
                }
            }
        }
        if released > 0 {
            tracing::debug!(scope = %scope, ?context, released, "scope torn down");
        }
        released
    }

    fn get_or_create<V: CacheValue>(
        &self,
        name: &str,
        scope: CacheScope,
        create: impl FnOnce() -> ScopedCache<V>,
    ) -> ConcordResult<Arc<ScopedCache<V>>> {
        let key: CacheKey = (name.to_string(), scope);
        {
            let caches = self.caches.read().map_err(|_| self.poisoned())?;
            if let Some(existing) = caches.get(&key) {
                return Self::downcast(existing, name, scope);
            }
        }

        // Seeding a replicated store waits on the transport, which may be
        // delivering to this registry; build before taking the write lock.
        let candidate = Arc::new(create());

        let mut caches = self.caches.write().map_err(|_| self.poisoned())?;
        if let Some(existing) = caches.get(&key) {
            return Self::downcast(existing, name, scope);
        }
        caches.insert(
            key,
            Registered {
                cache: candidate.clone(),
                value_type: type_name::<V>(),
            },
        );
        tracing::debug!(
            cache = %name,
            scope = %scope,
            value_type = type_name::<V>(),
            "cache created"
        );
        Ok(candidate)
    }

    fn downcast<V: CacheValue>(
        registered: &Registered,
        name: &str,
        scope: CacheScope,
    ) -> ConcordResult<Arc<ScopedCache<V>>> {
        Arc::clone(&registered.cache)
            .into_any()
            .downcast::<ScopedCache<V>>()
            .map_err(|_| {
                CacheError::TypeMismatch {
                    name: name.to_string(),
                    scope,
                    expected: type_name::<V>(),
                    found: registered.value_type,
                }
                .into()
            })
    }

    fn local_cache<V: CacheValue>(&self, name: &str, scope: CacheScope) -> ScopedCache<V> {
        let publisher = if scope.is_cluster() {
            self.publisher()
        } else {
            None
        };
        ScopedCache::local(name, scope, publisher, self.this.clone())
    }

    fn publisher(&self) -> Option<Publisher> {
        self.transport.as_ref().map(|transport| Publisher {
            node: self.node_id,
            transport: Arc::clone(transport),
        })
    }

    fn raw_store(&self, name: &str) -> Arc<ReplicatedStore> {
        if let Some(store) = self.replicated.get(name) {
            return Arc::clone(store.value());
        }
        Arc::clone(self.replicated.entry(name.to_string()).or_default().value())
    }

    /// Raw store for `name`, seeded from the cluster the first time a typed
    /// cache asks for it.
    fn replicated_store(&self, name: &str) -> Arc<ReplicatedStore> {
        let store = self.raw_store(name);
        if let Some(transport) = &self.transport {
            store.seed_once(|store| {
                transport.snapshot(name, &mut |key, value| {
                    store.insert(key.to_string(), value.clone());
                });
                tracing::debug!(cache = %name, entries = store.len(), "replicated cache seeded");
            });
        }
        store
    }

    fn poisoned(&self) -> ConcordError {
        CacheError::LockPoisoned {
            cache: "registry".to_string(),
        }
        .into()
    }
}

impl ClusterSink for CacheRegistry {
    fn deliver(&self, message: &ClusterMessage) {
        if message.origin == self.node_id {
            return;
        }
        match message.scope {
            CacheScope::ClusterReplicated => {
                self.raw_store(&message.cache).apply(&message.event);
            }
            CacheScope::ClusterInvalidated => {
                let key: CacheKey = (message.cache.clone(), message.scope);
                let cache = self
                    .caches
                    .read()
                    .ok()
                    .and_then(|caches| caches.get(&key).map(|r| Arc::clone(&r.cache)));
                if let Some(cache) = cache {
                    if let Err(e) = cache.invalidate(&message.event) {
                        tracing::warn!(cache = %message.cache, error = %e, "invalidation failed");
                    }
                }
            }
            scope => {
                tracing::warn!(cache = %message.cache, scope = %scope, "ignoring cluster message for a process-local scope");
            }
        }
    }
}

impl Drop for CacheRegistry {
    fn drop(&mut self) {
        if let Some(transport) = &self.transport {
            transport.unsubscribe(self.node_id);
        }
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("node_id", &self.node_id)
            .field("clustered", &self.is_clustered())
            .field("replicated_stores", &self.replicated.len())
            .finish_non_exhaustive()
    }
}
