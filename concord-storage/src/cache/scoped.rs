//! Named, typed caches with a declared scope.

use concord_core::{CacheError, CacheScope, ConcordError, ConcordResult, NodeId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use super::bound::{Binding, BoundResource};
use super::context::{track_context, ContextId, ContextKind};
use super::keys::is_same_or_child;
use super::registry::CacheRegistry;
use super::replicated::ReplicatedStore;
use super::stats::CacheStats;
use crate::cluster::{ClusterEvent, ClusterMessage, ClusterTransport};

/// Values any cache can hold.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

/// Values that can also leave the process, as cluster-replicated caches require.
pub trait ClusterValue: CacheValue + Serialize + DeserializeOwned {}

impl<T> ClusterValue for T where T: CacheValue + Serialize + DeserializeOwned {}

type EntryMap<V> = HashMap<String, Binding<V>>;

fn poisoned(cache: &str) -> ConcordError {
    CacheError::LockPoisoned {
        cache: cache.to_string(),
    }
    .into()
}

/// Where a cluster scoped cache sends its mutations.
#[derive(Clone)]
pub(crate) struct Publisher {
    pub(crate) node: NodeId,
    pub(crate) transport: Arc<dyn ClusterTransport>,
}

/// JSON codec for replicated values, captured when the cache is created so
/// the cache itself needs no serde bounds.
pub(crate) struct Codec<V> {
    encode: fn(&V) -> serde_json::Result<Value>,
    decode: fn(Value) -> serde_json::Result<V>,
}

fn encode_json<V: Serialize>(value: &V) -> serde_json::Result<Value> {
    serde_json::to_value(value)
}

impl<V: ClusterValue> Codec<V> {
    pub(crate) fn json() -> Self {
        Self {
            encode: encode_json::<V>,
            decode: serde_json::from_value::<V>,
        }
    }
}

impl<V> Codec<V> {
    fn encode(&self, cache: &str, key: &str, value: &V) -> ConcordResult<Value> {
        (self.encode)(value).map_err(|e| serialization(cache, key, e))
    }

    fn decode(&self, cache: &str, key: &str, raw: Value) -> ConcordResult<V> {
        (self.decode)(raw).map_err(|e| serialization(cache, key, e))
    }
}

fn serialization(cache: &str, key: &str, e: serde_json::Error) -> ConcordError {
    CacheError::Serialization {
        name: cache.to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    }
    .into()
}

/// In-process entries: one map per context, or one map for the node.
enum LocalEntries<V> {
    PerContext {
        kind: ContextKind,
        contexts: RwLock<HashMap<ContextId, EntryMap<V>>>,
        /// Registry to tear down when a context of this thread ends.
        owner: Weak<CacheRegistry>,
    },
    Shared(RwLock<EntryMap<V>>),
}

impl<V> LocalEntries<V> {
    fn for_scope(scope: CacheScope, owner: Weak<CacheRegistry>) -> Self {
        match ContextKind::of(scope) {
            Some(kind) => Self::PerContext {
                kind,
                contexts: RwLock::new(HashMap::new()),
                owner,
            },
            None => Self::Shared(RwLock::new(HashMap::new())),
        }
    }

    fn read<R>(&self, cache: &str, f: impl FnOnce(Option<&EntryMap<V>>) -> R) -> ConcordResult<R> {
        match self {
            Self::PerContext { kind, contexts, .. } => {
                let context = kind.current();
                let contexts = contexts.read().map_err(|_| poisoned(cache))?;
                Ok(f(contexts.get(&context)))
            }
            Self::Shared(entries) => {
                let entries = entries.read().map_err(|_| poisoned(cache))?;
                Ok(f(Some(&*entries)))
            }
        }
    }

    /// Mutate the current context's entries.
    ///
    /// Whatever `f` takes out of the map must be returned, not dropped, so
    /// release hooks run after the lock is gone.
    fn write<R>(&self, cache: &str, f: impl FnOnce(&mut EntryMap<V>) -> R) -> ConcordResult<R> {
        match self {
            Self::PerContext {
                kind,
                contexts,
                owner,
            } => {
                let context = kind.current();
                let (out, opened) = {
                    let mut contexts = contexts.write().map_err(|_| poisoned(cache))?;
                    let opened = !contexts.contains_key(&context);
                    let entries = contexts.entry(context).or_default();
                    let out = f(entries);
                    let kept = !entries.is_empty();
                    if !kept {
                        contexts.remove(&context);
                    }
                    (out, opened && kept)
                };
                if opened {
                    track_context(kind.scope(), context, owner);
                }
                Ok(out)
            }
            Self::Shared(entries) => {
                let mut entries = entries.write().map_err(|_| poisoned(cache))?;
                Ok(f(&mut *entries))
            }
        }
    }

    fn take_context(&self, cache: &str, context: ContextId) -> ConcordResult<EntryMap<V>> {
        match self {
            Self::PerContext { contexts, .. } => {
                let mut contexts = contexts.write().map_err(|_| poisoned(cache))?;
                Ok(contexts.remove(&context).unwrap_or_default())
            }
            Self::Shared(_) => Ok(HashMap::new()),
        }
    }
}

struct ReplicatedEntries<V> {
    store: Arc<ReplicatedStore>,
    codec: Codec<V>,
}

enum Backend<V> {
    Local(LocalEntries<V>),
    Replicated(ReplicatedEntries<V>),
}

/// A named key/value container with a declared [`CacheScope`].
///
/// Obtained from [`CacheRegistry`](super::CacheRegistry), which hands out one
/// instance per name and scope. Keys are `/`-separated paths. Every
/// operation is synchronous and returns once the local copy is updated;
/// cluster scopes then propagate through the registry's transport.
///
/// Values taken out of the cache (by remove, overwrite, clear, or scope
/// teardown) that were stored with [`put_bound`](Self::put_bound) have their
/// [`BoundResource::unbind`] hook called exactly once.
pub struct ScopedCache<V> {
    name: String,
    scope: CacheScope,
    backend: Backend<V>,
    publisher: Option<Publisher>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> fmt::Debug for ScopedCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCache")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("clustered", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

impl<V: CacheValue> ScopedCache<V> {
    /// A cache whose entries stay in this process.
    ///
    /// Thread and request contexts opened in this cache are reported to
    /// `owner`, which tears them down when the request ends or the thread
    /// exits.
    pub(crate) fn local(
        name: &str,
        scope: CacheScope,
        publisher: Option<Publisher>,
        owner: Weak<CacheRegistry>,
    ) -> Self {
        Self::with_backend(
            name,
            scope,
            Backend::Local(LocalEntries::for_scope(scope, owner)),
            publisher,
        )
    }

    /// A cluster-replicated cache over a node-wide raw store.
    pub(crate) fn replicated(
        name: &str,
        store: Arc<ReplicatedStore>,
        codec: Codec<V>,
        publisher: Option<Publisher>,
    ) -> Self {
        Self::with_backend(
            name,
            CacheScope::ClusterReplicated,
            Backend::Replicated(ReplicatedEntries { store, codec }),
            publisher,
        )
    }

    fn with_backend(
        name: &str,
        scope: CacheScope,
        backend: Backend<V>,
        publisher: Option<Publisher>,
    ) -> Self {
        Self {
            name: name.to_string(),
            scope,
            backend,
            publisher,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    pub fn get(&self, key: &str) -> ConcordResult<Option<V>> {
        let found = match &self.backend {
            Backend::Local(local) => local.read(&self.name, |entries| {
                entries
                    .and_then(|entries| entries.get(key))
                    .map(|binding| binding.value.clone())
            })?,
            Backend::Replicated(replicated) => replicated
                .store
                .get(key)
                .map(|raw| replicated.codec.decode(&self.name, key, raw))
                .transpose()?,
        };

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    /// Store `value`, returning the value it replaced.
    pub fn put(&self, key: &str, value: V) -> ConcordResult<Option<V>> {
        match &self.backend {
            Backend::Local(local) => self.put_local(local, key, Binding::plain(value)),
            Backend::Replicated(replicated) => {
                let raw = replicated.codec.encode(&self.name, key, &value)?;
                let previous = replicated.store.insert(key.to_string(), raw.clone());
                self.publish(ClusterEvent::Put {
                    key: key.to_string(),
                    value: raw,
                });
                previous
                    .map(|raw| replicated.codec.decode(&self.name, key, raw))
                    .transpose()
            }
        }
    }

    /// Store a bound resource; its `unbind` hook fires once it leaves the cache.
    ///
    /// Only process-local scopes accept bindings.
    pub fn put_bound(&self, key: &str, value: V) -> ConcordResult<Option<V>>
    where
        V: BoundResource,
    {
        match &self.backend {
            Backend::Local(local) if !self.scope.is_cluster() => {
                self.put_local(local, key, Binding::bound(value))
            }
            _ => Err(CacheError::BindingNotSupported {
                name: self.name.clone(),
                scope: self.scope,
            }
            .into()),
        }
    }

    fn put_local(
        &self,
        local: &LocalEntries<V>,
        key: &str,
        binding: Binding<V>,
    ) -> ConcordResult<Option<V>> {
        let previous = local.write(&self.name, |entries| {
            entries.insert(key.to_string(), binding)
        })?;
        self.publish(ClusterEvent::Remove {
            key: key.to_string(),
        });
        Ok(previous.map(Binding::into_value))
    }

    /// Store `value` unless the key is present.
    ///
    /// Returns the present value when the insert lost, `None` when it won.
    /// Atomic on this node; across nodes, as atomic as the transport's
    /// conditional put.
    pub fn put_if_absent(&self, key: &str, value: V) -> ConcordResult<Option<V>> {
        match &self.backend {
            Backend::Local(local) => {
                let existing = local.write(&self.name, |entries| {
                    match entries.entry(key.to_string()) {
                        Entry::Occupied(present) => Some(present.get().value.clone()),
                        Entry::Vacant(slot) => {
                            slot.insert(Binding::plain(value));
                            None
                        }
                    }
                })?;
                if existing.is_none() {
                    self.publish(ClusterEvent::Remove {
                        key: key.to_string(),
                    });
                }
                Ok(existing)
            }
            Backend::Replicated(replicated) => {
                let raw = replicated.codec.encode(&self.name, key, &value)?;
                let existing = match &self.publisher {
                    Some(publisher) => {
                        let existing = publisher.transport.put_if_absent(
                            publisher.node,
                            &self.name,
                            key,
                            raw.clone(),
                        );
                        let winner = existing.clone().unwrap_or(raw);
                        replicated.store.insert(key.to_string(), winner);
                        existing
                    }
                    None => replicated.store.insert_if_absent(key.to_string(), raw),
                };
                existing
                    .map(|raw| replicated.codec.decode(&self.name, key, raw))
                    .transpose()
            }
        }
    }

    pub fn remove(&self, key: &str) -> ConcordResult<Option<V>> {
        let removed = match &self.backend {
            Backend::Local(local) => local
                .write(&self.name, |entries| entries.remove(key))?
                .map(Binding::into_value),
            Backend::Replicated(replicated) => replicated
                .store
                .remove(key)
                .map(|raw| replicated.codec.decode(&self.name, key, raw))
                .transpose()?,
        };
        self.publish(ClusterEvent::Remove {
            key: key.to_string(),
        });
        Ok(removed)
    }

    /// Remove `key` only if its current value satisfies `predicate`.
    ///
    /// The check and the removal are atomic on this node. `predicate` runs
    /// while the cache is locked and must not call back into it.
    pub fn remove_if<F>(&self, key: &str, predicate: F) -> ConcordResult<Option<V>>
    where
        F: FnOnce(&V) -> bool,
    {
        let removed = match &self.backend {
            Backend::Local(local) => local
                .write(&self.name, |entries| {
                    if entries.get(key).is_some_and(|binding| predicate(&binding.value)) {
                        entries.remove(key)
                    } else {
                        None
                    }
                })?
                .map(Binding::into_value),
            Backend::Replicated(replicated) => {
                let Some(raw) = replicated.store.get(key) else {
                    return Ok(None);
                };
                let current = replicated.codec.decode(&self.name, key, raw.clone())?;
                if predicate(&current) && replicated.store.remove_if_eq(key, &raw) {
                    Some(current)
                } else {
                    None
                }
            }
        };
        if removed.is_some() {
            self.publish(ClusterEvent::Remove {
                key: key.to_string(),
            });
        }
        Ok(removed)
    }

    pub fn contains_key(&self, key: &str) -> ConcordResult<bool> {
        match &self.backend {
            Backend::Local(local) => local.read(&self.name, |entries| {
                entries.is_some_and(|entries| entries.contains_key(key))
            }),
            Backend::Replicated(replicated) => Ok(replicated.store.contains_key(key)),
        }
    }

    /// Remove every entry visible from the current context.
    pub fn clear(&self) -> ConcordResult<()> {
        match &self.backend {
            Backend::Local(local) => {
                let cleared = local.write(&self.name, std::mem::take)?;
                self.publish(ClusterEvent::Clear);
                tracing::debug!(cache = %self.name, scope = %self.scope, entries = cleared.len(), "cache cleared");
                drop(cleared);
            }
            Backend::Replicated(replicated) => {
                replicated.store.clear();
                self.publish(ClusterEvent::Clear);
                tracing::debug!(cache = %self.name, scope = %self.scope, "cache cleared");
            }
        }
        Ok(())
    }

    /// Remove `prefix` and every key nested below it; returns how many
    /// entries went away on this node.
    ///
    /// An empty prefix, or one made only of `/`, names the root and removes
    /// every entry, like [`clear`](Self::clear) but returning the count.
    pub fn remove_children(&self, prefix: &str) -> ConcordResult<usize> {
        let removed = match &self.backend {
            Backend::Local(local) => {
                let removed = local.write(&self.name, |entries| {
                    let doomed: Vec<String> = entries
                        .keys()
                        .filter(|key| is_same_or_child(key, prefix))
                        .cloned()
                        .collect();
                    doomed
                        .iter()
                        .filter_map(|key| entries.remove(key))
                        .collect::<Vec<_>>()
                })?;
                removed.len()
            }
            Backend::Replicated(replicated) => replicated.store.remove_children(prefix),
        };
        self.publish(ClusterEvent::RemoveChildren {
            prefix: prefix.to_string(),
        });
        Ok(removed)
    }

    pub fn keys(&self) -> ConcordResult<Vec<String>> {
        match &self.backend {
            Backend::Local(local) => local.read(&self.name, |entries| {
                entries
                    .map(|entries| entries.keys().cloned().collect())
                    .unwrap_or_default()
            }),
            Backend::Replicated(replicated) => Ok(replicated.store.keys()),
        }
    }

    pub fn len(&self) -> ConcordResult<usize> {
        match &self.backend {
            Backend::Local(local) => {
                local.read(&self.name, |entries| entries.map_or(0, HashMap::len))
            }
            Backend::Replicated(replicated) => Ok(replicated.store.len()),
        }
    }

    pub fn is_empty(&self) -> ConcordResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> ConcordResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len()? as u64,
        })
    }

    /// Drop every entry of one thread or request context.
    pub(crate) fn teardown(&self, context: ContextId) -> ConcordResult<usize> {
        match &self.backend {
            Backend::Local(local) => {
                let entries = local.take_context(&self.name, context)?;
                Ok(entries.len())
            }
            Backend::Replicated(_) => Ok(0),
        }
    }

    /// Drop local copies named by an invalidation from another node.
    pub(crate) fn invalidate(&self, event: &ClusterEvent) -> ConcordResult<usize> {
        let Backend::Local(local) = &self.backend else {
            return Ok(0);
        };
        let dropped = local.write(&self.name, |entries| match event {
            ClusterEvent::Put { key, .. } | ClusterEvent::Remove { key } => {
                entries.remove(key).into_iter().collect::<Vec<_>>()
            }
            ClusterEvent::RemoveChildren { prefix } => {
                let doomed: Vec<String> = entries
                    .keys()
                    .filter(|key| is_same_or_child(key, prefix))
                    .cloned()
                    .collect();
                doomed.iter().filter_map(|key| entries.remove(key)).collect()
            }
            ClusterEvent::Clear => entries.drain().map(|(_, binding)| binding).collect(),
        })?;
        Ok(dropped.len())
    }

    fn publish(&self, event: ClusterEvent) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        publisher.transport.publish(ClusterMessage {
            origin: publisher.node,
            cache: self.name.clone(),
            scope: self.scope,
            event,
        });
    }
}
