//! The lock manager.

use concord_core::{
    CacheScope, Clock, ConcordConfig, ConcordResult, IdGenerator, LockError, NodeId, SystemClock,
};
use concord_storage::{BoundResource, CacheRegistry, ScopedCache};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::lock::{Lock, LockRecord};

/// Bookkeeping entry for a lock the current request holds.
///
/// Stored as a bound resource in the request-scoped cache; when the entry
/// leaves that cache (unlock, request end, clear) it removes its own record
/// from the replicated cache, guarded by token.
#[derive(Clone)]
pub(crate) struct HeldLock {
    record: LockRecord,
    records: Arc<ScopedCache<LockRecord>>,
}

impl BoundResource for HeldLock {
    fn unbind(&self) {
        let key = &self.record.key;
        let token = &self.record.token;
        match self.records.remove_if(key, |current| current.token == *token) {
            Ok(Some(_)) => tracing::debug!(key = %key, token = %token, "lock released"),
            Ok(None) => tracing::debug!(key = %key, token = %token, "lock already gone"),
            Err(e) => tracing::warn!(key = %key, error = %e, "lock release failed"),
        }
    }
}

/// Advisory, cluster-wide mutual exclusion over string keys.
///
/// Built on two caches from the [`CacheRegistry`]: a cluster-replicated
/// cache of [`LockRecord`]s and a request-scoped cache of the locks the
/// current request holds. Locks are released by [`unlock`](Self::unlock), by
/// [`clear_locks`](Self::clear_locks), or automatically when the acquiring
/// request (or thread, outside a request) is unbound.
///
/// Nothing stops a non-owner from touching the protected state; callers
/// must check [`Lock::is_owner`].
pub struct LockManager<C: Clock = SystemClock> {
    node: NodeId,
    ids: Arc<IdGenerator<C>>,
    records: Arc<ScopedCache<LockRecord>>,
    held: Arc<ScopedCache<HeldLock>>,
    wait_timeout: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl LockManager {
    /// Build a manager with its own ID generator.
    pub fn from_config(registry: &CacheRegistry, config: &ConcordConfig) -> ConcordResult<Self> {
        let ids = Arc::new(IdGenerator::from_config(config)?);
        Self::new(registry, ids, config)
    }
}

impl<C: Clock> LockManager<C> {
    /// Build a manager that mints lock tokens from `ids`.
    pub fn new(
        registry: &CacheRegistry,
        ids: Arc<IdGenerator<C>>,
        config: &ConcordConfig,
    ) -> ConcordResult<Self> {
        config.validate()?;
        let records = registry
            .get_cache::<LockRecord>(&config.lock_cache_name, CacheScope::ClusterReplicated)?;
        let held = registry
            .get_object_cache::<HeldLock>(&config.lock_request_cache_name, CacheScope::Request)?;
        Ok(Self {
            node: registry.node_id(),
            ids,
            records,
            held,
            wait_timeout: config.lock_wait_timeout,
            initial_backoff: config.lock_initial_backoff,
            max_backoff: config.lock_max_backoff,
        })
    }

    /// Try to take `key` without waiting.
    ///
    /// Returns an owning lock if this call created the record, or if the
    /// current request already holds the key. Otherwise returns a
    /// non-owning lock describing the current holder.
    pub fn get_lock(&self, key: &str) -> ConcordResult<Lock> {
        if let Some(held) = self.held.get(key)? {
            match self.records.get(key)? {
                Some(record) if record.token == held.record.token => {
                    return Ok(Lock::owned(record));
                }
                // Record cleared or replaced behind our back; the stale
                // entry's release is token-guarded and touches nothing.
                _ => {
                    self.held.remove(key)?;
                }
            }
        }

        let record = LockRecord::new(key, self.ids.next_id(), self.node);
        if let Some(existing) = self.records.put_if_absent(key, record.clone())? {
            tracing::debug!(key = %key, holder = %existing.node, "lock contended");
            return Ok(Lock::held_by_other(existing));
        }

        let held = HeldLock {
            record: record.clone(),
            records: Arc::clone(&self.records),
        };
        if let Err(e) = self.held.put_bound(key, held) {
            // Leave no record behind that nobody would release.
            self.records
                .remove_if(key, |current| current.token == record.token)?;
            return Err(e);
        }

        tracing::debug!(key = %key, token = %record.token, "lock acquired");
        Ok(Lock::owned(record))
    }

    /// Like [`get_lock`](Self::get_lock) when `create_if_absent` is true;
    /// otherwise only observes, returning `None` for a free key.
    pub fn get_lock_with(&self, key: &str, create_if_absent: bool) -> ConcordResult<Option<Lock>> {
        if create_if_absent {
            return self.get_lock(key).map(Some);
        }
        let Some(record) = self.records.get(key)? else {
            return Ok(None);
        };
        let owned = self
            .held
            .get(key)?
            .is_some_and(|held| held.record.token == record.token);
        Ok(Some(if owned {
            Lock::owned(record)
        } else {
            Lock::held_by_other(record)
        }))
    }

    /// Release an owning lock and turn `lock` into an unlocked view.
    ///
    /// Fails with [`LockError::NotOwner`] for a non-owning lock. The record
    /// is removed only while it still carries this lock's token.
    pub fn unlock(&self, lock: &mut Lock) -> ConcordResult<()> {
        let token = match (lock.is_owner(), lock.token()) {
            (true, Some(token)) => token.to_string(),
            _ => {
                return Err(LockError::NotOwner {
                    key: lock.key().to_string(),
                }
                .into())
            }
        };
        let key = lock.key().to_string();

        let tracked = self
            .held
            .remove_if(&key, |held| held.record.token == token)?;
        if tracked.is_none() {
            self.records
                .remove_if(&key, |record| record.token == token)?;
        }

        lock.mark_released();
        tracing::debug!(key = %key, "lock unlocked by owner");
        Ok(())
    }

    /// Drop every lock record in the cluster, whoever holds it.
    ///
    /// Meant for recovery. Also forgets the current request's bookkeeping;
    /// other requests find their entries stale on next use.
    pub fn clear_locks(&self) -> ConcordResult<()> {
        let cleared = self.records.len()?;
        self.records.clear()?;
        self.held.clear()?;
        tracing::warn!(node = %self.node, cleared, "all locks cleared");
        Ok(())
    }

    /// Block until `key` is owned, for at most the configured wait timeout.
    pub fn wait_for_lock(&self, key: &str) -> ConcordResult<Lock> {
        self.wait_for_lock_timeout(key, self.wait_timeout)
    }

    /// Block until `key` is owned, for at most `budget`.
    ///
    /// Retries with exponential backoff plus jitter. On timeout, fails with
    /// [`LockError::Timeout`] and leaves no record or bookkeeping behind. A
    /// budget too large to express as a deadline (such as `Duration::MAX`)
    /// waits without limit.
    pub fn wait_for_lock_timeout(&self, key: &str, budget: Duration) -> ConcordResult<Lock> {
        let started = Instant::now();
        let deadline = started.checked_add(budget);
        let mut backoff = self.initial_backoff;

        loop {
            let lock = self.get_lock(key)?;
            if lock.is_owner() {
                return Ok(lock);
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                let waited = now.duration_since(started);
                tracing::warn!(key = %key, waited_ms = waited.as_millis() as u64, "lock wait timed out");
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited,
                }
                .into());
            }

            let backoff_ms = backoff.as_millis() as u64;
            let jitter = rand::rng().random_range(0..backoff_ms / 2 + 1);
            let mut pause = backoff.saturating_add(Duration::from_millis(jitter));
            if let Some(deadline) = deadline {
                pause = pause.min(deadline - now);
            }
            tracing::debug!(
                key = %key,
                holder = ?lock.holder(),
                backoff_ms = pause.as_millis() as u64,
                "lock held, backing off"
            );
            thread::sleep(pause);

            backoff = backoff.saturating_mul(2).min(self.max_backoff);
        }
    }

    /// Release every lock the current request holds; returns how many.
    pub fn release_request_locks(&self) -> ConcordResult<usize> {
        let held = self.held.len()?;
        self.held.clear()?;
        Ok(held)
    }

    /// Keys of the locks the current request holds.
    pub fn held_locks(&self) -> ConcordResult<Vec<String>> {
        let mut keys = self.held.keys()?;
        keys.sort();
        Ok(keys)
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }
}

impl<C: Clock> fmt::Debug for LockManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("node", &self.node)
            .field("records", &self.records.name())
            .field("held", &self.held.name())
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}
