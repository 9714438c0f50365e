//! In-process cluster coordinator.

use concord_core::{CacheScope, NodeId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::{ClusterEvent, ClusterMessage, ClusterSink, ClusterTransport};
use crate::cache::ReplicatedStore;

/// A [`ClusterTransport`] connecting registries that live in one process.
///
/// The hub acts as the single elected coordinator: it keeps the
/// authoritative copy of every replicated cache and applies conditional puts
/// and publications one at a time under one mutex. Delivery is synchronous,
/// so a write is visible on every member when it returns.
#[derive(Default)]
pub struct LocalClusterHub {
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    members: Vec<(NodeId, Weak<dyn ClusterSink>)>,
    replicated: HashMap<String, ReplicatedStore>,
    delivered: u64,
}

impl HubState {
    fn live_peers(&mut self, origin: NodeId) -> Vec<Arc<dyn ClusterSink>> {
        self.members.retain(|(_, sink)| sink.strong_count() > 0);
        self.members
            .iter()
            .filter(|(node, _)| *node != origin)
            .filter_map(|(_, sink)| sink.upgrade())
            .collect()
    }
}

impl LocalClusterHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // Every mutation leaves the state consistent, so a panic elsewhere
        // does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live subscribed members.
    pub fn member_count(&self) -> usize {
        let mut state = self.lock();
        state.members.retain(|(_, sink)| sink.strong_count() > 0);
        state.members.len()
    }

    /// Number of messages handed to members so far.
    pub fn delivered_count(&self) -> u64 {
        self.lock().delivered
    }

    /// Authoritative value of one replicated entry.
    pub fn authoritative(&self, cache: &str, key: &str) -> Option<Value> {
        self.lock()
            .replicated
            .get(cache)
            .and_then(|store| store.get(key))
    }

    fn fan_out(&self, mut state: MutexGuard<'_, HubState>, message: &ClusterMessage) {
        let peers = state.live_peers(message.origin);
        for peer in &peers {
            peer.deliver(message);
        }
        state.delivered += peers.len() as u64;
        // The last handle to a member may be among `peers`; its teardown
        // unsubscribes, which needs the state lock.
        drop(state);
        drop(peers);
    }
}

impl ClusterTransport for LocalClusterHub {
    fn subscribe(&self, node: NodeId, sink: Weak<dyn ClusterSink>) {
        let mut state = self.lock();
        state.members.retain(|(member, _)| *member != node);
        state.members.push((node, sink));
        tracing::debug!(node = %node, members = state.members.len(), "cluster member joined");
    }

    fn unsubscribe(&self, node: NodeId) {
        let mut state = self.lock();
        state.members.retain(|(member, _)| *member != node);
        tracing::debug!(node = %node, members = state.members.len(), "cluster member left");
    }

    fn publish(&self, message: ClusterMessage) {
        let mut state = self.lock();
        if message.scope == CacheScope::ClusterReplicated {
            state
                .replicated
                .entry(message.cache.clone())
                .or_default()
                .apply(&message.event);
        }
        self.fan_out(state, &message);
    }

    fn put_if_absent(
        &self,
        origin: NodeId,
        cache: &str,
        key: &str,
        value: Value,
    ) -> Option<Value> {
        let mut state = self.lock();
        let existing = state
            .replicated
            .entry(cache.to_string())
            .or_default()
            .insert_if_absent(key.to_string(), value.clone());
        if existing.is_some() {
            return existing;
        }

        let message = ClusterMessage {
            origin,
            cache: cache.to_string(),
            scope: CacheScope::ClusterReplicated,
            event: ClusterEvent::Put {
                key: key.to_string(),
                value,
            },
        };
        self.fan_out(state, &message);
        None
    }

    fn snapshot(&self, cache: &str, visit: &mut dyn FnMut(&str, &Value)) {
        let state = self.lock();
        if let Some(store) = state.replicated.get(cache) {
            store.for_each(|key, value| visit(key, value));
        }
    }
}
