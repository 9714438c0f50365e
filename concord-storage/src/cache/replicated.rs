//! Node-wide raw store behind one cluster-replicated cache name.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Once;

use super::keys::is_same_or_child;
use crate::cluster::ClusterEvent;

/// Encoded entries of one replicated cache on one node.
///
/// Remote events land here even before any typed cache for the name has
/// been requested, so a late `get_cache` still sees them. Values are kept in
/// their wire form and decoded on read.
#[derive(Debug)]
pub struct ReplicatedStore {
    entries: DashMap<String, Value>,
    seeded: Once,
}

impl Default for ReplicatedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            seeded: Once::new(),
        }
    }

    /// Run `seed` once for the lifetime of the store.
    pub(crate) fn seed_once(&self, seed: impl FnOnce(&Self)) {
        self.seeded.call_once(|| seed(self));
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: String, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    /// Insert unless present; returns the present value when the insert lost.
    pub fn insert_if_absent(&self, key: String, value: Value) -> Option<Value> {
        match self.entries.entry(key) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(value);
                None
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Remove `key` only while it still holds `expected`.
    pub fn remove_if_eq(&self, key: &str, expected: &Value) -> bool {
        self.entries
            .remove_if(key, |_, current| current == expected)
            .is_some()
    }

    pub fn remove_children(&self, prefix: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !is_same_or_child(key, prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visit a copy of every entry.
    pub fn for_each(&self, mut visit: impl FnMut(&str, &Value)) {
        for entry in self.entries.iter() {
            visit(entry.key(), entry.value());
        }
    }

    /// Apply an event published by another node.
    pub fn apply(&self, event: &ClusterEvent) {
        match event {
            ClusterEvent::Put { key, value } => {
                self.entries.insert(key.clone(), value.clone());
            }
            ClusterEvent::Remove { key } => {
                self.entries.remove(key);
            }
            ClusterEvent::RemoveChildren { prefix } => {
                self.remove_children(prefix);
            }
            ClusterEvent::Clear => self.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_if_absent_keeps_first() {
        let store = ReplicatedStore::new();
        assert_eq!(store.insert_if_absent("a".into(), json!(1)), None);
        assert_eq!(store.insert_if_absent("a".into(), json!(2)), Some(json!(1)));
        assert_eq!(store.get("a"), Some(json!(1)));
    }

    #[test]
    fn test_remove_if_eq_guards_value() {
        let store = ReplicatedStore::new();
        store.insert("k".into(), json!("mine"));
        assert!(!store.remove_if_eq("k", &json!("theirs")));
        assert!(store.contains_key("k"));
        assert!(store.remove_if_eq("k", &json!("mine")));
        assert!(store.is_empty());
    }

    #[test]
    fn test_apply_events() {
        let store = ReplicatedStore::new();
        store.apply(&ClusterEvent::Put {
            key: "fish".into(),
            value: json!(1),
        });
        store.apply(&ClusterEvent::Put {
            key: "fish/child".into(),
            value: json!(2),
        });
        store.apply(&ClusterEvent::Put {
            key: "fishy".into(),
            value: json!(3),
        });
        store.apply(&ClusterEvent::RemoveChildren {
            prefix: "fish".into(),
        });
        assert_eq!(store.keys(), vec!["fishy".to_string()]);

        store.apply(&ClusterEvent::Remove {
            key: "fishy".into(),
        });
        assert!(store.is_empty());
    }

    #[test]
    fn test_seed_runs_once() {
        let store = ReplicatedStore::new();
        store.seed_once(|s| {
            s.insert("a".into(), json!(1));
        });
        store.seed_once(|s| {
            s.insert("b".into(), json!(2));
        });
        assert_eq!(store.len(), 1);
    }
}
