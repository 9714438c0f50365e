//! Lock records and the lock handles callers hold.

use chrono::Utc;
use concord_core::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};

/// The replicated marker that a key is held.
///
/// One record per key lives in the cluster-replicated lock cache. The
/// token is a fresh cluster-unique ID per acquisition, so a release can
/// tell its own record from a later holder's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: String,
    pub token: String,
    /// Node that acquired the lock
    pub node: NodeId,
    pub acquired_at: Timestamp,
}

impl LockRecord {
    pub fn new(key: &str, token: String, node: NodeId) -> Self {
        Self {
            key: key.to_string(),
            token,
            node,
            acquired_at: Utc::now(),
        }
    }
}

/// A caller's view of one lock key.
///
/// Says whether the key was held when the view was taken and whether the
/// caller owns it. Owning locks are released with
/// [`LockManager::unlock`](crate::LockManager::unlock), which also turns
/// this value into an unlocked, non-owning view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    key: String,
    record: Option<LockRecord>,
    owner: bool,
}

impl Lock {
    pub(crate) fn owned(record: LockRecord) -> Self {
        Self {
            key: record.key.clone(),
            record: Some(record),
            owner: true,
        }
    }

    pub(crate) fn held_by_other(record: LockRecord) -> Self {
        Self {
            key: record.key.clone(),
            record: Some(record),
            owner: false,
        }
    }

    pub(crate) fn mark_released(&mut self) {
        self.record = None;
        self.owner = false;
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True if the caller that obtained this lock holds it.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// True if anyone held the key when this view was taken.
    pub fn is_locked(&self) -> bool {
        self.record.is_some()
    }

    /// Node holding the key.
    pub fn holder(&self) -> Option<NodeId> {
        self.record.as_ref().map(|record| record.node)
    }

    pub fn token(&self) -> Option<&str> {
        self.record.as_ref().map(|record| record.token.as_str())
    }

    pub fn acquired_at(&self) -> Option<Timestamp> {
        self.record.as_ref().map(|record| record.acquired_at)
    }

    pub fn record(&self) -> Option<&LockRecord> {
        self.record.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str) -> LockRecord {
        LockRecord::new(key, "AQID".to_string(), NodeId::new())
    }

    #[test]
    fn test_owned_lock_is_locked_and_owned() {
        let record = record("orders/7");
        let lock = Lock::owned(record.clone());
        assert_eq!(lock.key(), "orders/7");
        assert!(lock.is_owner());
        assert!(lock.is_locked());
        assert_eq!(lock.holder(), Some(record.node));
        assert_eq!(lock.token(), Some("AQID"));
    }

    #[test]
    fn test_foreign_lock_is_locked_not_owned() {
        let lock = Lock::held_by_other(record("orders/7"));
        assert!(!lock.is_owner());
        assert!(lock.is_locked());
    }

    #[test]
    fn test_release_clears_state() {
        let mut lock = Lock::owned(record("k"));
        lock.mark_released();
        assert!(!lock.is_owner());
        assert!(!lock.is_locked());
        assert_eq!(lock.key(), "k");
        assert_eq!(lock.token(), None);
        assert_eq!(lock.acquired_at(), None);
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let record = record("a/b");
        let json = serde_json::to_string(&record).unwrap();
        let back: LockRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
