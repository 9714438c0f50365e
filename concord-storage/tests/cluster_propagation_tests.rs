//! Cluster Propagation Tests
//!
//! **Property 4: Replication**
//!
//! A write to a `ClusterReplicated` cache on one node SHALL become visible
//! on every other node of the cluster.
//!
//! **Property 5: Invalidation**
//!
//! A write to a `ClusterInvalidated` cache on one node SHALL drop the
//! stale copy held by every other node.
//!
//! **Property 6: Cluster-wide create-if-absent**
//!
//! Concurrent `put_if_absent` calls for one key across nodes SHALL produce
//! exactly one winner.

use concord_storage::{ClusterTransport, LocalClusterHub};
use concord_test_utils::assertions::assert_err;
use concord_test_utils::fixtures::{CountingResource, TestCluster};
use concord_test_utils::CacheScope;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Barrier};
use std::thread;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    visits: u32,
}

fn profile(name: &str, visits: u32) -> Profile {
    Profile {
        name: name.to_string(),
        visits,
    }
}

#[test]
fn replicated_writes_reach_every_node() {
    let cluster = TestCluster::new(3);
    let caches: Vec<_> = cluster
        .nodes
        .iter()
        .map(|node| {
            node.get_cache::<Profile>("profiles", CacheScope::ClusterReplicated)
                .unwrap()
        })
        .collect();

    caches[0].put("user/1", profile("ada", 1)).unwrap();
    for cache in &caches {
        assert_eq!(cache.get("user/1").unwrap(), Some(profile("ada", 1)));
    }

    caches[1].put("user/1", profile("ada", 2)).unwrap();
    caches[2].put("user/2", profile("grace", 1)).unwrap();
    for cache in &caches {
        assert_eq!(cache.get("user/1").unwrap(), Some(profile("ada", 2)));
        assert_eq!(cache.len().unwrap(), 2);
    }

    caches[2].remove("user/1").unwrap();
    for cache in &caches {
        assert!(!cache.contains_key("user/1").unwrap());
    }

    caches[0].remove_children("user").unwrap();
    caches[1].put("other", profile("x", 0)).unwrap();
    for cache in &caches {
        assert_eq!(cache.keys().unwrap(), vec!["other".to_string()]);
    }

    caches[1].clear().unwrap();
    for cache in &caches {
        assert!(cache.is_empty().unwrap());
    }
}

#[test]
fn replicated_events_land_before_the_cache_is_requested() {
    let cluster = TestCluster::new(2);
    let writer = cluster
        .node(0)
        .get_cache::<u32>("late", CacheScope::ClusterReplicated)
        .unwrap();
    writer.put("a", 1).unwrap();
    writer.put("b", 2).unwrap();
    writer.remove("a").unwrap();

    let reader = cluster
        .node(1)
        .get_cache::<u32>("late", CacheScope::ClusterReplicated)
        .unwrap();
    assert_eq!(reader.get("a").unwrap(), None);
    assert_eq!(reader.get("b").unwrap(), Some(2));
}

#[test]
fn late_joiner_is_seeded() {
    let mut cluster = TestCluster::new(1);
    let first = cluster
        .node(0)
        .get_cache::<String>("settings", CacheScope::ClusterReplicated)
        .unwrap();
    first.put("theme", "dark".to_string()).unwrap();

    let joiner = cluster.join();
    let cache = joiner
        .get_cache::<String>("settings", CacheScope::ClusterReplicated)
        .unwrap();
    assert_eq!(cache.get("theme").unwrap(), Some("dark".to_string()));
}

#[test]
fn invalidation_drops_stale_copies() {
    let cluster = TestCluster::new(2);
    let a = cluster
        .node(0)
        .get_cache::<String>("pages", CacheScope::ClusterInvalidated)
        .unwrap();
    let b = cluster
        .node(1)
        .get_cache::<String>("pages", CacheScope::ClusterInvalidated)
        .unwrap();

    a.put("home", "v1 rendered on a".to_string()).unwrap();
    b.put("home", "v1 rendered on b".to_string()).unwrap();
    assert_eq!(a.get("home").unwrap(), None, "b's write invalidates a");
    assert_eq!(b.get("home").unwrap(), Some("v1 rendered on b".to_string()));

    a.put("docs/intro", "x".to_string()).unwrap();
    b.put("docs/intro", "y".to_string()).unwrap();
    b.put("docs/setup", "z".to_string()).unwrap();
    a.remove_children("docs").unwrap();
    assert_eq!(b.keys().unwrap(), vec!["home".to_string()]);

    a.clear().unwrap();
    assert!(b.is_empty().unwrap());
}

#[test]
fn invalidated_values_are_not_replicated() {
    let cluster = TestCluster::new(2);
    let a = cluster
        .node(0)
        .get_object_cache::<Arc<Vec<u8>>>("blobs", CacheScope::ClusterInvalidated)
        .unwrap();
    let b = cluster
        .node(1)
        .get_object_cache::<Arc<Vec<u8>>>("blobs", CacheScope::ClusterInvalidated)
        .unwrap();

    a.put("k", Arc::new(vec![1, 2, 3])).unwrap();
    assert_eq!(b.get("k").unwrap(), None);
    assert_eq!(a.get("k").unwrap().map(|v| v.len()), Some(3));
}

#[test]
fn cluster_scopes_reject_bound_resources() {
    let cluster = TestCluster::new(1);
    let cache = cluster
        .node(0)
        .get_object_cache::<CountingResource>("bound", CacheScope::ClusterInvalidated)
        .unwrap();
    assert_err(&cache.put_bound("k", CountingResource::new()));
}

#[test]
fn put_if_absent_has_one_winner_across_nodes() {
    let cluster = TestCluster::new(4);
    let barrier = Arc::new(Barrier::new(cluster.nodes.len()));

    let handles: Vec<_> = cluster
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let cache = node
                .get_cache::<usize>("election", CacheScope::ClusterReplicated)
                .unwrap();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (i, cache.put_if_absent("leader", i).unwrap())
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<usize> = outcomes
        .iter()
        .filter(|(_, existing)| existing.is_none())
        .map(|(i, _)| *i)
        .collect();
    assert_eq!(winners.len(), 1);

    let leader = winners[0];
    for (_, existing) in outcomes.iter().filter(|(i, _)| *i != leader) {
        assert_eq!(*existing, Some(leader));
    }
    for node in &cluster.nodes {
        let cache = node
            .get_cache::<usize>("election", CacheScope::ClusterReplicated)
            .unwrap();
        assert_eq!(cache.get("leader").unwrap(), Some(leader));
    }
}

#[test]
fn hub_keeps_authoritative_copy() {
    let hub = LocalClusterHub::new();
    let cluster_hub: Arc<dyn ClusterTransport> = hub.clone();
    let node = concord_storage::CacheRegistry::with_transport(cluster_hub);
    let cache = node
        .get_cache::<u32>("auth", CacheScope::ClusterReplicated)
        .unwrap();
    cache.put("k", 9).unwrap();
    assert_eq!(hub.authoritative("auth", "k"), Some(serde_json::json!(9)));
}
