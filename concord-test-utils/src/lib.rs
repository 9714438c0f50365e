//! Concord Test Utilities
//!
//! Centralized test infrastructure for the Concord workspace:
//! - Proptest generators for keys, scopes and server numbers
//! - Test fixtures for clusters, bound resources and configuration
//! - Custom assertions for Concord-specific error variants

pub use concord_core::{
    CacheError, CacheScope, ConcordConfig, ConcordError, ConcordResult, IdGenerator, LockError,
    ManualClock, NodeId, ServerNumber, MAX_SERVER_NUMBER,
};
pub use concord_storage::{BoundResource, CacheRegistry, LocalClusterHub};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// LOGGING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; output goes through the test harness so it only shows
/// for failing tests.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Concord inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate a `/`-separated cache key of one to four segments.
    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z][a-z0-9]{0,6}", 1..=4).prop_map(|segments| segments.join("/"))
    }

    /// Generate any cache scope.
    pub fn arb_scope() -> impl Strategy<Value = CacheScope> {
        prop::sample::select(CacheScope::ALL.to_vec())
    }

    /// Generate a scope whose entries stay in this process.
    pub fn arb_local_scope() -> impl Strategy<Value = CacheScope> {
        prop_oneof![
            Just(CacheScope::Thread),
            Just(CacheScope::Request),
            Just(CacheScope::Instance),
        ]
    }

    /// Generate a valid server number.
    pub fn arb_server_number() -> impl Strategy<Value = ServerNumber> {
        (0..=MAX_SERVER_NUMBER).prop_map(|n| {
            ServerNumber::new(n).unwrap_or_else(|_| unreachable!("{} is in range", n))
        })
    }

    /// Generate a lock key.
    pub fn arb_lock_key() -> impl Strategy<Value = String> {
        arb_cache_key().prop_map(|key| format!("lock/{}", key))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// N cache registries joined through one in-process hub.
    pub struct TestCluster {
        pub hub: Arc<LocalClusterHub>,
        pub nodes: Vec<Arc<CacheRegistry>>,
    }

    impl TestCluster {
        pub fn new(size: usize) -> Self {
            init_tracing();
            let hub = LocalClusterHub::new();
            let nodes = (0..size)
                .map(|_| CacheRegistry::with_transport(hub.clone()))
                .collect();
            Self { hub, nodes }
        }

        /// Registry of node `index`.
        pub fn node(&self, index: usize) -> &Arc<CacheRegistry> {
            &self.nodes[index]
        }

        /// Add one more member and return its registry.
        pub fn join(&mut self) -> Arc<CacheRegistry> {
            let registry = CacheRegistry::with_transport(self.hub.clone());
            self.nodes.push(Arc::clone(&registry));
            registry
        }
    }

    /// A bound resource that counts how often it was released.
    ///
    /// Clones share the counter, so a test can keep one clone and store
    /// the other.
    #[derive(Debug, Clone, Default)]
    pub struct CountingResource {
        released: Arc<AtomicUsize>,
    }

    impl CountingResource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    impl BoundResource for CountingResource {
        fn unbind(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A configuration with short lock timeouts for tests.
    pub fn fast_lock_config(server_number: u16) -> ConcordConfig {
        ConcordConfig::new(server_number)
            .with_lock_wait_timeout(std::time::Duration::from_millis(200))
            .with_lock_backoff(
                std::time::Duration::from_millis(1),
                std::time::Duration::from_millis(20),
            )
    }

    /// An ID generator over a clock the test controls.
    pub fn manual_id_generator(
        server_number: u16,
        start_millis: i64,
    ) -> (IdGenerator<Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_millis));
        let server = ServerNumber::new(server_number)
            .unwrap_or_else(|e| panic!("fixture server number {}: {}", server_number, e));
        let generator = IdGenerator::with_clock(server, 0, Arc::clone(&clock));
        (generator, clock)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for Concord-specific validation.

    use super::*;

    /// Assert that a ConcordResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a ConcordResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a ConcordResult is a TypeMismatch cache error.
    #[track_caller]
    pub fn assert_type_mismatch<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(ConcordError::Cache(CacheError::TypeMismatch { .. })) => {}
            other => panic!("Expected TypeMismatch error, got: {:?}", other),
        }
    }

    /// Assert that a ConcordResult is a read-only view refusal of `operation`.
    #[track_caller]
    pub fn assert_unsupported_for_view<T: std::fmt::Debug>(
        result: &ConcordResult<T>,
        operation: &str,
    ) {
        match result {
            Err(ConcordError::Cache(CacheError::UnsupportedForView { operation: op, .. })) => {
                assert_eq!(*op, operation, "Wrong operation in UnsupportedForView error");
            }
            other => panic!("Expected UnsupportedForView error, got: {:?}", other),
        }
    }

    /// Assert that a ConcordResult is a lock Timeout for `key`.
    #[track_caller]
    pub fn assert_lock_timeout<T: std::fmt::Debug>(result: &ConcordResult<T>, key: &str) {
        match result {
            Err(ConcordError::Lock(LockError::Timeout { key: k, .. })) => {
                assert_eq!(k, key, "Wrong key in Timeout error");
            }
            other => panic!("Expected lock Timeout for {}, got: {:?}", key, other),
        }
    }

    /// Assert that a ConcordResult is a NotOwner lock error.
    #[track_caller]
    pub fn assert_not_owner<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(ConcordError::Lock(LockError::NotOwner { .. })) => {}
            other => panic!("Expected NotOwner error, got: {:?}", other),
        }
    }

    /// Assert that a ConcordResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &ConcordResult<T>) {
        match result {
            Err(ConcordError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cluster_fixture_connects_nodes() {
        let mut cluster = fixtures::TestCluster::new(2);
        assert_eq!(cluster.hub.member_count(), 2);
        let third = cluster.join();
        assert_eq!(cluster.hub.member_count(), 3);
        assert_ne!(third.node_id(), cluster.node(0).node_id());
    }

    #[test]
    fn test_counting_resource_shares_counter() {
        let resource = fixtures::CountingResource::new();
        let stored = resource.clone();
        stored.unbind();
        assert_eq!(resource.released(), 1);
    }

    #[test]
    fn test_fast_lock_config_is_valid() {
        assertions::assert_ok(&fixtures::fast_lock_config(1).validate());
    }

    #[test]
    fn test_manual_id_generator_follows_clock() {
        let (ids, clock) = fixtures::manual_id_generator(3, 1_000);
        let first = ids.next_id_num();
        clock.advance(1);
        let second = ids.next_id_num();
        assert!(second > first);
    }

    #[test]
    fn test_assertions_match_variants() {
        let mismatch: ConcordResult<()> = Err(CacheError::TypeMismatch {
            name: "n".to_string(),
            scope: CacheScope::Instance,
            expected: "u32",
            found: "u64",
        }
        .into());
        assertions::assert_type_mismatch(&mismatch);
        assertions::assert_err(&mismatch);

        let timeout: ConcordResult<()> = Err(LockError::Timeout {
            key: "k".to_string(),
            waited: std::time::Duration::from_millis(5),
        }
        .into());
        assertions::assert_lock_timeout(&timeout, "k");
    }

    proptest! {
        #[test]
        fn prop_cache_keys_are_well_formed(key in generators::arb_cache_key()) {
            prop_assert!(!key.is_empty());
            prop_assert!(!key.starts_with('/'));
            prop_assert!(!key.ends_with('/'));
            prop_assert!(!key.contains("//"));
        }

        #[test]
        fn prop_server_numbers_in_range(server in generators::arb_server_number()) {
            prop_assert!(server.get() <= MAX_SERVER_NUMBER);
        }

        #[test]
        fn prop_local_scopes_are_not_cluster(scope in generators::arb_local_scope()) {
            prop_assert!(!scope.is_cluster());
        }
    }
}
