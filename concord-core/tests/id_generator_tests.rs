//! ID Generator Tests
//!
//! **Property 1: Uniqueness**
//!
//! Identifiers produced by one generator SHALL never repeat.
//!
//! **Property 2: Order**
//!
//! Decoded identifiers from one generator SHALL be strictly increasing in
//! the order they were produced.

use concord_core::{decode_id, ConcordConfig, IdGenerator, IdParts, ServerNumber};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[test]
fn ten_thousand_ids_are_unique_and_increasing() {
    let generator = IdGenerator::from_config(&ConcordConfig::new(1)).unwrap();
    let mut seen = HashSet::new();
    let mut last = 0u128;
    for _ in 0..10_000 {
        let id = generator.next_id();
        let value = decode_id(&id).unwrap();
        assert!(value > last, "id {} did not increase", id);
        assert!(seen.insert(id));
        last = value;
    }
}

#[test]
fn shared_generator_never_repeats_across_threads() {
    let generator = Arc::new(IdGenerator::new(ServerNumber::new(42).unwrap()));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let generator = Arc::clone(&generator);
            thread::spawn(move || {
                let ids: Vec<u128> = (0..2_500).map(|_| generator.next_id_num()).collect();
                assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
                ids
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert_eq!(IdParts::split(id).server_number, 42);
            assert!(all.insert(id));
        }
    }
    assert_eq!(all.len(), 10_000);
}
