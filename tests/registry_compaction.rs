//! Registry Compaction Tests
//!
//! - `oldest` skips every removed slot at the front
//! - Removal in any order ends with `oldest == newest` and no live batches
//! - Slots are reused after the logical index wraps the capacity

use rand::seq::SliceRandom;
use rand::SeedableRng;

use aerograph::graph::{GraphQueryEngine, MemoryGraph};
use aerograph::lazy::{Batch, BatchRegistry, PendingOperation, QueryEngine};
use std::sync::Arc;

fn batch(engine: &GraphQueryEngine, seq: u64) -> Batch {
    let text = "MATCH (n) RETURN n";
    Batch::form(vec![PendingOperation::new(
        seq,
        text,
        engine.begin(text).unwrap(),
    )])
    .unwrap()
}

fn engine() -> GraphQueryEngine {
    GraphQueryEngine::new(Arc::new(MemoryGraph::new()))
}

#[test]
fn test_prefix_removal_moves_oldest_to_first_survivor() {
    let engine = engine();
    let registry = BatchRegistry::new(16);
    for seq in 0..10 {
        registry.insert(batch(&engine, seq)).unwrap();
    }

    for index in 0..4 {
        registry.remove(index).unwrap();
    }
    assert_eq!(registry.oldest(), 4);
    assert_eq!(registry.len(), 6);
}

#[test]
fn test_removal_in_any_order_empties_registry() {
    let engine = engine();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    for round in 0..20 {
        let registry = BatchRegistry::new(32);
        let n = 1 + round;
        let mut indexes: Vec<u64> = (0..n)
            .map(|seq| registry.insert(batch(&engine, seq)).unwrap())
            .collect();
        indexes.shuffle(&mut rng);

        for index in indexes {
            registry.remove(index).unwrap();
            assert!(registry.oldest() <= registry.newest());
        }
        assert_eq!(registry.oldest(), registry.newest());
        assert!(registry.is_empty());
    }
}

#[test]
fn test_full_registry_recovers_after_compaction() {
    let engine = engine();
    let registry = BatchRegistry::new(3);
    for seq in 0..3 {
        registry.insert(batch(&engine, seq)).unwrap();
    }
    assert!(registry.insert(batch(&engine, 3)).is_err());

    // A tombstone behind a live oldest frees nothing
    registry.remove(1).unwrap();
    assert!(registry.is_full());

    registry.remove(0).unwrap();
    assert_eq!(registry.oldest(), 2);
    assert_eq!(registry.insert(batch(&engine, 4)).unwrap(), 3);
    assert_eq!(registry.insert(batch(&engine, 5)).unwrap(), 4);
    assert!(registry.is_full());
    assert_eq!(registry.get(4).unwrap().first_sequence(), 5);
}
