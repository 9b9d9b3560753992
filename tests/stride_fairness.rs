//! Stride Fairness Tests
//!
//! The gate lets batch `i` advance only when the batch at `i - 1` is a full
//! stride ahead. Observable consequence: while both are live, a successor
//! never has more rounds than its predecessor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::{Map, Value};

use aerograph::graph::{GraphQueryEngine, MemoryGraph};
use aerograph::lazy::{
    stride_gate_open, Batch, BatchRegistry, CompletionSink, OutcomeStatus, PendingOperation,
    QueryEngine, StrideScheduler,
};
use aerograph::observability::MetricsRegistry;

#[derive(Default)]
struct Completed {
    sequences: Mutex<Vec<u64>>,
}

impl CompletionSink for Completed {
    fn complete(&self, operation: PendingOperation, status: OutcomeStatus) {
        assert!(status.is_completed());
        self.sequences
            .lock()
            .unwrap()
            .push(operation.sequence_number());
    }
}

fn people(n: i64) -> Arc<MemoryGraph> {
    let graph = Arc::new(MemoryGraph::new());
    for id in 0..n {
        let mut props = Map::new();
        props.insert("id".into(), Value::from(id));
        graph.create_node(vec!["Person".into()], props);
    }
    graph
}

fn fill_registry(registry: &BatchRegistry, engine: &GraphQueryEngine, batches: u64, size: u64) {
    for b in 0..batches {
        let operations = (0..size)
            .map(|i| {
                let seq = b * size + i;
                let text = "MATCH (n:Person) RETURN n.id";
                PendingOperation::new(seq, text, engine.begin(text).unwrap())
            })
            .collect();
        registry.insert(Batch::form(operations).unwrap()).unwrap();
    }
}

// =============================================================================
// Gate Arithmetic
// =============================================================================

#[test]
fn test_gate_boundaries() {
    assert!(stride_gate_open(None, 0, 10));
    assert!(stride_gate_open(Some(10), 0, 10));
    assert!(!stride_gate_open(Some(9), 0, 10));
    assert!(stride_gate_open(Some(30), 20, 10));
    assert!(!stride_gate_open(Some(29), 20, 10));
}

// =============================================================================
// Concurrent Propagation
// =============================================================================

/// Many workers, many batches: successors never overtake predecessors,
/// and every operation completes exactly once.
#[test]
fn test_successor_never_overtakes_predecessor() {
    let engine = GraphQueryEngine::new(people(300));
    let registry = BatchRegistry::new(64);
    let sink = Completed::default();
    let metrics = MetricsRegistry::new();
    fill_registry(&registry, &engine, 12, 3);

    let scheduler = StrideScheduler::new(&registry, &sink, &metrics, 5, 0);
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| scheduler.run_until(&stop));
        }

        while !registry.is_empty() {
            let oldest = registry.oldest();
            let newest = registry.newest();
            for index in oldest + 1..newest {
                // Successor first: its count can only grow after the
                // predecessor's has
                let Some(batch) = registry.get(index) else {
                    continue;
                };
                let count = batch.propagate_count();
                let Some(predecessor) = registry.get(index - 1) else {
                    continue;
                };
                assert!(
                    count <= predecessor.propagate_count(),
                    "batch {} ran ahead of its predecessor",
                    index
                );
            }
            thread::yield_now();
        }
        stop.store(true, Ordering::Release);
    });

    let mut sequences = sink.sequences.lock().unwrap().clone();
    sequences.sort_unstable();
    assert_eq!(sequences, (0..36).collect::<Vec<u64>>());
    assert_eq!(metrics.snapshot().batches_drained, 12);
    assert_eq!(metrics.snapshot().rounds_propagated, 12 * 301);
}

/// Single-threaded scanning drains the oldest batch before touching the
/// next one.
#[test]
fn test_scan_loop_drains_oldest_first() {
    let engine = GraphQueryEngine::new(people(4));
    let registry = BatchRegistry::new(8);
    let sink = Completed::default();
    let metrics = MetricsRegistry::new();
    fill_registry(&registry, &engine, 3, 2);

    let scheduler = StrideScheduler::new(&registry, &sink, &metrics, 2, 0);
    let mut drained = Vec::new();
    while let Some(report) = scheduler.advance_next() {
        if report.drained {
            drained.push(report.index);
        }
    }

    assert_eq!(drained, vec![0, 1, 2]);
    assert_eq!(*sink.sequences.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
}
