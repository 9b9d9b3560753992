//! In-memory property graph
//!
//! Nodes are append-only and scanned in insertion order. The store also
//! models the owning transaction: while it is closed, or while injected
//! failures are pending, reads fail with a transient error.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pipeline::{ExecutorError, ExecutorResult, NodeSource, Row, ScanKind};

/// Reserved row keys carrying node identity
pub const NODE_ID_KEY: &str = "_node_id";
pub const NODE_LABELS_KEY: &str = "_labels";

/// A graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Node {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    fn matches(&self, kind: &ScanKind) -> bool {
        match kind {
            ScanKind::AllNodes => true,
            ScanKind::Label(label) => self.has_label(label),
        }
    }

    /// The row a scan produces for this node: its properties plus identity
    pub fn to_row(&self) -> Row {
        let mut row = self.properties.clone();
        row.insert(NODE_ID_KEY.to_string(), Value::from(self.id));
        row.insert(
            NODE_LABELS_KEY.to_string(),
            Value::from(self.labels.clone()),
        );
        Value::Object(row)
    }
}

/// On-disk graph format: `{"nodes": [{"labels": [...], "properties": {...}}]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphFile {
    pub nodes: Vec<Node>,
}

#[derive(Debug)]
pub struct MemoryGraph {
    nodes: RwLock<Vec<Node>>,
    open: AtomicBool,
    injected_failures: AtomicU32,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            open: AtomicBool::new(true),
            injected_failures: AtomicU32::new(0),
        }
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from its file representation. Node ids are reassigned
    /// in file order.
    pub fn from_file(file: GraphFile) -> Self {
        let graph = Self::new();
        for node in file.nodes {
            graph.create_node(node.labels, node.properties);
        }
        graph
    }

    /// Append a node and return its id
    pub fn create_node(&self, labels: Vec<String>, properties: Map<String, Value>) -> u64 {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let id = nodes.len() as u64;
        nodes.push(Node {
            id,
            labels,
            properties,
        });
        id
    }

    pub fn node_count(&self) -> usize {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Mark the owning transaction unavailable; scans fail transiently
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Make the next `count` reads fail with a transient error
    pub fn inject_read_failures(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Start a scan at the first node
    pub fn scan(self: &Arc<Self>, kind: ScanKind) -> GraphScan {
        GraphScan {
            graph: Arc::clone(self),
            kind,
            position: 0,
        }
    }

    fn check_readable(&self) -> ExecutorResult<()> {
        if !self.is_open() {
            return Err(ExecutorError::transaction_unavailable(
                "owning transaction is closed",
            ));
        }
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(ExecutorError::transaction_unavailable(
                "transaction temporarily unavailable",
            ));
        }
        Ok(())
    }
}

/// Storage-side scan over a [`MemoryGraph`]
pub struct GraphScan {
    graph: Arc<MemoryGraph>,
    kind: ScanKind,
    position: usize,
}

impl NodeSource for GraphScan {
    fn next_node(&mut self) -> ExecutorResult<Option<Row>> {
        self.graph.check_readable()?;
        let nodes = self
            .graph
            .nodes
            .read()
            .map_err(|_| ExecutorError::execution_failed("graph lock poisoned"))?;
        while let Some(node) = nodes.get(self.position) {
            self.position += 1;
            if node.matches(&self.kind) {
                return Ok(Some(node.to_row()));
            }
        }
        Ok(None)
    }
}
