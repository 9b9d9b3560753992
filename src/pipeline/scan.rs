//! Leaf scans and the shared-scan capability
//!
//! A leaf scan owns a [`SharedCursor`] over a [`NodeSource`]. In a batch the
//! leader's cursor is the authoritative position in the underlying stream;
//! followers are rewired onto the same cursor and read its cached value
//! instead of moving it.
//!
//! # Invariants
//!
//! - Only a fresh pull moves the source position
//! - A cached read returns exactly the value of the most recent fresh pull
//! - Once exhausted, a cursor stays exhausted

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::errors::{ExecutorError, ExecutorResult};
use super::operator::Operator;
use super::step::{QueryState, Row, Step};

/// Storage-side iterator a leaf scan pulls from.
///
/// Implemented by the graph store. `Ok(None)` means the source is exhausted.
pub trait NodeSource: Send {
    fn next_node(&mut self) -> ExecutorResult<Option<Row>>;
}

/// What a leaf scan reads. Two leaves can share a cursor only when their
/// kinds are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScanKind {
    AllNodes,
    Label(String),
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanKind::AllNodes => write!(f, "all-nodes"),
            ScanKind::Label(label) => write!(f, "label({})", label),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Cached {
    Empty,
    Value(Row),
    Exhausted,
}

struct CursorState {
    source: Box<dyn NodeSource>,
    cached: Cached,
    pulls: u64,
}

/// Position in a node stream, shareable between the leaves of one batch
#[derive(Clone)]
pub struct SharedCursor {
    inner: Arc<Mutex<CursorState>>,
}

impl SharedCursor {
    pub fn new(source: Box<dyn NodeSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CursorState {
                source,
                cached: Cached::Empty,
                pulls: 0,
            })),
        }
    }

    fn lock(&self) -> ExecutorResult<MutexGuard<'_, CursorState>> {
        self.inner
            .lock()
            .map_err(|_| ExecutorError::execution_failed("scan cursor lock poisoned"))
    }

    /// Move the source by one value and cache it.
    ///
    /// A failed pull leaves position and cache untouched.
    pub fn pull_fresh(&self) -> ExecutorResult<Step> {
        let mut state = self.lock()?;
        if state.cached == Cached::Exhausted {
            return Ok(Step::EndOfStream);
        }
        let next = state.source.next_node()?;
        state.pulls += 1;
        match next {
            Some(row) => {
                state.cached = Cached::Value(row.clone());
                Ok(Step::Row(row))
            }
            None => {
                state.cached = Cached::Exhausted;
                Ok(Step::EndOfStream)
            }
        }
    }

    /// Read the value of the most recent fresh pull without moving
    pub fn read_cached(&self) -> ExecutorResult<Step> {
        let state = self.lock()?;
        Ok(match &state.cached {
            Cached::Empty => Step::NotProduced,
            Cached::Value(row) => Step::Row(row.clone()),
            Cached::Exhausted => Step::EndOfStream,
        })
    }

    /// Number of fresh pulls that reached the source, exhaustion included
    pub fn pulls(&self) -> u64 {
        self.inner
            .lock()
            .map(|state| state.pulls)
            .unwrap_or_else(|poisoned| poisoned.into_inner().pulls)
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner
            .lock()
            .map(|state| state.cached == Cached::Exhausted)
            .unwrap_or_else(|poisoned| poisoned.into_inner().cached == Cached::Exhausted)
    }

    /// Whether both handles refer to the same underlying position
    pub fn same_as(&self, other: &SharedCursor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCursor")
            .field("pulls", &self.pulls())
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

/// Capability of a leaf operator that can drive, or follow, a shared scan
pub trait SharedScanSource: Send {
    fn scan_kind(&self) -> &ScanKind;

    fn cursor(&self) -> &SharedCursor;

    /// Become a follower of `leader`: read from its cursor from now on.
    ///
    /// Fails when the kinds differ or either side has already pulled from
    /// its source, since sharing would then skip values.
    fn set_shared_source(&mut self, leader: &dyn SharedScanSource) -> ExecutorResult<()>;

    /// `true`: read the cached value. `false`: advance independently.
    fn set_cache_mode(&mut self, use_cached: bool);
}

/// Leaf scan over all nodes, or all nodes with one label
pub struct NodeScan {
    kind: ScanKind,
    cursor: SharedCursor,
    use_cached: bool,
}

impl NodeScan {
    pub fn new(kind: ScanKind, source: Box<dyn NodeSource>) -> Self {
        Self {
            kind,
            cursor: SharedCursor::new(source),
            use_cached: false,
        }
    }
}

impl SharedScanSource for NodeScan {
    fn scan_kind(&self) -> &ScanKind {
        &self.kind
    }

    fn cursor(&self) -> &SharedCursor {
        &self.cursor
    }

    fn set_shared_source(&mut self, leader: &dyn SharedScanSource) -> ExecutorResult<()> {
        if leader.scan_kind() != &self.kind {
            return Err(ExecutorError::incompatible_scan(
                leader.scan_kind(),
                &self.kind,
            ));
        }
        if self.cursor.same_as(leader.cursor()) {
            return Ok(());
        }
        if self.cursor.pulls() > 0 || leader.cursor().pulls() > 0 {
            return Err(ExecutorError::incompatible_scan(
                format!("{} (already started)", leader.scan_kind()),
                format!("{} (already started)", self.kind),
            ));
        }
        self.cursor = leader.cursor().clone();
        Ok(())
    }

    fn set_cache_mode(&mut self, use_cached: bool) {
        self.use_cached = use_cached;
    }
}

impl Operator for NodeScan {
    fn step(&mut self, state: &mut QueryState) -> ExecutorResult<Step> {
        let step = if self.use_cached {
            self.cursor.read_cached()?
        } else {
            self.cursor.pull_fresh()?
        };
        if step.is_row() {
            state.rows_scanned += 1;
        }
        Ok(step)
    }

    fn leaf(&mut self) -> &mut dyn SharedScanSource {
        self
    }

    fn leaf_ref(&self) -> &dyn SharedScanSource {
        self
    }

    fn describe(&self) -> String {
        format!("NodeScan({})", self.kind)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Source over fixed integer ids that can be told to fail
    pub(crate) struct VecSource {
        rows: std::vec::IntoIter<Row>,
        pub(crate) fail_next: u32,
    }

    impl VecSource {
        pub(crate) fn ids(ids: &[i64]) -> Self {
            let rows: Vec<Row> = ids.iter().map(|id| json!({ "id": id })).collect();
            Self {
                rows: rows.into_iter(),
                fail_next: 0,
            }
        }
    }

    impl NodeSource for VecSource {
        fn next_node(&mut self) -> ExecutorResult<Option<Row>> {
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(ExecutorError::transaction_unavailable("injected"));
            }
            Ok(self.rows.next())
        }
    }

    pub(crate) fn person_scan(ids: &[i64]) -> NodeScan {
        NodeScan::new(
            ScanKind::Label("Person".into()),
            Box::new(VecSource::ids(ids)),
        )
    }

    #[test]
    fn test_fresh_scan_reaches_end_once_exhausted() {
        let mut scan = person_scan(&[0, 1]);
        let mut state = QueryState::default();

        assert_eq!(scan.step(&mut state).unwrap(), Step::Row(json!({"id": 0})));
        assert_eq!(scan.step(&mut state).unwrap(), Step::Row(json!({"id": 1})));
        assert!(scan.step(&mut state).unwrap().is_end());
        assert!(scan.step(&mut state).unwrap().is_end());
        assert_eq!(state.rows_scanned, 2);
        assert_eq!(scan.cursor().pulls(), 3);
    }

    #[test]
    fn test_follower_reads_leader_value() {
        let mut leader = person_scan(&[7, 8]);
        let mut follower = person_scan(&[100]);
        follower.set_shared_source(&leader).unwrap();
        follower.set_cache_mode(true);

        let mut ls = QueryState::default();
        let mut fs = QueryState::default();

        assert_eq!(follower.step(&mut fs).unwrap(), Step::NotProduced);

        let produced = leader.step(&mut ls).unwrap();
        assert_eq!(follower.step(&mut fs).unwrap(), produced);
        // Cached reads never move the shared position
        assert_eq!(follower.step(&mut fs).unwrap(), produced);
        assert_eq!(leader.cursor().pulls(), 1);

        leader.step(&mut ls).unwrap();
        leader.step(&mut ls).unwrap();
        assert!(follower.step(&mut fs).unwrap().is_end());
    }

    #[test]
    fn test_incompatible_kinds_rejected() {
        let leader = person_scan(&[1]);
        let mut follower = NodeScan::new(ScanKind::AllNodes, Box::new(VecSource::ids(&[1])));

        let err = follower.set_shared_source(&leader).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_started_scans_cannot_share() {
        let mut leader = person_scan(&[1, 2]);
        leader.step(&mut QueryState::default()).unwrap();

        let mut follower = person_scan(&[1, 2]);
        assert!(follower.set_shared_source(&leader).is_err());
    }

    #[test]
    fn test_failed_pull_leaves_cursor_untouched() {
        let mut source = VecSource::ids(&[5]);
        source.fail_next = 1;
        let mut scan = NodeScan::new(ScanKind::AllNodes, Box::new(source));
        let mut state = QueryState::default();

        let err = scan.step(&mut state).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(scan.cursor().pulls(), 0);
        assert_eq!(scan.step(&mut state).unwrap(), Step::Row(json!({"id": 5})));
    }
}
