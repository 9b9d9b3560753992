//! Completion ledger
//!
//! Start and finish timestamps per operation, plus a most-recent-first log
//! of completions used to count throughput over a trailing window.
//!
//! # Invariants
//!
//! - Completion records are kept in descending `completed_at` order: the
//!   timestamp is taken while holding the ledger lock, then pushed to the
//!   front. Window counts can therefore stop at the first older record.
//! - Finished operations are kept for the retention period only. Each new
//!   completion or failure drops the records that fell out of it, together
//!   with their start and finish times. Windows longer than the retention
//!   see only the retained records.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use super::errors::LedgerError;

/// Time source for ledger timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock, for deterministic measurements
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One completed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    pub sequence_number: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerState {
    start_times: HashMap<u64, DateTime<Utc>>,
    finish_times: HashMap<u64, DateTime<Utc>>,
    /// Successful completions, most recent first
    records: VecDeque<CompletionRecord>,
    /// Failed operations, most recent first. They never get a finish time.
    failures: VecDeque<CompletionRecord>,
}

impl LedgerState {
    /// Forget every finished operation older than `cutoff`
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while let Some(record) = self.records.back().copied() {
            if record.completed_at >= cutoff {
                break;
            }
            self.records.pop_back();
            self.finish_times.remove(&record.sequence_number);
            self.start_times.remove(&record.sequence_number);
        }
        while let Some(record) = self.failures.back().copied() {
            if record.completed_at >= cutoff {
                break;
            }
            self.failures.pop_back();
            self.start_times.remove(&record.sequence_number);
        }
    }
}

pub struct CompletionLedger {
    clock: Arc<dyn Clock>,
    retention: Duration,
    state: Mutex<LedgerState>,
}

impl CompletionLedger {
    /// Ledger keeping finished operations for `retention`
    pub fn new(clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            clock,
            retention,
            state: Mutex::new(LedgerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn record_start(&self, sequence_number: u64) -> DateTime<Utc> {
        let at = self.clock.now();
        self.state().start_times.insert(sequence_number, at);
        at
    }

    pub fn record_completion(&self, sequence_number: u64) -> DateTime<Utc> {
        let mut state = self.state();
        let at = self.clock.now();
        state.finish_times.insert(sequence_number, at);
        state.records.push_front(CompletionRecord {
            sequence_number,
            completed_at: at,
        });
        state.prune(at - self.retention);
        at
    }

    /// Note a failed operation so its start time is released with the
    /// retention period
    pub fn record_failure(&self, sequence_number: u64) -> DateTime<Utc> {
        let mut state = self.state();
        let at = self.clock.now();
        state.failures.push_front(CompletionRecord {
            sequence_number,
            completed_at: at,
        });
        state.prune(at - self.retention);
        at
    }

    /// Elapsed time between start and completion of one operation
    pub fn operation_time(&self, sequence_number: u64) -> Result<Duration, LedgerError> {
        let state = self.state();
        let started = state
            .start_times
            .get(&sequence_number)
            .copied()
            .ok_or(LedgerError::NoStartTime(sequence_number))?;
        let finished = state
            .finish_times
            .get(&sequence_number)
            .copied()
            .ok_or(LedgerError::NoFinishTime(sequence_number))?;
        Ok(finished - started)
    }

    /// Completions with `now - window <= completed_at <= now`.
    ///
    /// Records newer than `now` are skipped; the scan stops at the first
    /// record older than the window.
    pub fn completed_within(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let oldest_allowed = now - window;
        self.state()
            .records
            .iter()
            .take_while(|r| r.completed_at >= oldest_allowed)
            .filter(|r| r.completed_at <= now)
            .count()
    }

    /// Retained completions
    pub fn completed_count(&self) -> usize {
        self.state().records.len()
    }

    /// Up to `limit` most recent completions, newest first
    pub fn recent(&self, limit: usize) -> Vec<CompletionRecord> {
        self.state().records.iter().take(limit).copied().collect()
    }
}

impl std::fmt::Debug for CompletionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionLedger")
            .field("retention", &self.retention)
            .field("completed", &self.completed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ledger_with_retention(retention: Duration) -> (Arc<ManualClock>, CompletionLedger) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let ledger = CompletionLedger::new(clock.clone(), retention);
        (clock, ledger)
    }

    fn ledger() -> (Arc<ManualClock>, CompletionLedger) {
        ledger_with_retention(Duration::hours(1))
    }

    #[test]
    fn test_operation_time() {
        let (clock, ledger) = ledger();
        ledger.record_start(1);
        clock.advance(Duration::milliseconds(250));
        ledger.record_completion(1);

        assert_eq!(ledger.operation_time(1).unwrap(), Duration::milliseconds(250));
    }

    #[test]
    fn test_lookup_misses_are_reported() {
        let (_, ledger) = ledger();
        assert_eq!(ledger.operation_time(9), Err(LedgerError::NoStartTime(9)));

        ledger.record_start(9);
        assert_eq!(ledger.operation_time(9), Err(LedgerError::NoFinishTime(9)));

        ledger.record_failure(9);
        assert_eq!(ledger.operation_time(9), Err(LedgerError::NoFinishTime(9)));
    }

    #[test]
    fn test_completed_within_window() {
        let (clock, ledger) = ledger();
        for seq in 0..5 {
            ledger.record_completion(seq);
            clock.advance(Duration::milliseconds(400));
        }
        // Completions at t=0, 400, 800, 1200, 1600 ms; now = 2000 ms
        let now = clock.now();
        assert_eq!(ledger.completed_within(Duration::seconds(1), now), 2);
        assert_eq!(ledger.completed_within(Duration::seconds(2), now), 5);
        assert_eq!(ledger.completed_within(Duration::milliseconds(100), now), 0);
    }

    #[test]
    fn test_records_newer_than_now_are_skipped() {
        let (clock, ledger) = ledger();
        let earlier = clock.now();
        clock.advance(Duration::seconds(5));
        ledger.record_completion(1);

        assert_eq!(ledger.completed_within(Duration::seconds(1), earlier), 0);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let (clock, ledger) = ledger();
        ledger.record_completion(1);
        clock.advance(Duration::seconds(1));
        ledger.record_completion(2);

        let recent = ledger.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sequence_number, 2);
        assert!(recent[0].completed_at > recent[1].completed_at);
    }

    #[test]
    fn test_expired_operations_are_forgotten() {
        let (clock, ledger) = ledger_with_retention(Duration::seconds(10));
        ledger.record_start(1);
        ledger.record_start(2);
        ledger.record_start(3);
        ledger.record_completion(1);
        ledger.record_failure(2);

        clock.advance(Duration::seconds(11));
        ledger.record_completion(3);

        assert_eq!(ledger.completed_count(), 1);
        assert_eq!(ledger.operation_time(1), Err(LedgerError::NoStartTime(1)));
        assert_eq!(ledger.operation_time(2), Err(LedgerError::NoStartTime(2)));
        assert_eq!(ledger.operation_time(3).unwrap(), Duration::seconds(11));
    }

    #[test]
    fn test_pending_start_times_survive_pruning() {
        let (clock, ledger) = ledger_with_retention(Duration::seconds(1));
        ledger.record_start(7);
        clock.advance(Duration::seconds(30));
        ledger.record_completion(8);

        assert_eq!(ledger.operation_time(7), Err(LedgerError::NoFinishTime(7)));
    }
}
