//! Fixed-size worker pool
//!
//! Jobs run as blocking tasks on a dedicated tokio runtime whose blocking
//! thread limit is the pool size, so at most `size` jobs run at once and the
//! rest wait in the runtime's queue. The pool counts queued jobs (submitted,
//! not yet started) and running jobs; the dispatcher reads both for
//! backpressure.
//!
//! A job that panics is logged and counted as finished. The worker thread
//! survives.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use super::errors::{panic_message, BatchError, BatchResult};
use crate::observability::{log_event_with_fields, Event};

/// Upper bound on one idle wait; the loop re-checks the counters after it
const IDLE_RECHECK: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct PoolState {
    queued: AtomicUsize,
    running: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl PoolState {
    fn in_flight(&self) -> usize {
        self.queued.load(Ordering::Acquire) + self.running.load(Ordering::Acquire)
    }

    fn wait_idle(&self) {
        let mut guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.in_flight() > 0 {
            guard = self
                .idle
                .wait_timeout(guard, IDLE_RECHECK)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Counts a job as running until dropped, unwinding included
struct RunningGuard<'a> {
    state: &'a PoolState,
}

impl<'a> RunningGuard<'a> {
    fn start(state: &'a PoolState) -> Self {
        // Raise `running` first so `in_flight` never dips to zero mid-handoff
        state.running.fetch_add(1, Ordering::AcqRel);
        state.queued.fetch_sub(1, Ordering::AcqRel);
        Self { state }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.state.running.fetch_sub(1, Ordering::AcqRel);
        if self.state.in_flight() == 0 {
            let _guard = self
                .state
                .idle_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.state.idle.notify_all();
        }
    }
}

pub struct WorkerPool {
    name: &'static str,
    runtime: Option<Runtime>,
    num_workers: usize,
    state: Arc<PoolState>,
}

impl WorkerPool {
    /// Pool of `size` workers with threads named `aerograph-{name}-{i}`
    pub fn new(name: &'static str, size: usize) -> BatchResult<Self> {
        let size = size.max(1);
        let next_thread = AtomicUsize::new(0);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(size)
            .thread_name_fn(move || {
                format!(
                    "aerograph-{}-{}",
                    name,
                    next_thread.fetch_add(1, Ordering::Relaxed)
                )
            })
            .build()
            .map_err(|e| BatchError::PoolUnavailable(e.to_string()))?;

        Ok(Self {
            name,
            runtime: Some(runtime),
            num_workers: size,
            state: Arc::new(PoolState::default()),
        })
    }

    /// Queue a job for the next idle worker
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> BatchResult<()> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| BatchError::PoolUnavailable("pool is shut down".into()))?;

        let state = Arc::clone(&self.state);
        let name = self.name;
        state.queued.fetch_add(1, Ordering::AcqRel);
        runtime.spawn_blocking(move || {
            let _running = RunningGuard::start(&state);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                log_event_with_fields(
                    Event::TaskPanicked,
                    &[("pool", name), ("reason", &panic_message(payload.as_ref()))],
                );
            }
        });
        Ok(())
    }

    /// Jobs submitted but not yet picked up
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::Acquire)
    }

    /// Jobs queued or running
    pub fn in_flight(&self) -> usize {
        self.state.in_flight()
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn is_shut_down(&self) -> bool {
        self.runtime.is_none()
    }

    /// Stop accepting jobs, wait for queued and running jobs to finish, and
    /// release the worker threads
    pub fn shutdown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.state.wait_idle();
        runtime.shutdown_background();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.num_workers)
            .field("queued", &self.queued())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Instant;

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_runs_jobs() {
        let mut pool = WorkerPool::new("test", 2).unwrap();
        let (tx, rx) = channel();
        for i in 0..8 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap()).unwrap();
        }
        let mut seen: Vec<i32> = (0..8).map(|_| rx.recv().unwrap()).collect();
        seen.sort();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());

        pool.shutdown();
        assert!(pool.is_shut_down());
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_queued_counts_waiting_jobs() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let (release_tx, release_rx) = channel::<()>();
        let (started_tx, started_rx) = channel::<()>();

        pool.execute(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.execute(|| {}).unwrap();
        pool.execute(|| {}).unwrap();
        assert_eq!(pool.queued(), 2);
        assert_eq!(pool.in_flight(), 3);

        release_tx.send(()).unwrap();
        wait_until(|| pool.in_flight() == 0);
    }

    #[test]
    fn test_panicking_job_is_counted_finished() {
        let mut pool = WorkerPool::new("test", 1).unwrap();
        pool.execute(|| panic!("operator exploded")).unwrap();
        wait_until(|| pool.in_flight() == 0);

        // The single worker is still serving jobs
        let (tx, rx) = channel();
        pool.execute(move || tx.send(42).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);

        pool.shutdown();
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_shutdown_waits_for_running_jobs() {
        let mut pool = WorkerPool::new("test", 2).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let finished = Arc::clone(&finished);
            pool.execute(move || {
                std::thread::sleep(Duration::from_millis(20));
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_execute_after_shutdown_fails() {
        let mut pool = WorkerPool::new("test", 1).unwrap();
        pool.shutdown();
        assert!(matches!(
            pool.execute(|| {}),
            Err(BatchError::PoolUnavailable(_))
        ));
        assert_eq!(pool.queued(), 0);
    }
}
