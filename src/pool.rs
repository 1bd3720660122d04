//! Bounded pool of connection worker threads.
//!
//! Every spawned worker stays tracked until it is joined, either
//! opportunistically once it finished or by [`WorkerPool::join_all`]
//! during teardown. When `capacity` workers are alive, `spawn` blocks
//! until one of them exits.

use slab::Slab;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Slot key of a tracked worker.
pub type WorkerId = usize;

struct PoolState {
    handles: Slab<JoinHandle<()>>,
    /// Workers whose body has not returned yet.
    active: usize,
}

struct Shared {
    state: Mutex<PoolState>,
    vacancy: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Worker bodies run outside the lock, so a poisoned guard still
        // holds consistent counters.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements the active count when a worker body ends, even by panic.
struct ActiveGuard(Arc<Shared>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.active -= 1;
        drop(state);
        self.0.vacancy.notify_one();
    }
}

/// Outcome of joining every tracked worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinSummary {
    pub joined: usize,
    pub failed: usize,
}

/// Pool of worker threads
pub struct WorkerPool {
    shared: Arc<Shared>,
    capacity: usize,
}

impl WorkerPool {
    /// Create a pool allowing at most `capacity` live workers.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    handles: Slab::with_capacity(capacity),
                    active: 0,
                }),
                vacancy: Condvar::new(),
            }),
            capacity,
        }
    }

    /// Maximum number of live workers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of workers whose body is still running.
    pub fn active(&self) -> usize {
        self.shared.lock().active
    }

    /// Number of worker handles not yet joined.
    pub fn tracked(&self) -> usize {
        self.shared.lock().handles.len()
    }

    /// Start a worker thread named `name` running `task`.
    ///
    /// Blocks while the pool is full. If the thread cannot be created
    /// the task is dropped without running, releasing everything it owns.
    pub fn spawn<F>(&self, name: String, task: F) -> Result<WorkerId, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.lock();
        reap_finished(&mut state.handles);

        while state.active >= self.capacity {
            debug!(capacity = self.capacity, "Worker pool full, waiting");
            state = self
                .shared
                .vacancy
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            reap_finished(&mut state.handles);
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let _guard = ActiveGuard(shared);
            task();
        });

        match spawned {
            Ok(handle) => {
                state.active += 1;
                let id = state.handles.insert(handle);
                Ok(id)
            }
            Err(e) => Err(SpawnError { name, source: e }),
        }
    }

    /// Join every tracked worker, blocking until each has finished.
    ///
    /// A worker that panicked is reported and counted; the sweep goes on.
    pub fn join_all(&self) -> JoinSummary {
        let handles: Vec<JoinHandle<()>> = self.shared.lock().handles.drain().collect();

        let mut summary = JoinSummary::default();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            info!(worker = %name, "Joining worker");
            match handle.join() {
                Ok(()) => summary.joined += 1,
                Err(_) => {
                    error!(worker = %name, "Unable to join worker");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

/// Join and drop handles of workers that already exited.
fn reap_finished(handles: &mut Slab<JoinHandle<()>>) {
    let finished: Vec<WorkerId> = handles
        .iter()
        .filter(|(_, h)| h.is_finished())
        .map(|(id, _)| id)
        .collect();

    for id in finished {
        let handle = handles.remove(id);
        if handle.join().is_err() {
            error!(worker = id, "Worker panicked");
        }
    }
}

/// Failure to start a worker thread
#[derive(Debug)]
pub struct SpawnError {
    pub name: String,
    pub source: io::Error,
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to start worker '{}': {}", self.name, self.source)
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_join_all_waits_for_every_worker() {
        let pool = WorkerPool::new(8);
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..20 {
            let done = Arc::clone(&done);
            pool.spawn(format!("test-{i}"), move || {
                thread::sleep(Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let summary = pool.join_all();
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(summary.failed, 0);
        assert!(summary.joined <= 20);
        assert_eq!(pool.tracked(), 0);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_spawn_blocks_when_full() {
        let pool = Arc::new(WorkerPool::new(2));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        for i in 0..2 {
            let rx = Arc::clone(&release_rx);
            pool.spawn(format!("held-{i}"), move || {
                let _ = rx.lock().unwrap().recv();
            })
            .unwrap();
        }
        assert_eq!(pool.active(), 2);

        let (spawned_tx, spawned_rx) = mpsc::channel();
        let third = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                pool.spawn("third".to_string(), || {}).unwrap();
                spawned_tx.send(()).unwrap();
            })
        };

        // Still full: the third spawn must not go through.
        assert!(spawned_rx.recv_timeout(Duration::from_millis(100)).is_err());

        release_tx.send(()).unwrap();
        spawned_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        third.join().unwrap();

        release_tx.send(()).unwrap();
        let summary = pool.join_all();
        assert_eq!(summary.failed, 0);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_panicking_worker_is_counted() {
        let pool = WorkerPool::new(4);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.spawn("ok".to_string(), move || {
            let _ = release_rx.recv();
        })
        .unwrap();
        pool.spawn("boom".to_string(), || panic!("worker failure"))
            .unwrap();
        release_tx.send(()).unwrap();

        // No further spawn happens, so neither handle gets reaped early.
        while pool.active() > 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let summary = pool.join_all();
        assert_eq!(summary, JoinSummary { joined: 1, failed: 1 });
    }

    #[test]
    fn test_finished_workers_are_reaped() {
        let pool = WorkerPool::new(4);
        pool.spawn("first".to_string(), || {}).unwrap();

        while pool.active() > 0 {
            thread::sleep(Duration::from_millis(1));
        }
        // Active count drops before the thread fully exits.
        while pool.shared.lock().handles.iter().any(|(_, h)| !h.is_finished()) {
            thread::sleep(Duration::from_millis(1));
        }

        pool.spawn("second".to_string(), || {}).unwrap();
        assert_eq!(pool.tracked(), 1);
        pool.join_all();
    }
}
