//! Bounded worker pool for build and upload jobs
//!
//! A fixed number of threads drain one shared, unbounded queue. The pool is
//! `Active` until [`WorkerPool::wait`] is called, then `Draining` until every
//! queued job has run, then `Terminated`.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::job::{Job, JobResult};

type Work = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of a [`WorkerPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting jobs
    Active,
    /// No new jobs; running what is queued
    Draining,
    /// All workers have exited
    Terminated,
}

struct Queue {
    pending: VecDeque<Work>,
    state: PoolState,
}

struct Shared {
    queue: Mutex<Queue>,
    work_available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs queued jobs on a fixed number of worker threads.
///
/// Queuing never blocks. Jobs run in no particular order; a job that panics
/// is logged and does not affect other jobs or workers.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Start a pool with `size` worker threads (at least one)
    pub fn new(size: usize) -> Self {
        let size = if size == 0 {
            warn!("worker pool size 0 requested, using 1");
            1
        } else {
            size
        };

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                state: PoolState::Active,
            }),
            work_available: Condvar::new(),
        });

        let workers = (0..size)
            .map(|n| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("gantry-worker-{}", n))
                    .spawn(move || worker_loop(n, &shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!(error = %e, "failed to spawn worker thread");
                    None
                }
            })
            .collect();

        debug!(size, "worker pool started");
        Self {
            shared,
            workers: Mutex::new(workers),
            size,
        }
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current lifecycle state
    pub fn state(&self) -> PoolState {
        self.shared.lock().state
    }

    /// Queue a unit of work.
    ///
    /// # Panics
    ///
    /// Panics if [`wait`](Self::wait) has already been called. Queuing after
    /// the drain started is a sequencing bug in the caller.
    #[allow(clippy::panic)]
    pub fn queue<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.lock();
        if queue.state != PoolState::Active {
            let state = queue.state;
            drop(queue);
            panic!("job queued on a worker pool that is {:?}; wait() was already called", state);
        }
        queue.pending.push_back(Box::new(work));
        drop(queue);
        self.shared.work_available.notify_one();
    }

    /// Queue a job and send its result to `results` once it has run
    pub fn queue_job<T>(&self, job: Job<T>, results: Sender<JobResult<T>>)
    where
        T: Send + 'static,
    {
        self.queue(move || {
            let result = job.run();
            if results.send(result).is_err() {
                debug!("job result receiver dropped");
            }
        });
    }

    /// Stop accepting jobs and block until every queued job has completed.
    ///
    /// Call exactly once.
    pub fn wait(&self) {
        {
            let mut queue = self.shared.lock();
            queue.state = PoolState::Draining;
            debug!(pending = queue.pending.len(), "worker pool draining");
        }
        self.shared.work_available.notify_all();

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread exited abnormally");
            }
        }

        self.shared.lock().state = PoolState::Terminated;
        debug!("worker pool terminated");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let mut queue = self.shared.lock();
        if queue.state == PoolState::Active {
            queue.state = PoolState::Draining;
            drop(queue);
            self.shared.work_available.notify_all();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("state", &self.state())
            .finish()
    }
}

fn worker_loop(n: usize, shared: &Shared) {
    loop {
        let work = {
            let mut queue = shared.lock();
            loop {
                if let Some(work) = queue.pending.pop_front() {
                    break Some(work);
                }
                if queue.state != PoolState::Active {
                    break None;
                }
                queue = shared
                    .work_available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        match work {
            Some(work) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(worker = n, panic = %message, "job panicked");
                }
            }
            None => break,
        }
    }
    debug!(worker = n, "worker exiting");
}
