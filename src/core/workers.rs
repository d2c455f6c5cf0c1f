//! Fixed-size thread pool for preview generation.
//!
//! Uses work-stealing deques:
//! - External tasks go to a global injector, polled by every worker first
//! - Idle workers steal the oldest tasks from each other
//! - Thread count is the generation concurrency limit
//!
//! Epoch mechanism lets the feed drop queued work for positions the user has
//! already scrolled past.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::{error, trace};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::{Job, WorkerPool};

/// Work-stealing worker pool with a shared epoch counter.
///
/// # Example
/// ```ignore
/// let epoch = Arc::new(AtomicU64::new(0));
/// let workers = Workers::new(2, Arc::clone(&epoch))?;
/// workers.execute(move || generate_preview());
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Spawn `num_threads` workers (at least one).
    ///
    /// `epoch` is shared with whoever invalidates queued work.
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> std::io::Result<Self> {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers_local: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = workers_local.iter().map(|w| w.stealer()).collect();

        let mut pool = Self {
            injector,
            handles: Vec::with_capacity(num_threads),
            current_epoch: epoch,
            shutdown,
        };

        for (worker_id, worker) in workers_local.into_iter().enumerate() {
            let injector = Arc::clone(&pool.injector);
            let shutdown = Arc::clone(&pool.shutdown);
            let stealers = stealers.clone();

            // On spawn failure `pool` drops here and stops the threads already started
            let handle = thread::Builder::new()
                .name(format!("loopfeed-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, worker, injector, stealers, shutdown))?;
            pool.handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);
        Ok(pool)
    }

    /// Number of worker threads (= max concurrent jobs).
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Run a closure on a worker thread. No return value.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Invalidate everything queued so far. Returns the new epoch.
    pub fn bump_epoch(&self) -> u64 {
        self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Run `f` if `epoch` is still current when a worker picks it up,
    /// otherwise run `on_stale`. The check happens at execution time.
    pub fn execute_with_epoch<F, S>(&self, epoch: u64, f: F, on_stale: S)
    where
        F: FnOnce() + Send + 'static,
        S: FnOnce() + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        let wrapped = move || {
            if current_epoch.load(Ordering::Relaxed) == epoch {
                f();
            } else {
                trace!("Skipping stale job (epoch {})", epoch);
                on_stale();
            }
        };
        self.injector.push(Box::new(wrapped));
    }
}

fn worker_loop(
    worker_id: usize,
    worker: Worker<Job>,
    injector: Arc<Injector<Job>>,
    stealers: Vec<Stealer<Job>>,
    shutdown: Arc<AtomicBool>,
) {
    trace!("Worker {} started", worker_id);

    loop {
        // own queue, then injector, then other workers
        let job = worker
            .pop()
            .or_else(|| injector.steal_batch_and_pop(&worker).success())
            .or_else(|| stealers.iter().find_map(|s| s.steal().success()));

        if let Some(job) = job {
            run_job(worker_id, job);
            continue;
        }

        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        thread::sleep(Duration::from_millis(1));
    }

    trace!("Worker {} stopped", worker_id);
}

/// A panicking job must not take the worker thread down with it.
fn run_job(worker_id: usize, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Worker {}: job panicked", worker_id);
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.shutdown.store(true, Ordering::SeqCst);

        // 500ms total for all threads
        let deadline = Instant::now() + Duration::from_millis(500);

        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}

// ============================================================================
// WorkerPool Trait Implementation
// ============================================================================

impl WorkerPool for Workers {
    fn execute_with_epoch(&self, epoch: u64, job: Job, on_stale: Job) {
        Workers::execute_with_epoch(self, epoch, job, on_stale)
    }
}
