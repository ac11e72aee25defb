//! Executor plug point.
//!
//! The channel core has no opinions about scheduling: activities are
//! whatever the caller runs them on, and every channel operation suspends
//! only inside its completer. What the core does promise is that it keeps
//! working on a capped pool, including a single-threaded one, so this
//! module defines the contract an executor must honour — capped
//! parallelism plus a drain barrier — and ships a plain thread pool that
//! honours it.
//!
//! Workers pull jobs from a lock-free injection queue and park on a
//! condvar when it runs dry. `ensure_finished` waits until every job
//! submitted so far has run to completion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::time::Deadline;

/// A boxed unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Contract for running detached activities with capped parallelism.
pub trait Executor: Send + Sync {
    /// Schedules a job. Never blocks the caller.
    fn spawn(&self, job: Job);

    /// Blocks until all work scheduled so far has drained, or the deadline
    /// passes. Returns true if the pool drained.
    fn ensure_finished(&self, deadline: Deadline) -> bool;
}

struct PoolInner {
    queue: SegQueue<Job>,
    /// Jobs submitted and not yet finished (queued + running).
    outstanding: AtomicUsize,
    shutdown: AtomicBool,
    lock: Mutex<()>,
    work_cond: Condvar,
    idle_cond: Condvar,
}

/// A fixed-size thread pool satisfying the [`Executor`] contract.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads)
            .field(
                "outstanding",
                &self.inner.outstanding.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl ThreadPool {
    /// Spawns a pool of exactly `threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0, "pool needs at least one thread");
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            outstanding: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            lock: Mutex::new(()),
            work_cond: Condvar::new(),
            idle_cond: Condvar::new(),
        });
        let workers = (0..threads)
            .map(|i| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("alting-pool-{i}"))
                    .spawn(move || worker(&inner))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        Self {
            inner,
            workers: Mutex::new(workers),
            threads,
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn parallelism(&self) -> usize {
        self.threads
    }

    /// Convenience wrapper over [`Executor::spawn`] for closures.
    pub fn spawn_fn(&self, f: impl FnOnce() + Send + 'static) {
        self.spawn(Box::new(f));
    }
}

fn worker(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            job();
            if inner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle_cond.notify_all();
            }
            continue;
        }
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let guard = inner.lock.lock().expect("pool lock poisoned");
        // Re-check under the lock so a submit between pop and park is not
        // missed.
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::SeqCst) {
            continue;
        }
        drop(
            inner
                .work_cond
                .wait_timeout(guard, Duration::from_millis(100))
                .expect("pool lock poisoned"),
        );
    }
}

impl Executor for ThreadPool {
    fn spawn(&self, job: Job) {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        self.inner.queue.push(job);
        self.inner.work_cond.notify_one();
    }

    fn ensure_finished(&self, deadline: Deadline) -> bool {
        let mut guard = self.inner.lock.lock().expect("pool lock poisoned");
        loop {
            if self.inner.outstanding.load(Ordering::SeqCst) == 0 {
                return true;
            }
            match deadline.remaining() {
                None => {
                    guard = self
                        .inner
                        .idle_cond
                        .wait(guard)
                        .expect("pool lock poisoned");
                }
                Some(wait) if wait.is_zero() => return false,
                Some(wait) => {
                    let (reacquired, timeout) = self
                        .inner
                        .idle_cond
                        .wait_timeout(guard, wait)
                        .expect("pool lock poisoned");
                    guard = reacquired;
                    if timeout.timed_out()
                        && self.inner.outstanding.load(Ordering::SeqCst) != 0
                        && deadline.is_elapsed()
                    {
                        return false;
                    }
                }
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.work_cond.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock().expect("pool lock poisoned"));
        for handle in workers {
            let _ = handle.join();
        }
    }
}
