//! Background task runner.
//!
//! Index builds and function-stat writes are launch-and-forget: the caller
//! gets its response first, the work lands later. A small fixed pool of
//! worker threads drains a FIFO queue; a panicking task is isolated and
//! logged without killing its worker.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

/// Error returned when the task queue is full or the runner is stopped.
#[derive(Debug)]
pub struct QueueFull;

impl std::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "background queue is full")
    }
}

impl std::error::Error for QueueFull {}

type Task = Box<dyn FnOnce() + Send>;

struct Inner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    max_depth: usize,
}

/// FIFO background runner with drain and shutdown semantics.
pub struct Background {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Background {
    /// Spawn `workers` threads servicing a queue bounded at `max_depth`.
    pub fn new(workers: usize, max_depth: usize) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            max_depth,
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("docset-bg-{i}"))
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn background worker");
            handles.push(handle);
        }

        Self {
            inner,
            workers: Mutex::new(handles),
        }
    }

    /// Enqueue a task. Fails when the queue is at capacity or the runner
    /// has been shut down.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<(), QueueFull> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(QueueFull);
        }
        if self.inner.queued.load(Ordering::Acquire) >= self.inner.max_depth {
            return Err(QueueFull);
        }
        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(Box::new(task));
            self.inner.queued.fetch_add(1, Ordering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until every queued and in-flight task has finished.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queued.load(Ordering::Acquire) > 0
            || self.inner.active.load(Ordering::Acquire) > 0
        {
            self.inner.idle.wait(&mut queue);
        }
    }

    /// Stop the workers. Remaining queued tasks run before the threads exit.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            // Hold the queue lock while notifying: a worker is either parked
            // in wait() (woken here) or will observe the flag on its next
            // pass. Notifying without the lock can lose the wakeup.
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Tasks completed since the runner started (includes panicked tasks).
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }
}

/// Decrements `active` and wakes drain waiters on drop, so bookkeeping
/// stays correct when a task panics.
struct ActiveGuard<'a> {
    inner: &'a Inner,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let prev = self.inner.active.fetch_sub(1, Ordering::Release);
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        if prev == 1 && self.inner.queued.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.idle.notify_all();
        }
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.queued.fetch_sub(1, Ordering::Release);
                    inner.active.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveGuard { inner };
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                target: "docset::background",
                "background task panicked: {:?}",
                panic.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
