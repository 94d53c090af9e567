//! Fixed-size worker pool.

use super::semaphore::Semaphore;
use super::task::{task, TaskHandle};
use crate::config::ExecutorConfig;
use crate::error::{PersistenceError, PersistenceResult};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    running: usize,
    shutdown: bool,
}

struct Inner {
    queue: Mutex<Queue>,
    ready: Condvar,
    idle: Condvar,
    permits: Semaphore,
}

/// Returns a permit to the semaphore when the job holding it is dropped.
struct Permit(Arc<Inner>);

impl Drop for Permit {
    fn drop(&mut self) {
        self.0.permits.release();
    }
}

#[derive(Default)]
struct Lifecycle {
    workers: Vec<JoinHandle<()>>,
    started: bool,
    shut_down: bool,
}

/// A fixed-size pool of worker threads for persistence work.
///
/// The pool holds at most `pool_size` units of work at a time, queued or
/// running: submitting more blocks the caller until a permit frees.
///
/// ## Lifecycle
///
/// Threads start on the first submission, under one activation lock.
/// [`shutdown`](Self::shutdown) lets queued work finish within a timeout,
/// then cancels whatever has not started. Dropping the pool shuts it down.
pub struct WorkerPool {
    inner: Arc<Inner>,
    config: ExecutorConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl WorkerPool {
    /// Creates a pool; no thread starts until work is submitted.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(Queue::default()),
                ready: Condvar::new(),
                idle: Condvar::new(),
                permits: Semaphore::new(config.pool_size),
            }),
            config,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Returns the process-wide pool, created with default settings on
    /// first use.
    pub fn global() -> &'static WorkerPool {
        static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();
        GLOBAL.get_or_init(|| WorkerPool::new(ExecutorConfig::default()))
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Returns true once worker threads have started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.lifecycle.lock().started
    }

    /// Returns true once the pool has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.lifecycle.lock().shut_down
    }

    /// Returns the number of free submission permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.inner.permits.available()
    }

    fn ensure_started(&self) -> PersistenceResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.shut_down {
            return Err(PersistenceError::ExecutorShutdown);
        }
        if lifecycle.started {
            return Ok(());
        }
        for i in 0..self.config.pool_size {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(format!("entipa-worker-{i}"))
                .spawn(move || worker_loop(&inner))?;
            lifecycle.workers.push(handle);
        }
        lifecycle.started = true;
        info!(pool_size = self.config.pool_size, "worker pool started");
        Ok(())
    }

    /// Queues `work` and returns a handle to its completion.
    ///
    /// Blocks while every permit is held. A panic inside `work` fails the
    /// task with `TaskFailed` and leaves the pool running.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorShutdown` if the pool has been shut down.
    pub fn spawn<T, F>(&self, work: F) -> PersistenceResult<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> PersistenceResult<T> + Send + 'static,
    {
        self.ensure_started()?;
        self.inner.permits.acquire();
        let permit = Permit(Arc::clone(&self.inner));

        let (handle, completer) = task::<T>();
        let task_id = handle.id();
        let job: Job = Box::new(move || {
            let _permit = permit;
            completer.set_running();
            let result = catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|panic| Err(PersistenceError::task_failed(panic_message(&*panic))));
            if let Err(e) = &result {
                warn!(task = %task_id, error = %e, "task failed");
            }
            completer.complete(result);
        });

        let mut queue = self.inner.queue.lock();
        if queue.shutdown {
            drop(queue);
            drop(job);
            return Err(PersistenceError::ExecutorShutdown);
        }
        queue.jobs.push_back(job);
        self.inner.ready.notify_one();
        debug!(task = %task_id, "task queued");
        Ok(handle)
    }

    /// Runs `work` on the pool and blocks until it completes.
    ///
    /// # Errors
    ///
    /// Returns the work's error, `TaskFailed` if it panicked, or
    /// `ExecutorShutdown`.
    pub fn submit<T, F>(&self, work: F) -> PersistenceResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> PersistenceResult<T> + Send + 'static,
    {
        self.spawn(work)?.join()
    }

    /// Blocks until no submitted work is queued or running.
    pub fn await_idle(&self) {
        self.inner.permits.acquire_all_and_release();
    }

    /// Stops the pool.
    ///
    /// Queued work may finish for up to `timeout`; work that has not started
    /// by then is cancelled. Work already running is never interrupted.
    /// Returns true if everything finished within the timeout.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.shut_down {
            return true;
        }
        lifecycle.shut_down = true;

        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock();
        queue.shutdown = true;
        self.inner.ready.notify_all();
        while !queue.jobs.is_empty() || queue.running > 0 {
            if self.inner.idle.wait_until(&mut queue, deadline).timed_out() {
                break;
            }
        }
        let graceful = queue.jobs.is_empty() && queue.running == 0;
        let cancelled: Vec<Job> = queue.jobs.drain(..).collect();
        drop(queue);

        if !cancelled.is_empty() {
            warn!(cancelled = cancelled.len(), "shutdown timed out, cancelling queued tasks");
        }
        drop(cancelled);

        let workers = std::mem::take(&mut lifecycle.workers);
        if graceful {
            for worker in workers {
                if worker.join().is_err() {
                    warn!("worker thread panicked");
                }
            }
        }
        info!(graceful, "worker pool shut down");
        graceful
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.is_started() {
            self.shutdown(self.config.shutdown_timeout);
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool_size", &self.config.pool_size)
            .field("available_permits", &self.available_permits())
            .field("started", &self.is_started())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    queue.running += 1;
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                inner.ready.wait(&mut queue);
            }
        };
        job();
        inner.queue.lock().running -= 1;
        inner.idle.notify_all();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}
