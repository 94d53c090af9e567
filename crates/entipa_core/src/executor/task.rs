//! Completion handles for pooled work.

use crate::error::{PersistenceError, PersistenceResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Status of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Queued, not yet running.
    Pending,
    /// Running on a worker.
    Running,
    /// Completed successfully.
    Finished,
    /// Completed with an error, a panic, or cancelled before it started.
    Failed,
}

impl TaskStatus {
    /// Returns true for `Finished` and `Failed`.
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Failed)
    }
}

struct Slot<T> {
    status: TaskStatus,
    result: Option<PersistenceResult<T>>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// Handle to a unit of work submitted to a worker pool.
pub struct TaskHandle<T> {
    id: Uuid,
    shared: Arc<Shared<T>>,
}

impl<T> TaskHandle<T> {
    /// Returns the task ID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.shared.slot.lock().status
    }

    /// Blocks until the task is done, or until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the task is still pending or running when the
    /// timeout elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> PersistenceResult<TaskStatus> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.shared.slot.lock();
        while !slot.status.is_done() {
            match deadline {
                Some(deadline) => {
                    if self.shared.done.wait_until(&mut slot, deadline).timed_out()
                        && !slot.status.is_done()
                    {
                        return Err(PersistenceError::timeout(format!("task {}", self.id)));
                    }
                }
                None => self.shared.done.wait(&mut slot),
            }
        }
        Ok(slot.status)
    }

    /// Blocks until the task is done and returns its result.
    ///
    /// # Errors
    ///
    /// Returns the task's error, `TaskFailed` if it panicked, or
    /// `TaskCancelled` if it never started.
    pub fn join(self) -> PersistenceResult<T> {
        let mut slot = self.shared.slot.lock();
        while !slot.status.is_done() {
            self.shared.done.wait(&mut slot);
        }
        slot.result
            .take()
            .unwrap_or_else(|| Err(PersistenceError::task_failed("result already taken")))
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// The worker side of a [`TaskHandle`].
///
/// Dropping a completer that never completed marks the task cancelled,
/// so work discarded at shutdown never leaves a waiter blocked.
pub(crate) struct TaskCompleter<T> {
    shared: Arc<Shared<T>>,
    completed: bool,
}

impl<T> TaskCompleter<T> {
    pub(crate) fn set_running(&self) {
        self.shared.slot.lock().status = TaskStatus::Running;
    }

    pub(crate) fn complete(mut self, result: PersistenceResult<T>) {
        self.finish(result);
    }

    fn finish(&mut self, result: PersistenceResult<T>) {
        let mut slot = self.shared.slot.lock();
        slot.status = if result.is_ok() {
            TaskStatus::Finished
        } else {
            TaskStatus::Failed
        };
        slot.result = Some(result);
        self.completed = true;
        self.shared.done.notify_all();
    }
}

impl<T> Drop for TaskCompleter<T> {
    fn drop(&mut self) {
        if !self.completed {
            self.finish(Err(PersistenceError::TaskCancelled));
        }
    }
}

/// Creates a pending task and its completer.
pub(crate) fn task<T>() -> (TaskHandle<T>, TaskCompleter<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            status: TaskStatus::Pending,
            result: None,
        }),
        done: Condvar::new(),
    });
    (
        TaskHandle {
            id: Uuid::new_v4(),
            shared: Arc::clone(&shared),
        },
        TaskCompleter {
            shared,
            completed: false,
        },
    )
}
