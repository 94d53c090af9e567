//! Bounded execution of persistence work.
//!
//! A [`WorkerPool`] runs units of work on a fixed set of threads. A
//! counting semaphore sized to the pool caps the work in flight, so
//! submitters block instead of growing an unbounded queue.

mod pool;
mod semaphore;
mod task;

pub use pool::WorkerPool;
pub use task::{TaskHandle, TaskStatus};
