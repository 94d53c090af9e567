//! Counting semaphore gating submissions to the worker pool.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    changed: Condvar,
    capacity: usize,
}

impl Semaphore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            permits: Mutex::new(capacity),
            changed: Condvar::new(),
            capacity,
        }
    }

    pub(crate) fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.changed.wait(&mut permits);
        }
        *permits -= 1;
    }

    pub(crate) fn release(&self) {
        let mut permits = self.permits.lock();
        *permits = (*permits + 1).min(self.capacity);
        self.changed.notify_all();
    }

    /// Takes every permit at once, then gives them all back.
    ///
    /// Returns only at an instant when no permit was held.
    pub(crate) fn acquire_all_and_release(&self) {
        let mut permits = self.permits.lock();
        while *permits < self.capacity {
            self.changed.wait(&mut permits);
        }
    }

    pub(crate) fn available(&self) -> usize {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_blocks_until_release() {
        let sem = Arc::new(Semaphore::new(1));
        sem.acquire();
        assert_eq!(sem.available(), 0);

        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                sem.acquire();
                sem.release();
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        sem.release();
        waiter.join().unwrap();
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn barrier_waits_for_every_permit() {
        let sem = Arc::new(Semaphore::new(3));
        sem.acquire();
        sem.acquire();
        let barrier = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire_all_and_release())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!barrier.is_finished());
        sem.release();
        sem.release();
        barrier.join().unwrap();
        assert_eq!(sem.available(), 3);
    }
}
