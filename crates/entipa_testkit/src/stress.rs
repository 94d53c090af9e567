//! Stress helpers for entipa.
//!
//! These helpers drive the worker pool and the transaction machinery under
//! concurrent load.

use crate::fixtures::{Folder, TestUnit};
use entipa_core::{EntityTransaction, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Highest number of operations observed running at once.
    pub peak_concurrency: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, peak_concurrency: usize, duration: Duration) -> Self {
        Self {
            total_ops: successful + failed,
            successful_ops: successful,
            failed_ops: failed,
            peak_concurrency,
            duration,
        }
    }

    /// Returns operations per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_ops as f64 / secs
        } else {
            0.0
        }
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of submitting threads.
    pub threads: usize,
    /// How long each pooled operation holds its worker.
    pub hold: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            hold: Duration::from_millis(1),
        }
    }
}

/// Tracks how many operations run at once.
#[derive(Debug, Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Submits `config.operations` tasks to `pool` from `config.threads`
/// threads and waits for the pool to go idle.
///
/// Every fifth task fails, so failures are counted too.
pub fn stress_pool(pool: &Arc<WorkerPool>, config: &StressConfig) -> StressTestResult {
    let gauge = Arc::new(Gauge::default());
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let per_thread = config.operations / threads;

    let start = Instant::now();
    let submitters: Vec<_> = (0..threads)
        .map(|t| {
            let pool = Arc::clone(pool);
            let gauge = Arc::clone(&gauge);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let hold = config.hold;
            thread::spawn(move || {
                let handles: Vec<_> = (0..per_thread)
                    .filter_map(|i| {
                        let gauge = Arc::clone(&gauge);
                        pool.spawn(move || {
                            gauge.enter();
                            thread::sleep(hold);
                            gauge.leave();
                            if (t * per_thread + i) % 5 == 4 {
                                Err(entipa_core::PersistenceError::task_failed("planned failure"))
                            } else {
                                Ok(())
                            }
                        })
                        .ok()
                    })
                    .collect();
                for handle in handles {
                    match handle.join() {
                        Ok(()) => successful.fetch_add(1, Ordering::SeqCst),
                        Err(_) => failed.fetch_add(1, Ordering::SeqCst),
                    };
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.join().expect("submitter thread panicked");
    }
    pool.await_idle();

    let result = StressTestResult::new(
        successful.load(Ordering::SeqCst),
        failed.load(Ordering::SeqCst),
        gauge.peak.load(Ordering::SeqCst),
        start.elapsed(),
    );
    info!(
        total = result.total_ops,
        failed = result.failed_ops,
        peak = result.peak_concurrency,
        "pool stress run finished"
    );
    result
}

/// Runs `config.operations` insert transactions spread over
/// `config.threads` threads, each thread with its own entity manager.
pub fn stress_transactions(unit: &TestUnit, config: &StressConfig) -> StressTestResult {
    let threads = config.threads.max(1);
    let per_thread = config.operations / threads;
    let gauge = Arc::new(Gauge::default());

    let start = Instant::now();
    let workers: Vec<_> = (0..threads)
        .map(|t| {
            let factory = unit.factory();
            let gauge = Arc::clone(&gauge);
            thread::spawn(move || {
                let mut em = factory
                    .create_entity_manager()
                    .expect("Failed to create entity manager");
                let (mut ok, mut failed) = (0usize, 0usize);
                for i in 0..per_thread {
                    let id = (t * per_thread + i) as i64;
                    gauge.enter();
                    let result = em.transaction().begin().and_then(|()| {
                        em.persist(Folder::new(id, format!("folder {id}")))?;
                        em.transaction().commit()
                    });
                    gauge.leave();
                    match result {
                        Ok(()) => ok += 1,
                        Err(_) => {
                            failed += 1;
                            if em.transaction().is_active() {
                                let _ = em.transaction().rollback();
                            }
                        }
                    }
                }
                (ok, failed)
            })
        })
        .collect();

    let (mut successful, mut failed) = (0, 0);
    for worker in workers {
        let (ok, err) = worker.join().expect("transaction thread panicked");
        successful += ok;
        failed += err;
    }
    StressTestResult::new(
        successful,
        failed,
        gauge.peak.load(Ordering::SeqCst),
        start.elapsed(),
    )
}
