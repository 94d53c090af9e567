//! Worker pool limits and persistence work on the pool.

use entipa_core::admin::work;
use entipa_core::{
    ExecutorConfig, PersistenceContext, PersistenceError, PersistenceResult, TaskStatus,
    UnitConfig, WorkerPool,
};
use entipa_driver::MemoryConnectionSource;
use entipa_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn pool(size: usize) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(
        ExecutorConfig::new()
            .pool_size(size)
            .shutdown_timeout(Duration::from_secs(5)),
    ))
}

fn wait_for(gate: &AtomicBool) {
    while !gate.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
}

fn context() -> (PersistenceContext, MemoryConnectionSource) {
    let resources = Arc::new(MemoryResources::new());
    let mut context = PersistenceContext::new(resources, ExecutorConfig::new().pool_size(3));
    let source = MemoryConnectionSource::new();
    context.add_unit(UnitConfig::new("classyfy"), Arc::new(source.clone()));
    (context, source)
}

#[test]
fn extra_work_waits_for_a_free_permit() {
    let size = 2;
    let pool = pool(size);
    let gate = Arc::new(AtomicBool::new(false));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let blocking = {
        let gate = Arc::clone(&gate);
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let done = Arc::clone(&done);
        move || -> PersistenceResult<()> {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            wait_for(&gate);
            running.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    };

    let handles: Vec<_> = (0..size)
        .map(|_| pool.spawn(blocking.clone()).unwrap())
        .collect();
    assert_eq!(pool.available_permits(), 0);

    let submitted = Arc::new(AtomicBool::new(false));
    let extra = {
        let pool = Arc::clone(&pool);
        let submitted = Arc::clone(&submitted);
        let blocking = blocking.clone();
        thread::spawn(move || {
            let handle = pool.spawn(blocking).unwrap();
            submitted.store(true, Ordering::SeqCst);
            handle.join()
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!submitted.load(Ordering::SeqCst));
    assert!(running.load(Ordering::SeqCst) <= size);

    gate.store(true, Ordering::SeqCst);
    for handle in handles {
        handle.join().unwrap();
    }
    extra.join().unwrap().unwrap();
    pool.await_idle();

    assert_eq!(done.load(Ordering::SeqCst), size + 1);
    assert!(peak.load(Ordering::SeqCst) <= size);
    assert_eq!(pool.available_permits(), size);
}

#[test]
fn await_idle_returns_after_queued_work() {
    let pool = pool(4);
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..12 {
        let done = Arc::clone(&done);
        pool.spawn(move || {
            thread::sleep(Duration::from_millis(2));
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }
    pool.await_idle();
    assert_eq!(done.load(Ordering::SeqCst), 12);
}

#[test]
fn stress_counts_every_task() {
    init_test_logging();
    let pool = pool(4);
    let config = StressConfig {
        operations: 200,
        threads: 4,
        hold: Duration::from_millis(1),
    };

    let result = stress_pool(&pool, &config);
    assert_eq!(result.total_ops, 200);
    assert_eq!(result.failed_ops, 40);
    assert_eq!(result.successful_ops, 160);
    assert!(result.peak_concurrency >= 1);
    assert!(result.peak_concurrency <= 4);
    assert_eq!(pool.available_permits(), 4);
}

#[test]
fn panics_fail_only_their_own_task() {
    let pool = pool(2);
    let handles: Vec<_> = (0..6)
        .map(|i| {
            pool.spawn(move || -> PersistenceResult<usize> {
                if i % 2 == 0 {
                    panic!("task {i} blew up");
                }
                Ok(i)
            })
            .unwrap()
        })
        .collect();

    let mut finished = Vec::new();
    for handle in handles {
        match handle.join() {
            Ok(i) => finished.push(i),
            Err(PersistenceError::TaskFailed { message }) => {
                assert!(message.contains("blew up"));
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(finished, vec![1, 3, 5]);
    assert_eq!(pool.submit(|| Ok(42)).unwrap(), 42);
}

#[test]
fn wait_times_out_on_running_work() {
    let pool = pool(1);
    let gate = Arc::new(AtomicBool::new(false));
    let handle = {
        let gate = Arc::clone(&gate);
        pool.spawn(move || {
            wait_for(&gate);
            Ok(())
        })
        .unwrap()
    };

    assert!(matches!(
        handle.wait(Some(Duration::from_millis(20))),
        Err(PersistenceError::Timeout { .. })
    ));
    assert!(!handle.status().is_done());

    gate.store(true, Ordering::SeqCst);
    assert_eq!(handle.wait(None).unwrap(), TaskStatus::Finished);
    assert_eq!(handle.status(), TaskStatus::Finished);
}

#[test]
fn shutdown_rejects_new_work() {
    let pool = pool(2);
    assert_eq!(pool.submit(|| Ok(1)).unwrap(), 1);

    assert!(pool.shutdown(Duration::from_secs(1)));
    assert!(pool.is_shutdown());
    assert!(pool.shutdown(Duration::from_secs(1)));
    assert!(matches!(
        pool.spawn(|| Ok(())),
        Err(PersistenceError::ExecutorShutdown)
    ));
}

#[test]
fn concurrent_work_on_one_unit() {
    let (context, source) = context();
    let handles: Vec<_> = (0..20i64)
        .map(|id| {
            context
                .spawn(
                    "classyfy",
                    work(move |em| {
                        em.persist(Folder::new(id, format!("folder {id}")))?;
                        Ok(id)
                    }),
                )
                .unwrap()
        })
        .collect();

    let mut ids: Vec<i64> = handles
        .into_iter()
        .map(|handle| {
            let outcome = handle.join().unwrap();
            assert!(outcome.is_clean());
            outcome.value
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..20).collect::<Vec<_>>());

    let inserts = source
        .committed_statements()
        .iter()
        .filter(|sql| sql.starts_with("INSERT INTO folders"))
        .count();
    assert_eq!(inserts, 20);
    assert_eq!(source.open_connections(), 0);
    assert!(context.close().unwrap());
}

#[test]
fn panicking_work_releases_its_connection() {
    let (context, source) = context();
    let result = context.execute(
        "classyfy",
        work(|em| -> PersistenceResult<()> {
            em.persist(Folder::new(1, "inbox"))?;
            panic!("work blew up");
        }),
    );

    assert!(matches!(result, Err(PersistenceError::TaskFailed { .. })));
    assert!(source.committed_statements().is_empty());
    assert_eq!(source.open_connections(), 0);

    let outcome = context
        .execute("classyfy", work(|em| em.persist(Folder::new(2, "archive")).map(|_| ())))
        .unwrap();
    assert!(outcome.is_clean());
    assert_eq!(source.committed_statements().len(), 1);
}

#[test]
fn post_commit_failures_do_not_fail_the_work() {
    let (context, source) = context();
    let outcome = context
        .execute(
            "classyfy",
            work(|em| {
                em.persist(Folder::new(1, "inbox"))?;
                em.transaction()
                    .register_post_commit(|| Err("audit log unavailable".into()));
                Ok("saved")
            }),
        )
        .unwrap();

    assert_eq!(outcome.value, "saved");
    assert!(!outcome.is_clean());
    assert_eq!(outcome.post_commit_failures.len(), 1);
    assert_eq!(
        outcome.post_commit_failures[0].message,
        "unexpected failure: audit log unavailable"
    );
    assert_eq!(source.committed_statements().len(), 1);
}
