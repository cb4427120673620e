// tests/pool_scheduling.rs
//
// Scheduling behaviour of the compression pool: dispatch order, bounded
// concurrency, crash isolation, timeouts, admission and shutdown. The units
// here are closures, so no real codec work happens.

mod common;

use common::{accept_all, block_on, file_name, gated, unit, wait_until, Storage};
use gallery_compressor::{
    CompressError, CompressionOutcome, CompressionPool, ErrorCategory, InMemoryMetadata,
    JobOutcome, ReconcileError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn size_of_name(path: &Path) -> CompressionOutcome {
    CompressionOutcome::Ok {
        new_size: file_name(path).len() as u64,
    }
}

#[test]
fn single_worker_dispatches_in_submission_order() {
    let storage = Storage::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_unit = Arc::clone(&seen);
    let unit = unit(move |path: &Path| {
        seen_by_unit.lock().push(file_name(path));
        size_of_name(path)
    });

    let pool = CompressionPool::with_unit(storage.config(1), unit, accept_all()).unwrap();
    let names: Vec<String> = (0..8).map(|i| format!("img-{i}.jpg")).collect();
    let handles = pool.submit_all(names.iter().map(|n| storage.path(n)));

    let ids: Vec<u64> = handles.iter().map(|h| h.id().get()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    for handle in handles {
        assert!(handle.wait().unwrap().is_compressed());
    }
    assert_eq!(*seen.lock(), names);
}

#[test]
fn busy_workers_never_exceed_pool_size() {
    const POOL: usize = 3;
    let storage = Storage::new();
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(Mutex::new(HashMap::<String, usize>::new()));

    let (r, m, c) = (running.clone(), max_running.clone(), runs.clone());
    let unit = unit(move |path: &Path| {
        let now = r.fetch_add(1, Ordering::SeqCst) + 1;
        m.fetch_max(now, Ordering::SeqCst);
        *c.lock().entry(file_name(path)).or_default() += 1;
        thread::sleep(Duration::from_millis(15));
        r.fetch_sub(1, Ordering::SeqCst);
        size_of_name(path)
    });

    let pool = CompressionPool::with_unit(storage.config(POOL), unit, accept_all()).unwrap();
    let handles = pool.submit_all((0..POOL * 10).map(|i| storage.path(&format!("{i}.png"))));
    for handle in handles {
        handle.wait().unwrap();
    }

    assert!(max_running.load(Ordering::SeqCst) <= POOL);
    assert!(wait_until(|| pool.stats().compressed == (POOL * 10) as u64));
    assert_eq!(pool.stats().peak_busy, POOL);

    // every job ran exactly once
    let runs = runs.lock();
    assert_eq!(runs.len(), POOL * 10);
    assert!(runs.values().all(|&n| n == 1));
}

#[test]
fn crashed_worker_fails_only_its_job_and_is_replaced() {
    let storage = Storage::new();
    let unit = unit(|path: &Path| {
        if file_name(path) == "boom.jpg" {
            panic!("decoder segfault stand-in");
        }
        thread::sleep(Duration::from_millis(10));
        size_of_name(path)
    });

    let pool = CompressionPool::with_unit(storage.config(2), unit, accept_all()).unwrap();
    let boom = pool.submit(storage.path("boom.jpg"));
    let rest = pool.submit_all(["x.jpg", "y.png", "z.webp"].map(|n| storage.path(n)));

    match boom.wait() {
        Err(CompressError::WorkerCrashed { message, .. }) => {
            assert!(message.contains("decoder segfault stand-in"))
        }
        other => panic!("expected WorkerCrashed, got {other:?}"),
    }
    for handle in rest {
        assert!(handle.wait().unwrap().is_compressed());
    }

    assert!(wait_until(|| {
        let stats = pool.stats();
        stats.live_workers() == 2 && stats.compressed == 3
    }));
    let stats = pool.stats();
    assert_eq!(stats.crashed, 1);
    assert_eq!(stats.restarts, 1);
    assert_eq!(stats.compressed, 3);
}

#[test]
fn two_workers_four_uploads() {
    let storage = Storage::new();
    let store = Arc::new(InMemoryMetadata::new());
    for name in ["a.jpg", "b.png", "c.webp", "d.gif"] {
        store.insert(storage.key(name), 1_000_000);
    }

    let (unit, gate) = gated(&["a.jpg", "b.png", "c.webp"], |path: &Path| {
        if file_name(path).ends_with(".gif") {
            CompressionOutcome::skipped("unsupported format")
        } else {
            size_of_name(path)
        }
    });
    let pool = CompressionPool::with_unit(storage.config(2), unit, store.clone()).unwrap();
    let handles = pool.submit_all(["a.jpg", "b.png", "c.webp", "d.gif"].map(|n| storage.path(n)));

    let mut first_two = vec![gate.next_started(), gate.next_started()];
    first_two.sort();
    assert_eq!(first_two, ["a.jpg", "b.png"]);
    assert!(wait_until(|| {
        let stats = pool.stats();
        stats.busy == 2 && stats.queued == 2
    }));

    // a finishing frees its worker for c, the queue head
    gate.release("a.jpg");
    assert_eq!(gate.next_started(), "c.webp");

    gate.release_all();
    let outcomes: Vec<JobOutcome> = handles.into_iter().map(|h| h.wait().unwrap()).collect();

    assert!(outcomes[..3].iter().all(JobOutcome::is_compressed));
    assert!(matches!(&outcomes[3], JobOutcome::Skipped { reason, .. } if reason == "unsupported format"));
    assert_eq!(store.get(&storage.key("a.jpg")), Some(5));
    assert_eq!(store.get(&storage.key("b.png")), Some(5));
    assert_eq!(store.get(&storage.key("c.webp")), Some(6));
    assert_eq!(store.get(&storage.key("d.gif")), Some(1_000_000));
}

#[test]
fn stuck_job_times_out_and_slot_is_recycled() {
    let storage = Storage::new();
    let (unit, gate) = gated(&["stuck.jpg"], size_of_name);
    let config = storage
        .config(1)
        .with_job_timeout(Duration::from_millis(100));
    let pool = CompressionPool::with_unit(config, unit, accept_all()).unwrap();

    let stuck = pool.submit(storage.path("stuck.jpg"));
    let next = pool.submit(storage.path("next.jpg"));

    let err = stuck.wait().unwrap_err();
    assert!(matches!(err, CompressError::JobTimedOut { worker: 0, timeout_ms: 100, .. }));
    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert!(next.wait().unwrap().is_compressed());

    // the abandoned context finishes late; its result is dropped
    gate.release_all();
    thread::sleep(Duration::from_millis(50));
    assert!(wait_until(|| pool.stats().compressed == 1));
    let stats = pool.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.abandoned, 1);
    assert_eq!(stats.restarts, 1);
    assert_eq!(stats.compressed, 1);
    assert_eq!(stats.live_workers(), 1);
}

#[test]
fn full_queue_rejects_admission() {
    let storage = Storage::new();
    let (unit, gate) = gated(&["first.jpg"], size_of_name);
    let config = storage.config(1).with_max_queue_depth(1);
    let pool = CompressionPool::with_unit(config, unit, accept_all()).unwrap();

    let first = pool.submit(storage.path("first.jpg"));
    assert_eq!(gate.next_started(), "first.jpg");
    let queued = pool.submit(storage.path("queued.jpg"));
    let rejected = pool.submit(storage.path("rejected.jpg"));

    assert!(matches!(
        rejected.wait(),
        Err(CompressError::QueueFull { capacity: 1 })
    ));

    gate.release_all();
    assert!(first.wait().is_ok());
    assert!(queued.wait().is_ok());
    assert_eq!(pool.stats().rejected, 1);
}

#[test]
fn metadata_failure_is_reported_after_file_work() {
    let storage = Storage::new();
    let failing = Arc::new(|key: &str, _: u64| -> Result<(), ReconcileError> {
        Err(format!("record {key} locked").into())
    });
    let unit = unit(size_of_name);
    let pool = CompressionPool::with_unit(storage.config(1), unit, failing).unwrap();

    let err = pool.submit(storage.path("a.jpg")).wait().unwrap_err();
    assert!(matches!(err, CompressError::MetadataWriteFailed { .. }));
    assert_eq!(err.category(), ErrorCategory::Metadata);
    assert!(err.is_retryable());

    let outside = pool.submit("/somewhere/else/a.jpg").wait().unwrap_err();
    assert!(matches!(outside, CompressError::OutsideStorageRoot { .. }));
    assert!(wait_until(|| pool.stats().failed == 2));
}

#[test]
fn panicking_store_fails_one_job_and_pool_keeps_running() {
    let storage = Storage::new();
    let bad_key = storage.key("a.jpg");
    let store = Arc::new(move |key: &str, _: u64| -> Result<(), ReconcileError> {
        if key == bad_key {
            panic!("db driver bug");
        }
        Ok(())
    });
    let pool = CompressionPool::with_unit(storage.config(1), unit(size_of_name), store).unwrap();

    let err = pool.submit(storage.path("a.jpg")).wait().unwrap_err();
    assert!(matches!(err, CompressError::MetadataWriteFailed { .. }));
    assert!(err.to_string().contains("db driver bug"));

    assert!(pool.is_accepting());
    let next = pool.submit(storage.path("b.jpg")).wait().unwrap();
    assert_eq!(next.new_size(), Some(5));
    assert!(wait_until(|| {
        let stats = pool.stats();
        stats.failed == 1 && stats.compressed == 1
    }));
}

#[test]
fn unit_failure_reaches_handle() {
    let storage = Storage::new();
    let unit = unit(|_: &Path| {
        CompressionOutcome::failed(CompressError::decode_failed("jpeg: missing EOI marker"))
    });
    let pool = CompressionPool::with_unit(storage.config(1), unit, accept_all()).unwrap();

    let err = pool.submit(storage.path("bad.jpg")).wait().unwrap_err();
    assert!(matches!(err, CompressError::DecodeFailed { .. }));
    assert!(!err.is_retryable());
}

#[test]
fn shutdown_drains_then_rejects() {
    let storage = Storage::new();
    let unit = unit(|path: &Path| {
        thread::sleep(Duration::from_millis(10));
        size_of_name(path)
    });
    let pool = CompressionPool::with_unit(storage.config(1), unit, accept_all()).unwrap();
    let handles = pool.submit_all((0..5).map(|i| storage.path(&format!("{i}.jpg"))));

    pool.shutdown();
    assert!(!pool.is_accepting());
    assert!(handles.iter().all(|h| h.is_finished()));
    for handle in handles {
        assert!(handle.wait().unwrap().is_compressed());
    }

    let late = pool.submit(storage.path("late.jpg"));
    assert!(matches!(late.wait(), Err(CompressError::PoolShutDown)));

    // idempotent
    pool.shutdown();
    pool.shutdown_now();
}

#[test]
fn shutdown_now_rejects_queued_jobs() {
    let storage = Storage::new();
    let (unit, gate) = gated(&["running.jpg"], size_of_name);
    let pool = CompressionPool::with_unit(storage.config(1), unit, accept_all()).unwrap();

    let running = pool.submit(storage.path("running.jpg"));
    assert_eq!(gate.next_started(), "running.jpg");
    let queued = pool.submit_all(["q1.jpg", "q2.jpg"].map(|n| storage.path(n)));

    thread::scope(|s| {
        let stopper = s.spawn(|| pool.shutdown_now());
        assert!(wait_until(|| queued.iter().all(|h| h.is_finished())));
        gate.release_all();
        stopper.join().unwrap();
    });

    assert!(running.wait().unwrap().is_compressed());
    for handle in queued {
        assert!(matches!(handle.wait(), Err(CompressError::PoolShutDown)));
    }
}

#[test]
fn handle_can_be_awaited() {
    let storage = Storage::new();
    let pool =
        CompressionPool::with_unit(storage.config(2), unit(size_of_name), accept_all()).unwrap();

    let handle = pool.submit(storage.path("async.webp"));
    let outcome = block_on(handle).unwrap();
    assert_eq!(outcome.new_size(), Some(10));
    assert_eq!(outcome.path(), storage.path("async.webp"));
}

#[test]
fn dropping_the_pool_drains() {
    let storage = Storage::new();
    let unit = unit(|path: &Path| {
        thread::sleep(Duration::from_millis(5));
        size_of_name(path)
    });
    let handles = {
        let pool = CompressionPool::with_unit(storage.config(2), unit, accept_all()).unwrap();
        pool.submit_all((0..6).map(|i| storage.path(&format!("{i}.png"))))
    };
    for handle in handles {
        assert!(handle.wait().is_ok());
    }
}

#[test]
fn zero_workers_is_a_config_error() {
    let storage = Storage::new();
    let err = CompressionPool::with_unit(storage.config(0), unit(size_of_name), accept_all())
        .err()
        .expect("pool of zero workers must be rejected");
    assert_eq!(err.category(), ErrorCategory::Config);
}
