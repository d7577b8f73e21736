//! Loop and scheduler behavior: trivial schedules, reuse, concurrent
//! submission, cancellation before progress, and parallel waiters.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use loopexec::{AsyncScope, EventLoop, SenderExt};

use common::init_test_logging;

#[test]
fn trivial_schedule() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let executed = Arc::new(AtomicBool::new(false));

    let boring = sched.schedule().then({
        let executed = executed.clone();
        move |()| {
            executed.store(true, Ordering::SeqCst);
            thread::current().id()
        }
    });
    assert!(!executed.load(Ordering::SeqCst));

    let inner_thread = lp.sync_wait(boring).unwrap().unwrap();
    assert_eq!(inner_thread, thread::current().id());
    assert!(executed.load(Ordering::SeqCst));
}

#[test]
fn reuse_loop() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let executed = Arc::new(AtomicUsize::new(0));

    let n = 101;
    for _ in 0..n {
        let job = sched.schedule().then({
            let executed = executed.clone();
            move |()| {
                executed.fetch_add(1, Ordering::SeqCst);
            }
        });
        lp.sync_wait(job).unwrap().unwrap();
    }
    assert_eq!(executed.load(Ordering::SeqCst), n);
}

#[test]
fn concurrent_schedule() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let executed_a = Arc::new(AtomicUsize::new(0));
    let executed_b = Arc::new(AtomicUsize::new(0));

    let scope = AsyncScope::new();
    let job_a = sched.schedule().then({
        let executed_a = executed_a.clone();
        move |()| {
            executed_a.fetch_add(1, Ordering::SeqCst);
        }
    });
    let job_b = sched.schedule().then({
        let executed_b = executed_b.clone();
        move |()| {
            executed_b.fetch_add(1, Ordering::SeqCst);
        }
    });

    let wait_all = sched.schedule().let_value({
        let scope = scope.clone();
        move |()| {
            scope.spawn(job_a);
            scope.spawn(job_b);
            scope.on_empty()
        }
    });
    lp.sync_wait(wait_all).unwrap().unwrap();

    assert_eq!(executed_a.load(Ordering::SeqCst), 1);
    assert_eq!(executed_b.load(Ordering::SeqCst), 1);
}

#[test]
fn high_concurrent_schedule() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    for n in [6usize, 17, 25, 32] {
        let executed: Arc<Vec<AtomicUsize>> =
            Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect());
        let scope = AsyncScope::new();
        let wait_all = sched.schedule().let_value({
            let scope = scope.clone();
            let sched = sched.clone();
            let executed = executed.clone();
            move |()| {
                for i in 0..n {
                    let executed = executed.clone();
                    scope.spawn(sched.schedule().then(move |()| {
                        executed[i].fetch_add(1, Ordering::SeqCst);
                    }));
                }
                scope.on_empty()
            }
        });
        lp.sync_wait(wait_all).unwrap().unwrap();
        assert!(executed.iter().all(|v| v.load(Ordering::SeqCst) == 1));
    }
}

#[test]
fn cancelled_before_progress() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let scope = AsyncScope::new();
    let executed = Arc::new(AtomicBool::new(false));
    scope.spawn(sched.schedule().then({
        let executed = executed.clone();
        move |()| {
            executed.store(true, Ordering::SeqCst);
        }
    }));

    scope.request_stop();
    let drained = sched.schedule().let_value({
        let scope = scope.clone();
        move |()| scope.on_empty()
    });
    lp.sync_wait(drained).unwrap().unwrap();

    assert!(!executed.load(Ordering::SeqCst));
}

#[test]
fn parallel_schedule() {
    init_test_logging();
    const ITERATIONS: usize = 1000;

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    let scope = AsyncScope::new();

    let barrier = Arc::new(Barrier::new(2));
    let routine = {
        let sched = sched.clone();
        let scope = scope.clone();
        let counter = counter.clone();
        let barrier = barrier.clone();
        move || {
            barrier.wait();
            for _ in 0..ITERATIONS {
                let counter = counter.clone();
                scope.spawn(sched.schedule().then(move |()| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
    };
    let t = thread::spawn(routine.clone());
    routine();
    t.join().unwrap();

    let drained = sched.schedule().let_value({
        let scope = scope.clone();
        move |()| scope.on_empty()
    });
    lp.sync_wait(drained).unwrap().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2 * ITERATIONS);
}

#[test]
fn high_parallel_schedule() {
    init_test_logging();
    const THREADS: usize = 8;
    const ITERATIONS: usize = 1000;

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    let scope = AsyncScope::new();

    let barrier = Arc::new(Barrier::new(THREADS));
    let routine = {
        let sched = sched.clone();
        let scope = scope.clone();
        let counter = counter.clone();
        let barrier = barrier.clone();
        move || {
            barrier.wait();
            for _ in 0..ITERATIONS {
                let counter = counter.clone();
                scope.spawn(sched.schedule().then(move |()| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
    };
    let mut threads = Vec::with_capacity(THREADS - 1);
    for _ in 0..THREADS - 1 {
        threads.push(thread::spawn(routine.clone()));
    }
    routine();
    for t in threads {
        t.join().unwrap();
    }

    let drained = sched.schedule().let_value({
        let scope = scope.clone();
        move |()| scope.on_empty()
    });
    lp.sync_wait(drained).unwrap().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), THREADS * ITERATIONS);
}

#[test]
fn parallel_sync_wait() {
    init_test_logging();
    const ITERATIONS: usize = 500;

    let lp = Arc::new(EventLoop::new().unwrap());
    let counter = Arc::new(AtomicUsize::new(0));

    let barrier = Arc::new(Barrier::new(2));
    let routine = {
        let lp = lp.clone();
        let counter = counter.clone();
        let barrier = barrier.clone();
        move || {
            let sched = lp.scheduler();
            barrier.wait();
            for _ in 0..ITERATIONS {
                let counter = counter.clone();
                lp.sync_wait(sched.schedule().then(move |()| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap()
                .unwrap();
            }
        }
    };
    let t = thread::spawn(routine.clone());
    routine();
    t.join().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2 * ITERATIONS);
}

#[test]
fn run_once_processes_a_queued_operation() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let scope = AsyncScope::new();
    let executed = Arc::new(AtomicBool::new(false));

    scope.spawn(sched.schedule().then({
        let executed = executed.clone();
        move |()| executed.store(true, Ordering::SeqCst)
    }));
    assert!(!executed.load(Ordering::SeqCst));

    lp.run_once();
    assert!(executed.load(Ordering::SeqCst));
}

#[test]
fn finish_stops_a_drain() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    lp.finish();
    assert!(lp.drain());
    assert!(!lp.drain());
}
