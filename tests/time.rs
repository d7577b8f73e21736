//! Timed schedules: delays, absolute deadlines, racing, cancellation.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use loopexec::{when_any, AsyncScope, EventLoop, SenderExt};

use common::init_test_logging;

#[test]
fn schedule_after_waits_at_least_the_delay() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let delay = Duration::from_millis(50);
    let started = Instant::now();
    let loop_started = lp.sync_wait(sched.schedule().then({
        let sched = sched.clone();
        move |()| sched.now()
    }))
    .unwrap()
    .unwrap();

    lp.sync_wait(sched.schedule_after(delay)).unwrap().unwrap();

    assert!(started.elapsed() + Duration::from_millis(2) >= delay);
    let loop_elapsed = lp
        .sync_wait(sched.schedule().then({
            let sched = sched.clone();
            move |()| sched.now()
        }))
        .unwrap()
        .unwrap()
        - loop_started;
    assert!(loop_elapsed >= delay);
}

#[test]
fn schedule_after_zero_completes() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let out = lp.sync_wait(sched.schedule_after(Duration::ZERO)).unwrap();
    assert_eq!(out, Some(()));
}

#[test]
fn schedule_at_waits_for_the_deadline() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let delay = Duration::from_millis(60);
    let started = Instant::now();
    let deadline = sched.now() + delay;
    lp.sync_wait(sched.schedule_at(deadline)).unwrap().unwrap();
    assert!(started.elapsed() + Duration::from_millis(2) >= delay);
}

#[test]
fn schedule_at_past_deadline_completes() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let out = lp.sync_wait(sched.schedule_at(sched.now())).unwrap();
    assert_eq!(out, Some(()));
}

#[test]
fn timers_fire_in_deadline_order() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let order = Arc::new(order_log::OrderLog::new());
    let scope = AsyncScope::new();
    let wait_all = sched.schedule().let_value({
        let scope = scope.clone();
        let sched = sched.clone();
        let order = order.clone();
        move |()| {
            let late = order.clone();
            scope.spawn(
                sched
                    .schedule_after(Duration::from_millis(30))
                    .then(move |()| late.push(30)),
            );
            let early = order.clone();
            scope.spawn(
                sched
                    .schedule_after(Duration::from_millis(10))
                    .then(move |()| early.push(10)),
            );
            scope.on_empty()
        }
    });
    lp.sync_wait(wait_all).unwrap().unwrap();
    assert_eq!(order.snapshot(), vec![10, 30]);
}

#[test]
fn when_any_of_two_timers() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let first_ran = Arc::new(AtomicBool::new(false));
    let second_ran = Arc::new(AtomicBool::new(false));

    let fast = sched.schedule_after(Duration::from_millis(50)).then({
        let first_ran = first_ran.clone();
        move |()| first_ran.store(true, Ordering::SeqCst)
    });
    let slow = sched.schedule_after(Duration::from_millis(100)).then({
        let second_ran = second_ran.clone();
        move |()| second_ran.store(true, Ordering::SeqCst)
    });

    let started = Instant::now();
    let race = sched.schedule().let_value(move |()| when_any(fast, slow));
    let out = lp.sync_wait(race).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(out, Some(()));
    assert!(first_ran.load(Ordering::SeqCst));
    assert!(!second_ran.load(Ordering::SeqCst));
    assert!(elapsed + Duration::from_millis(2) >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(100));
}

#[test]
fn timer_cancelled_before_progress() {
    init_test_logging();
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let scope = AsyncScope::new();
    let executed = Arc::new(AtomicBool::new(false));
    scope.spawn(sched.schedule_after(Duration::ZERO).then({
        let executed = executed.clone();
        move |()| executed.store(true, Ordering::SeqCst)
    }));

    scope.request_stop();
    let drained = sched.schedule().let_value({
        let scope = scope.clone();
        move |()| scope.on_empty()
    });
    lp.sync_wait(drained).unwrap().unwrap();

    assert!(!executed.load(Ordering::SeqCst));
}

/// Tiny append-only log; the loop thread writes, the test thread reads
/// after the wait returns.
mod order_log {
    use std::sync::Mutex;

    pub struct OrderLog {
        entries: Mutex<Vec<u64>>,
    }

    impl OrderLog {
        pub fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
            }
        }

        pub fn push(&self, v: u64) {
            self.entries.lock().unwrap().push(v);
        }

        pub fn snapshot(&self) -> Vec<u64> {
            self.entries.lock().unwrap().clone()
        }
    }
}
