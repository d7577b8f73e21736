//! Signal-once scheduling.
//!
//! Signal dispositions are process-global, so these tests serialize on a
//! lock and use distinct signal numbers.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use loopexec::{AsyncScope, EventLoop, SenderExt};

use common::init_test_logging;

static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

fn raise(signum: i32) {
    // SAFETY: raising a signal we installed a handler for in this test.
    unsafe {
        libc::raise(signum);
    }
}

#[test]
fn raise_completes_the_waiter() {
    init_test_logging();
    let _serial = SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let signum = libc::SIGUSR1;

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let scope = AsyncScope::new();
    let executed = Arc::new(AtomicBool::new(false));

    let main_thread = std::thread::current().id();
    scope.spawn(
        sched
            .schedule_upon_signal(signum)
            .then({
                let executed = executed.clone();
                move |()| {
                    assert_eq!(std::thread::current().id(), main_thread);
                    executed.store(true, Ordering::SeqCst);
                }
            })
            .upon_error(|_| ()),
    );

    let driven = sched.schedule().let_value({
        let scope = scope.clone();
        move |()| {
            raise(signum);
            scope.on_empty()
        }
    });
    lp.sync_wait(driven).unwrap().unwrap();

    assert!(executed.load(Ordering::SeqCst));
}

#[test]
fn signal_cancelled_before_progress() {
    init_test_logging();
    let _serial = SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let signum = libc::SIGUSR2;

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();
    let scope = AsyncScope::new();
    let executed = Arc::new(AtomicBool::new(false));

    scope.spawn(
        sched
            .schedule_upon_signal(signum)
            .then({
                let executed = executed.clone();
                move |()| executed.store(true, Ordering::SeqCst)
            })
            .upon_error(|_| ()),
    );

    scope.request_stop();
    let drained = sched.schedule().let_value({
        let scope = scope.clone();
        move |()| scope.on_empty()
    });
    lp.sync_wait(drained).unwrap().unwrap();

    assert!(!executed.load(Ordering::SeqCst));
}

#[test]
fn invalid_signal_number_is_an_error() {
    init_test_logging();
    let _serial = SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let err = lp
        .sync_wait(sched.schedule_upon_signal(-1))
        .unwrap_err();
    assert!(err.as_os().is_some());
}
