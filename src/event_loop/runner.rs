//! Runner hand-off between threads contending for the loop.
//!
//! A [`Runner`] is a per-waiter parking object. Whichever thread finds the
//! loop unowned acquires it and runs; the rest park on their runners in the
//! [`RunnersQueue`]. When a run returns, the next parked runner is woken so
//! ownership is handed off, never lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Parking token for one waiting thread.
///
/// The `awakenings` counter plays the same role as a futex word: zero means
/// finished, any change while parked means "recheck the loop".
pub(crate) struct Runner {
    awakenings: Mutex<u64>,
    condvar: Condvar,
    acquired: AtomicBool,
}

impl Runner {
    pub(crate) fn new() -> Self {
        Self {
            awakenings: Mutex::new(1),
            condvar: Condvar::new(),
            acquired: AtomicBool::new(false),
        }
    }

    /// Whether the waited-for completion has been delivered.
    pub(crate) fn finished(&self) -> bool {
        *self.awakenings.lock() == 0
    }

    /// Marks this runner as the loop owner unless it already finished.
    pub(crate) fn acquire_if_not_finished(&self) -> bool {
        if *self.awakenings.lock() != 0 {
            self.acquired.store(true, Ordering::Release);
        }
        self.acquired()
    }

    /// Whether this runner ever acquired the loop.
    pub(crate) fn acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }

    /// Unparks the runner so it rechecks the loop state.
    pub(crate) fn wakeup(&self) {
        let mut count = self.awakenings.lock();
        *count = count.wrapping_add(1).max(1);
        drop(count);
        self.condvar.notify_one();
    }

    /// Marks the runner finished and unparks it.
    pub(crate) fn finish(&self) {
        *self.awakenings.lock() = 0;
        self.condvar.notify_one();
    }

    /// Parks until woken or finished.
    pub(crate) fn wait(&self) {
        let mut count = self.awakenings.lock();
        let seen = *count;
        while *count != 0 && *count == seen {
            self.condvar.wait(&mut count);
        }
    }
}

/// FIFO of parked runners.
#[derive(Default)]
pub(crate) struct RunnersQueue {
    runners: VecDeque<Arc<Runner>>,
}

impl RunnersQueue {
    pub(crate) fn add(&mut self, runner: Arc<Runner>) {
        self.runners.push_back(runner);
    }

    pub(crate) fn erase(&mut self, runner: &Arc<Runner>) {
        self.runners.retain(|r| !Arc::ptr_eq(r, runner));
    }

    /// Wakes the first parked runner that has not already finished.
    pub(crate) fn wake_next(&mut self) {
        while let Some(next) = self.runners.pop_front() {
            if !next.finished() {
                next.wakeup();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn finish_unparks_a_waiter() {
        let runner = Arc::new(Runner::new());
        let waiter = {
            let runner = runner.clone();
            thread::spawn(move || runner.wait())
        };
        thread::sleep(Duration::from_millis(20));
        runner.finish();
        waiter.join().unwrap();
        assert!(runner.finished());
    }

    #[test]
    fn wake_next_skips_finished_runners() {
        let mut queue = RunnersQueue::default();
        let done = Arc::new(Runner::new());
        done.finish();
        let live = Arc::new(Runner::new());
        queue.add(done);
        queue.add(live.clone());
        queue.wake_next();
        // The live runner got the wakeup: its counter moved past 1.
        assert!(!live.finished());
        assert_eq!(*live.awakenings.lock(), 2);
    }

    #[test]
    fn acquire_fails_after_finish() {
        let runner = Runner::new();
        runner.finish();
        assert!(!runner.acquire_if_not_finished());
        assert!(!runner.acquired());
    }
}
