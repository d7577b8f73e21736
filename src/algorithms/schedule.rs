//! Loop-borne senders: plain schedule, timed schedule, signal-once.
//!
//! All three start by queueing themselves onto the loop, so their arming
//! and their completions happen on the loop thread. The timed and signal
//! variants follow the claim-then-schedule cancellation protocol: the stop
//! callback claims the once-flag on the requesting thread and queues a stop
//! operation that performs the loop-side teardown and delivers
//! `set_stopped`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::event_loop::clock::LoopInstant;
use crate::event_loop::op::{OnceFlag, Operation};
use crate::event_loop::LoopShared;
use crate::exec::{OperationState, Receiver, Sender};
use crate::os::io::next_io_id;
use crate::os::signals::{SignalComplete, SignalWaiter};
use crate::os::timers::TimerComplete;

/// Sender of [`Scheduler::schedule`](crate::Scheduler::schedule).
pub struct ScheduleSender {
    shared: Arc<LoopShared>,
}

impl ScheduleSender {
    pub(crate) fn new(shared: Arc<LoopShared>) -> Self {
        Self { shared }
    }
}

struct ScheduleOp<R> {
    shared: Arc<LoopShared>,
    receiver: R,
}

impl<R: Receiver<Value = ()>> OperationState for ScheduleOp<R> {
    fn start(self) {
        let shared = self.shared.clone();
        shared.schedule(Box::new(self));
    }
}

impl<R: Receiver<Value = ()>> Operation for ScheduleOp<R> {
    fn apply(self: Box<Self>) {
        // A stop requested before the drain still wins.
        if self.receiver.env().stop_token().stop_requested() {
            self.receiver.set_stopped();
        } else {
            self.receiver.set_value(());
        }
    }
}

impl Sender for ScheduleSender {
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        ScheduleOp {
            shared: self.shared,
            receiver,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TimerKind {
    After(Duration),
    At(LoopInstant),
}

/// Sender of `schedule_after` / `schedule_at`.
pub struct TimedSender {
    shared: Arc<LoopShared>,
    kind: TimerKind,
}

impl TimedSender {
    pub(crate) fn new(shared: Arc<LoopShared>, kind: TimerKind) -> Self {
        Self { shared, kind }
    }
}

struct TimedOp<R> {
    shared: Arc<LoopShared>,
    kind: TimerKind,
    receiver: R,
}

impl<R: Receiver<Value = ()>> OperationState for TimedOp<R> {
    fn start(self) {
        let shared = self.shared.clone();
        shared.schedule(Box::new(self));
    }
}

impl<R: Receiver<Value = ()>> Operation for TimedOp<R> {
    fn apply(self: Box<Self>) {
        let Self {
            shared,
            kind,
            receiver,
        } = *self;
        // Deadline math happens here, on the loop thread, so `at` stays
        // monotonic with the scheduler's clock.
        let now = shared.now();
        let deadline = match kind {
            TimerKind::After(delay) => now + delay,
            TimerKind::At(at) => at.max(now),
        };
        let flag = Arc::new(OnceFlag::new());
        let env = receiver.env();
        let token = env.stop_token().clone();
        let id = shared
            .timers
            .lock()
            .insert(deadline, flag.clone(), Box::new(TimedComplete { receiver }));
        let guard = token.on_stop({
            let shared = shared.clone();
            move || {
                if flag.claim() {
                    let op = Box::new(TimerStopOp {
                        shared: shared.clone(),
                        id,
                    });
                    shared.schedule(op);
                }
            }
        });
        shared.timers.lock().attach_guard(id, guard);
    }
}

impl Sender for TimedSender {
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        TimedOp {
            shared: self.shared,
            kind: self.kind,
            receiver,
        }
    }
}

struct TimedComplete<R> {
    receiver: R,
}

impl<R: Receiver<Value = ()>> TimerComplete for TimedComplete<R> {
    fn fire(self: Box<Self>) {
        self.receiver.set_value(());
    }

    fn stopped(self: Box<Self>) {
        self.receiver.set_stopped();
    }
}

struct TimerStopOp {
    shared: Arc<LoopShared>,
    id: u64,
}

impl Operation for TimerStopOp {
    fn apply(self: Box<Self>) {
        let entry = self.shared.timers.lock().cancel(self.id);
        if let Some(entry) = entry {
            entry.stopped();
        }
    }
}

/// Sender of `schedule_upon_signal`: completes on the first arrival of the
/// signal, never repeats.
pub struct SignalSender {
    shared: Arc<LoopShared>,
    signum: i32,
}

impl SignalSender {
    pub(crate) fn new(shared: Arc<LoopShared>, signum: i32) -> Self {
        Self { shared, signum }
    }
}

struct SignalOp<R> {
    shared: Arc<LoopShared>,
    signum: i32,
    receiver: R,
}

impl<R: Receiver<Value = ()>> OperationState for SignalOp<R> {
    fn start(self) {
        let shared = self.shared.clone();
        shared.schedule(Box::new(self));
    }
}

impl<R: Receiver<Value = ()>> Operation for SignalOp<R> {
    fn apply(self: Box<Self>) {
        let Self {
            shared,
            signum,
            receiver,
        } = *self;
        if let Err(e) = shared.signals.ensure_installed(signum) {
            receiver.set_error(Error::Os(e));
            return;
        }
        let flag = Arc::new(OnceFlag::new());
        let env = receiver.env();
        let token = env.stop_token().clone();
        let id = next_io_id();
        shared.signals.add_waiter(
            signum,
            SignalWaiter {
                id,
                flag: flag.clone(),
                guard: None,
                complete: Box::new(SignalDone { receiver }),
            },
        );
        let guard = token.on_stop({
            let shared = shared.clone();
            move || {
                if flag.claim() {
                    let op = Box::new(SignalStopOp {
                        shared: shared.clone(),
                        signum,
                        id,
                    });
                    shared.schedule(op);
                }
            }
        });
        shared.signals.attach_guard(signum, id, guard);
    }
}

impl Sender for SignalSender {
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        SignalOp {
            shared: self.shared,
            signum: self.signum,
            receiver,
        }
    }
}

struct SignalDone<R> {
    receiver: R,
}

impl<R: Receiver<Value = ()>> SignalComplete for SignalDone<R> {
    fn fire(self: Box<Self>) {
        self.receiver.set_value(());
    }

    fn stopped(self: Box<Self>) {
        self.receiver.set_stopped();
    }
}

struct SignalStopOp {
    shared: Arc<LoopShared>,
    signum: i32,
    id: u64,
}

impl Operation for SignalStopOp {
    fn apply(self: Box<Self>) {
        let waiter = self.shared.signals.remove(self.signum, self.id);
        if let Some(waiter) = waiter {
            waiter.stopped();
        }
    }
}
