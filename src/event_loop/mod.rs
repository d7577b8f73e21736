//! The event loop: scheduled-operation drain, timers, readiness dispatch,
//! and the runner hand-off protocol.
//!
//! One loop is single-threaded and cooperative: operation `apply` and every
//! receiver completion run on whichever thread currently drives the loop.
//! Submission is multi-producer: [`LoopShared::schedule`] pushes onto a
//! lock-free queue and pokes the poller's self-wake handle, from any thread.
//!
//! Threads contend for the loop through runners: the first caller of a run
//! mode becomes the runner and drives the OS loop with the run mutex
//! released; later callers park and are woken in turn when the runner
//! returns. [`LoopShared::runner_steal`] is the synchronous-wait variant
//! that keeps re-acquiring the loop until its waiter's completion arrives.

pub(crate) mod clock;
pub(crate) mod op;
pub(crate) mod runner;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use polling::Events;

use crate::algorithms::schedule::{ScheduleSender, SignalSender, TimedSender, TimerKind};
use crate::error::OsError;
use crate::os::io::{AfterReady, IoEntry, IoTable};
use crate::os::poller::{Interest, Poller};
use crate::os::signals::{SignalHub, SIGNAL_PIPE_TOKEN};
use crate::os::timers::TimerTable;
use crate::util::SlabKey;

pub use clock::LoopInstant;

use op::Operation;
use runner::{Runner, RunnersQueue};

/// How a run call consumes the loop, mirroring the default / once /
/// non-blocking OS loop modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Default,
    Once,
    Nowait,
}

struct RunState {
    running: bool,
    runners: RunnersQueue,
}

pub(crate) struct LoopShared {
    pub(crate) poller: Poller,
    scheduled: SegQueue<Box<dyn Operation>>,
    run: Mutex<RunState>,
    stop_latch: AtomicBool,
    loop_thread: AtomicU64,
    pub(crate) handles: AtomicUsize,
    pub(crate) timers: Mutex<TimerTable>,
    pub(crate) io: Mutex<IoTable>,
    pub(crate) signals: SignalHub,
    started: Instant,
    now_cache: AtomicU64,
}

fn current_thread_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TOKEN: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TOKEN.with(|t| *t)
}

impl LoopShared {
    /// Pushes an operation and wakes the loop. Callable from any thread.
    pub(crate) fn schedule(&self, op: Box<dyn Operation>) {
        self.scheduled.push(op);
        self.poller.notify();
    }

    /// Applies inline when already on the loop thread, otherwise schedules.
    pub(crate) fn submit(&self, op: Box<dyn Operation>) {
        if self.on_loop_thread() {
            op.apply();
        } else {
            self.schedule(op);
        }
    }

    /// Asks the current run to return once the iteration completes.
    pub(crate) fn finish(&self) {
        self.stop_latch.store(true, Ordering::Release);
        self.poller.notify();
    }

    /// The loop's cached monotonic time.
    pub(crate) fn now(&self) -> LoopInstant {
        LoopInstant::from_millis(self.now_cache.load(Ordering::Relaxed))
    }

    pub(crate) fn on_loop_thread(&self) -> bool {
        self.loop_thread.load(Ordering::Acquire) == current_thread_token()
    }

    fn refresh_now(&self) {
        let millis = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.now_cache.store(millis, Ordering::Relaxed);
    }

    fn take_stop(&self) -> bool {
        self.stop_latch.swap(false, Ordering::AcqRel)
    }

    fn alive(&self) -> bool {
        !self.scheduled.is_empty()
            || self.timers.lock().len() > 0
            || self.io.lock().len() > 0
            || self.signals.waiting() > 0
    }

    /// Drains a bounded snapshot: operations submitted while draining run
    /// in the next iteration.
    fn drain_scheduled(&self) {
        let pending = self.scheduled.len();
        for _ in 0..pending {
            match self.scheduled.pop() {
                Some(operation) => operation.apply(),
                None => break,
            }
        }
    }

    fn fire_due_timers(self: &Arc<Self>) {
        loop {
            let now = self.now();
            let due = self.timers.lock().pop_due(now);
            match due {
                Some(entry) => entry.fire(),
                None => break,
            }
        }
    }

    fn next_timeout(&self) -> Option<Duration> {
        self.timers
            .lock()
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(self.now()))
    }

    fn dispatch_signals(self: &Arc<Self>) {
        let fired = self.signals.drain();
        let _ = self.poller.rearm(
            self.signals.read_fd(),
            Interest::Readable,
            SIGNAL_PIPE_TOKEN,
        );
        for waiter in fired {
            waiter.fire();
        }
    }

    fn dispatch_io(self: &Arc<Self>, key: usize) {
        let key = SlabKey::from_usize(key);
        let Some(entry) = self.io.lock().remove_key(key) else {
            return;
        };
        if entry.flag.claimed() {
            // Cancellation won the flag between the poll and this dispatch;
            // park the entry back for its pending stop operation.
            self.io.lock().insert(entry);
            return;
        }
        let IoEntry {
            id,
            fd,
            flag,
            guard,
            handler,
        } = entry;
        match handler.ready(self) {
            AfterReady::Rearm(handler, interest) => {
                let key = self.io.lock().insert(IoEntry {
                    id,
                    fd,
                    flag,
                    guard,
                    handler,
                });
                if let Err(e) = self.poller.rearm(fd, interest, key.to_usize()) {
                    tracing::warn!(error = %e, fd, "failed to re-arm descriptor");
                }
            }
            AfterReady::Park(handler) => {
                self.io.lock().insert(IoEntry {
                    id,
                    fd,
                    flag,
                    guard,
                    handler,
                });
            }
            AfterReady::Complete(complete) => {
                // Retire the registration before completing so continuations
                // may immediately re-register the same descriptor.
                self.poller.forget(fd);
                drop(guard);
                complete();
            }
        }
    }

    fn drive(self: &Arc<Self>, mode: RunMode) -> bool {
        self.loop_thread
            .store(current_thread_token(), Ordering::Release);
        tracing::trace!(?mode, "loop acquired");
        let mut events = Events::new();
        let stopped = loop {
            self.refresh_now();
            self.fire_due_timers();
            self.drain_scheduled();
            if self.take_stop() {
                break true;
            }
            if !self.alive() {
                break false;
            }

            let timeout = match mode {
                RunMode::Nowait => Some(Duration::ZERO),
                RunMode::Default | RunMode::Once => self.next_timeout(),
            };
            events.clear();
            match self.poller.wait(&mut events, timeout) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => panic!("event loop poll failed: {e}"),
            }
            for event in events.iter() {
                if event.key == SIGNAL_PIPE_TOKEN {
                    self.dispatch_signals();
                } else {
                    self.dispatch_io(event.key);
                }
            }
            if self.take_stop() {
                break true;
            }
            if mode != RunMode::Default {
                // Once / non-blocking: settle what the poll delivered, then
                // hand the loop back.
                self.refresh_now();
                self.fire_due_timers();
                self.drain_scheduled();
                break self.take_stop();
            }
        };
        self.loop_thread.store(0, Ordering::Release);
        tracing::trace!(?mode, stopped, "loop released");
        stopped
    }

    fn run_mode(self: &Arc<Self>, mode: RunMode) -> bool {
        let runner = Arc::new(Runner::new());
        loop {
            let mut state = self.run.lock();
            if !state.running {
                state.running = true;
                drop(state);
                let stopped = self.drive(mode);
                let mut state = self.run.lock();
                state.running = false;
                state.runners.wake_next();
                return stopped;
            }
            state.runners.add(runner.clone());
            drop(state);
            runner.wait();
            self.run.lock().runners.erase(&runner);
        }
    }

    /// Drives the loop until `runner` is finished, parking whenever another
    /// thread owns the loop. The hand-off keeps every waiter progressing.
    pub(crate) fn runner_steal(self: &Arc<Self>, runner: &Arc<Runner>) {
        while !runner.finished() {
            let mut state = self.run.lock();
            if !state.running {
                if runner.acquire_if_not_finished() {
                    state.running = true;
                    drop(state);
                    self.drive(RunMode::Default);
                    state = self.run.lock();
                    state.running = false;
                }
                state.runners.wake_next();
            } else {
                state.runners.add(runner.clone());
                drop(state);
                runner.wait();
                self.run.lock().runners.erase(runner);
            }
        }
    }
}

/// A single-threaded event loop.
///
/// Owns the OS poller, the timer heap, the signal hub, and the submission
/// queue. Dropping the loop while resources are still open is a bug and
/// panics; close every socket and listener first.
pub struct EventLoop {
    shared: Arc<LoopShared>,
}

impl EventLoop {
    /// Creates a loop.
    ///
    /// # Errors
    ///
    /// Fails when the OS poller or the signal pipe cannot be created.
    pub fn new() -> Result<Self, OsError> {
        let poller = Poller::new().map_err(|e| OsError::from_io(&e))?;
        let signals = SignalHub::new().map_err(|e| OsError::from_io(&e))?;
        poller
            .register(signals.read_fd(), Interest::Readable, SIGNAL_PIPE_TOKEN)
            .map_err(|e| OsError::from_io(&e))?;
        Ok(Self {
            shared: Arc::new(LoopShared {
                poller,
                scheduled: SegQueue::new(),
                run: Mutex::new(RunState {
                    running: false,
                    runners: RunnersQueue::default(),
                }),
                stop_latch: AtomicBool::new(false),
                loop_thread: AtomicU64::new(0),
                handles: AtomicUsize::new(0),
                timers: Mutex::new(TimerTable::default()),
                io: Mutex::new(IoTable::default()),
                signals,
                started: Instant::now(),
                now_cache: AtomicU64::new(0),
            }),
        })
    }

    /// A handle for submitting work to this loop.
    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        Scheduler {
            shared: self.shared.clone(),
        }
    }

    /// Runs until the loop has no live work or [`finish`](Self::finish) is
    /// called. Returns `true` iff stopped by `finish`.
    pub fn run(&self) -> bool {
        self.shared.run_mode(RunMode::Default)
    }

    /// Runs a single blocking iteration.
    pub fn run_once(&self) -> bool {
        self.shared.run_mode(RunMode::Once)
    }

    /// Runs a single non-blocking iteration.
    pub fn drain(&self) -> bool {
        self.shared.run_mode(RunMode::Nowait)
    }

    /// Asks the current run to return after the ongoing iteration.
    ///
    /// Loop-thread callers get the immediate effect; other threads should
    /// schedule work that calls it, or rely on `sync_wait`'s wakeup.
    pub fn finish(&self) {
        self.shared.finish();
    }

    pub(crate) fn shared(&self) -> &Arc<LoopShared> {
        &self.shared
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        // Flush pending close operations, then require a clean shutdown.
        self.drain();
        let live = self.shared.handles.load(Ordering::Acquire);
        assert!(
            live == 0,
            "event loop dropped with {live} live resource handle(s)"
        );
    }
}

/// Cheap, cloneable handle binding sender chains to one [`EventLoop`].
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<LoopShared>,
}

impl Scheduler {
    /// Sender completing on the loop thread as soon as it is drained.
    #[must_use]
    pub fn schedule(&self) -> ScheduleSender {
        ScheduleSender::new(self.shared.clone())
    }

    /// Sender completing no earlier than `delay` from its start.
    #[must_use]
    pub fn schedule_after(&self, delay: Duration) -> TimedSender {
        TimedSender::new(self.shared.clone(), TimerKind::After(delay))
    }

    /// Sender completing once the loop clock reaches `deadline`.
    #[must_use]
    pub fn schedule_at(&self, deadline: LoopInstant) -> TimedSender {
        TimedSender::new(self.shared.clone(), TimerKind::At(deadline))
    }

    /// Sender completing on the first arrival of `signum`.
    #[must_use]
    pub fn schedule_upon_signal(&self, signum: i32) -> SignalSender {
        SignalSender::new(self.shared.clone(), signum)
    }

    /// The loop's monotonic clock, millisecond resolution.
    #[must_use]
    pub fn now(&self) -> LoopInstant {
        self.shared.now()
    }

    pub(crate) fn shared(&self) -> &Arc<LoopShared> {
        &self.shared
    }
}

impl PartialEq for Scheduler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Scheduler {}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}
