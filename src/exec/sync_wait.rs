//! Blocking integration: drive the loop until a sender completes.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::event_loop::runner::Runner;
use crate::event_loop::{EventLoop, LoopShared, Scheduler};
use crate::exec::sender::{Completion, Env, Receiver, Sender};
use crate::exec::OperationState;

/// Starts `sender` and cooperatively drives the loop until it completes.
///
/// Many threads may wait at once: at most one runs the loop, the rest park,
/// and ownership is handed off so every waiter makes progress.
///
/// Returns `Ok(Some(value))` on value, `Ok(None)` on stopped, and `Err` on
/// an OS error. A panic captured from a user closure is resumed here.
pub fn sync_wait<S: Sender>(
    scheduler: &Scheduler,
    sender: S,
) -> Result<Option<S::Value>, Error> {
    let shared = scheduler.shared().clone();
    let runner = Arc::new(Runner::new());
    let cell: Arc<Mutex<Option<Completion<S::Value>>>> = Arc::new(Mutex::new(None));

    sender
        .connect(SyncWaitReceiver {
            cell: cell.clone(),
            wakeup: Wakeup {
                runner: runner.clone(),
                shared: shared.clone(),
            },
            env: Env::with_scheduler(scheduler.clone()),
        })
        .start();

    shared.runner_steal(&runner);

    let completion = cell.lock().take();
    match completion {
        Some(Completion::Value(value)) => Ok(Some(value)),
        Some(Completion::Stopped) => Ok(None),
        Some(Completion::Error(Error::Panic(payload))) => {
            panic!("{}", payload.message())
        }
        Some(Completion::Error(error)) => Err(error),
        None => unreachable!("runner finished without a completion"),
    }
}

impl Scheduler {
    /// See [`sync_wait`].
    ///
    /// # Errors
    ///
    /// Propagates the sender's error-channel completion.
    pub fn sync_wait<S: Sender>(&self, sender: S) -> Result<Option<S::Value>, Error> {
        sync_wait(self, sender)
    }
}

impl EventLoop {
    /// See [`sync_wait`].
    ///
    /// # Errors
    ///
    /// Propagates the sender's error-channel completion.
    pub fn sync_wait<S: Sender>(&self, sender: S) -> Result<Option<S::Value>, Error> {
        sync_wait(&self.scheduler(), sender)
    }
}

struct Wakeup {
    runner: Arc<Runner>,
    shared: Arc<LoopShared>,
}

impl Wakeup {
    fn run(self) {
        // If this waiter's runner owns the loop, the completion happened
        // inside its own `run`; tell the loop to return control.
        if self.runner.acquired() {
            self.shared.finish();
        }
        self.runner.finish();
    }
}

struct SyncWaitReceiver<V> {
    cell: Arc<Mutex<Option<Completion<V>>>>,
    wakeup: Wakeup,
    env: Env,
}

impl<V: Send + 'static> Receiver for SyncWaitReceiver<V> {
    type Value = V;

    fn set_value(self, value: V) {
        *self.cell.lock() = Some(Completion::Value(value));
        self.wakeup.run();
    }

    fn set_error(self, error: Error) {
        *self.cell.lock() = Some(Completion::Error(error));
        self.wakeup.run();
    }

    fn set_stopped(self) {
        *self.cell.lock() = Some(Completion::Stopped);
        self.wakeup.run();
    }

    fn env(&self) -> Env {
        self.env.clone()
    }
}
