//! Detached-work scopes.
//!
//! An [`AsyncScope`] owns a set of spawned sender chains and a stop source
//! shared by all of them. [`AsyncScope::on_empty`] is a sender that
//! completes once every spawned chain has completed; callers typically
//! drive the loop until the scope drains. The scope cooperates with
//! [`async_value`](crate::algorithms::async_value): used as a scoped value
//! it forwards stop requests and its asynchronous destructor is `on_empty`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::algorithms::{AsyncDrop, AsyncValue};
use crate::error::Error;
use crate::exec::sender::{Env, OperationState, Receiver, Sender};
use crate::stop::{StopSource, StopToken};

#[derive(Default)]
struct ScopeInner {
    active: AtomicUsize,
    stop: StopSource,
    waiters: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ScopeInner {
    fn task_done(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            let waiters = std::mem::take(&mut *self.waiters.lock());
            for waiter in waiters {
                waiter();
            }
        }
    }
}

/// A scope for detached sender chains.
#[derive(Clone, Default)]
pub struct AsyncScope {
    inner: Arc<ScopeInner>,
}

impl AsyncScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `sender` detached. Its stop token is the scope's; an error
    /// completion is logged, not propagated.
    pub fn spawn<S>(&self, sender: S)
    where
        S: Sender<Value = ()>,
    {
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        sender
            .connect(SpawnReceiver {
                inner: self.inner.clone(),
            })
            .start();
    }

    /// Sender completing once the scope has no live work.
    #[must_use]
    pub fn on_empty(&self) -> OnEmpty {
        OnEmpty {
            inner: self.inner.clone(),
        }
    }

    /// Requests a stop of every chain spawned on this scope.
    pub fn request_stop(&self) {
        self.inner.stop.request_stop();
    }

    /// The scope's stop token.
    #[must_use]
    pub fn token(&self) -> StopToken {
        self.inner.stop.token()
    }
}

struct SpawnReceiver {
    inner: Arc<ScopeInner>,
}

impl Receiver for SpawnReceiver {
    type Value = ();

    fn set_value(self, (): ()) {
        self.inner.task_done();
    }

    fn set_error(self, error: Error) {
        tracing::error!(%error, "detached task completed with an error");
        self.inner.task_done();
    }

    fn set_stopped(self) {
        self.inner.task_done();
    }

    fn env(&self) -> Env {
        Env::from_parts(self.inner.stop.token(), None)
    }
}

/// Sender returned by [`AsyncScope::on_empty`].
pub struct OnEmpty {
    inner: Arc<ScopeInner>,
}

struct OnEmptyOp<R> {
    inner: Arc<ScopeInner>,
    receiver: R,
}

impl<R: Receiver<Value = ()>> OperationState for OnEmptyOp<R> {
    fn start(self) {
        let mut waiters = self.inner.waiters.lock();
        if self.inner.active.load(Ordering::Acquire) == 0 {
            drop(waiters);
            self.receiver.set_value(());
        } else {
            let receiver = self.receiver;
            waiters.push(Box::new(move || receiver.set_value(())));
        }
    }
}

impl Sender for OnEmpty {
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        OnEmptyOp {
            inner: self.inner,
            receiver,
        }
    }
}

impl AsyncValue for AsyncScope {
    fn request_stop(&self) {
        AsyncScope::request_stop(self);
    }
}

impl AsyncDrop for AsyncScope {
    type Dropper = OnEmpty;

    fn async_drop(this: Arc<Self>) -> OnEmpty {
        this.on_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn on_empty_completes_immediately_when_idle() {
        let scope = AsyncScope::new();
        let fired = Arc::new(AtomicBool::new(false));
        scope.inner.waiters.lock().clear();
        let inner = scope.inner.clone();
        let fired2 = fired.clone();
        OnEmptyOp {
            inner,
            receiver: TestReceiver { fired: fired2 },
        }
        .start();
        assert!(fired.load(Ordering::SeqCst));
    }

    struct TestReceiver {
        fired: Arc<AtomicBool>,
    }

    impl Receiver for TestReceiver {
        type Value = ();

        fn set_value(self, (): ()) {
            self.fired.store(true, Ordering::SeqCst);
        }

        fn set_error(self, _error: Error) {}

        fn set_stopped(self) {}

        fn env(&self) -> Env {
            Env::default()
        }
    }
}
