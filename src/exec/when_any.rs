//! First-wins racing of two senders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::exec::sender::{Completion, Env, OperationState, Receiver, Sender};
use crate::stop::{StopGuard, StopSource};

/// Races `a` against `b`. The first completion wins and a stop is requested
/// of the other; the combined operation completes with the winner's
/// disposition once both children have completed.
pub fn when_any<A, B>(a: A, b: B) -> WhenAny<A, B>
where
    A: Sender,
    B: Sender<Value = A::Value>,
{
    WhenAny { a, b }
}

/// Sender returned by [`when_any`].
pub struct WhenAny<A, B> {
    a: A,
    b: B,
}

type Deliver<V> = Box<dyn FnOnce(Completion<V>) + Send>;

struct Shared<V> {
    winner: Mutex<Option<Completion<V>>>,
    remaining: AtomicUsize,
    source: StopSource,
    parent_guard: Mutex<Option<StopGuard>>,
    deliver: Mutex<Option<Deliver<V>>>,
}

impl<V: Send + 'static> Shared<V> {
    fn complete(self: &Arc<Self>, completion: Completion<V>) {
        let won = {
            let mut winner = self.winner.lock();
            if winner.is_none() {
                *winner = Some(completion);
                true
            } else {
                false
            }
        };
        if won {
            self.source.request_stop();
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            drop(self.parent_guard.lock().take());
            let deliver = self
                .deliver
                .lock()
                .take()
                .expect("when_any delivered twice");
            let winner = self
                .winner
                .lock()
                .take()
                .expect("when_any finished without a winner");
            deliver(winner);
        }
    }
}

struct ChildReceiver<V> {
    shared: Arc<Shared<V>>,
    env: Env,
}

impl<V: Send + 'static> Receiver for ChildReceiver<V> {
    type Value = V;

    fn set_value(self, value: V) {
        self.shared.complete(Completion::Value(value));
    }

    fn set_error(self, error: Error) {
        self.shared.complete(Completion::Error(error));
    }

    fn set_stopped(self) {
        self.shared.complete(Completion::Stopped);
    }

    fn env(&self) -> Env {
        self.env.clone()
    }
}

struct WhenAnyOp<A, B, R> {
    a: A,
    b: B,
    receiver: R,
}

impl<A, B, R> OperationState for WhenAnyOp<A, B, R>
where
    A: Sender,
    B: Sender<Value = A::Value>,
    R: Receiver<Value = A::Value>,
{
    fn start(self) {
        let parent_env = self.receiver.env();
        let shared = Arc::new(Shared {
            winner: Mutex::new(None),
            remaining: AtomicUsize::new(2),
            source: StopSource::new(),
            parent_guard: Mutex::new(None),
            deliver: Mutex::new(None),
        });

        let receiver = self.receiver;
        *shared.deliver.lock() = Some(Box::new(move |c: Completion<A::Value>| {
            c.send_to(receiver);
        }));

        // A stop request on the outer chain cancels both children.
        let guard = parent_env.stop_token().on_stop({
            let source = shared.source.clone();
            move || {
                source.request_stop();
            }
        });
        *shared.parent_guard.lock() = Some(guard);

        let child_env = Env::from_parts(
            shared.source.token(),
            parent_env.scheduler().cloned(),
        );
        self.a
            .connect(ChildReceiver {
                shared: shared.clone(),
                env: child_env.clone(),
            })
            .start();
        self.b
            .connect(ChildReceiver {
                shared,
                env: child_env,
            })
            .start();
    }
}

impl<A, B> Sender for WhenAny<A, B>
where
    A: Sender,
    B: Sender<Value = A::Value>,
{
    type Value = A::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = A::Value>,
    {
        WhenAnyOp {
            a: self.a,
            b: self.b,
            receiver,
        }
    }
}
