//! Scoped asynchronous values.
//!
//! `async_value(upstream, body)` constructs the upstream's value inside the
//! op-state, lends it to `body`, and runs the value's asynchronous
//! destructor (its [`AsyncDrop`] sender) after the body completes — on
//! every exit path — before re-emitting the body's disposition. If the
//! value cooperates with cancellation ([`AsyncValue::request_stop`]), the
//! adaptor forwards stop requests from its own environment into the value.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Error;
use crate::exec::{catch_user, fail, Either, SenderExt};
use crate::exec::{Env, OperationState, Receiver, Sender};

/// A value usable inside [`async_value`]: optionally cooperates with stop
/// requests.
pub trait AsyncValue: Send + Sync + 'static {
    /// Forwarded from the adaptor's stop token. Default: ignore.
    fn request_stop(&self) {}
}

/// A value with an asynchronous destructor.
pub trait AsyncDrop: Send + Sync + Sized + 'static {
    /// The destructor sender.
    type Dropper: Sender<Value = ()>;

    /// Builds the sender that releases the value.
    fn async_drop(this: Arc<Self>) -> Self::Dropper;
}

/// Lends the upstream's value to `body` with an asynchronous destructor
/// appended. See the module docs.
pub fn async_value<S, F, Body>(upstream: S, body: F) -> Scoped<S, F>
where
    S: Sender,
    S::Value: AsyncValue + AsyncDrop,
    F: FnOnce(&S::Value) -> Body + Send + 'static,
    Body: Sender,
{
    Scoped { upstream, body }
}

/// Sender returned by [`async_value`].
pub struct Scoped<S, F> {
    upstream: S,
    body: F,
}

impl<S, F, Body> Sender for Scoped<S, F>
where
    S: Sender,
    S::Value: AsyncValue + AsyncDrop,
    F: FnOnce(&S::Value) -> Body + Send + 'static,
    Body: Sender,
{
    type Value = Body::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = Body::Value>,
    {
        ScopedOp {
            upstream: self.upstream,
            body: self.body,
            receiver,
        }
    }
}

struct ScopedOp<S, F, R> {
    upstream: S,
    body: F,
    receiver: R,
}

impl<S, F, Body, R> OperationState for ScopedOp<S, F, R>
where
    S: Sender,
    S::Value: AsyncValue + AsyncDrop,
    F: FnOnce(&S::Value) -> Body + Send + 'static,
    Body: Sender,
    R: Receiver<Value = Body::Value>,
{
    fn start(self) {
        self.upstream
            .connect(ScopedReceiver {
                body: self.body,
                receiver: self.receiver,
                _marker: PhantomData,
            })
            .start();
    }
}

struct ScopedReceiver<F, R, T> {
    body: F,
    receiver: R,
    _marker: PhantomData<fn(T)>,
}

impl<T, F, Body, R> Receiver for ScopedReceiver<F, R, T>
where
    T: AsyncValue + AsyncDrop,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
    R: Receiver<Value = Body::Value>,
{
    type Value = T;

    fn set_value(self, value: T) {
        let value = Arc::new(value);
        let env = self.receiver.env();
        let guard = env.stop_token().on_stop({
            let value = value.clone();
            move || value.request_stop()
        });

        let body_fn = self.body;
        let body = {
            let value = value.clone();
            match catch_user(move || body_fn(&value)) {
                Ok(b) => Either::Left(b),
                Err(e) => Either::Right(fail::<Body::Value>(e)),
            }
        };

        // The destructor runs after the body on every exit path; dropping
        // the guard afterwards detaches the cancellation forward.
        let mut guard = Some(guard);
        let cleanup = T::async_drop(value).then(move |()| {
            drop(guard.take());
        });
        body.finally(cleanup).connect(self.receiver).start();
    }

    fn set_error(self, error: Error) {
        self.receiver.set_error(error);
    }

    fn set_stopped(self) {
        self.receiver.set_stopped();
    }

    fn env(&self) -> Env {
        self.receiver.env()
    }
}
