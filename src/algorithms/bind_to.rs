//! Scoped bound resources.
//!
//! `bind_to(upstream, body)` takes the endpoint the upstream delivers,
//! binds a fresh listener or datagram socket to it, lends the resource to
//! `body`, and appends the asynchronous close after the body's sender
//! completes. A bind failure surfaces the OS error; the partially created
//! socket is already gone by then.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::algorithms::async_value::AsyncDrop;
use crate::error::{Error, OsError};
use crate::event_loop::Scheduler;
use crate::exec::{catch_user, fail, Either, SenderExt};
use crate::exec::{Env, OperationState, Receiver, Sender};
use crate::net::addr::Endpoint;

/// A resource `bind_to` can create bound to an endpoint.
pub trait BoundResource: AsyncDrop + Clone {
    /// Creates the resource bound to `endpoint` on the scheduler's loop.
    ///
    /// # Errors
    ///
    /// Surfaces the OS error; any partially created socket is closed
    /// before returning.
    fn bind_endpoint(scheduler: &Scheduler, endpoint: &Endpoint) -> Result<Self, OsError>;
}

/// Lends a freshly bound resource to `body`, closing it afterwards.
pub fn bind_to<S, T, F, Body>(upstream: S, body: F) -> BindTo<S, F, T>
where
    S: Sender,
    S::Value: Into<Endpoint>,
    T: BoundResource,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
{
    BindTo {
        upstream,
        body,
        _marker: PhantomData,
    }
}

/// Sender returned by [`bind_to`].
pub struct BindTo<S, F, T> {
    upstream: S,
    body: F,
    _marker: PhantomData<fn() -> T>,
}

impl<S, T, F, Body> Sender for BindTo<S, F, T>
where
    S: Sender,
    S::Value: Into<Endpoint>,
    T: BoundResource,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
{
    type Value = Body::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = Body::Value>,
    {
        BindToOp {
            upstream: self.upstream,
            body: self.body,
            receiver,
            _marker: PhantomData,
        }
    }
}

struct BindToOp<S, F, T, R> {
    upstream: S,
    body: F,
    receiver: R,
    _marker: PhantomData<fn() -> T>,
}

impl<S, T, F, Body, R> OperationState for BindToOp<S, F, T, R>
where
    S: Sender,
    S::Value: Into<Endpoint>,
    T: BoundResource,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
    R: Receiver<Value = Body::Value>,
{
    fn start(self) {
        self.upstream
            .connect(BindToReceiver {
                body: self.body,
                receiver: self.receiver,
                _marker: PhantomData,
            })
            .start();
    }
}

struct BindToReceiver<F, R, T, V> {
    body: F,
    receiver: R,
    _marker: PhantomData<fn(V) -> T>,
}

impl<T, F, Body, R, V> Receiver for BindToReceiver<F, R, T, V>
where
    V: Into<Endpoint> + Send + 'static,
    T: BoundResource,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
    R: Receiver<Value = Body::Value>,
{
    type Value = V;

    fn set_value(self, endpoint: V) {
        let endpoint: Endpoint = endpoint.into();
        let env = self.receiver.env();
        let scheduler = env.expect_scheduler();
        match T::bind_endpoint(&scheduler, &endpoint) {
            Err(e) => self.receiver.set_error(Error::Os(e)),
            Ok(resource) => {
                let body = self.body;
                let built = {
                    let resource = resource.clone();
                    catch_user(move || body(&resource))
                };
                let built = match built {
                    Ok(b) => Either::Left(b),
                    Err(e) => Either::Right(fail::<Body::Value>(e)),
                };
                built
                    .finally(T::async_drop(Arc::new(resource)))
                    .connect(self.receiver)
                    .start();
            }
        }
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
