//! Scoped connected sockets.
//!
//! `connect_to(upstream, body)` creates a socket on the chain's loop,
//! connects it to the endpoint the upstream delivers, lends it to `body`,
//! and closes it afterwards. When the connect phase itself errors or is
//! stopped, the socket is closed *first* and the saved disposition is
//! re-delivered — the handle is retired exactly once on every exit path.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::algorithms::async_value::AsyncDrop;
use crate::error::{Error, OsError};
use crate::event_loop::Scheduler;
use crate::exec::{catch_user, fail, Completion, Either, SenderExt};
use crate::exec::{Env, OperationState, Receiver, Sender};
use crate::net::addr::Endpoint;
use crate::stop::StopToken;

/// A resource `connect_to` can create implicitly and connect.
pub trait ConnectResource: AsyncDrop + Clone {
    /// The connect sender for this resource.
    type Connect: Sender<Value = ()>;

    /// Creates the unconnected resource on the scheduler's loop.
    ///
    /// # Errors
    ///
    /// Surfaces the OS error when the socket cannot be created.
    fn create(scheduler: &Scheduler) -> Result<Self, OsError>;

    /// Starts connecting to `endpoint`.
    fn connect_endpoint(&self, endpoint: Endpoint) -> Self::Connect;
}

/// Lends a freshly connected resource to `body`, closing it afterwards.
pub fn connect_to<S, T, F, Body>(upstream: S, body: F) -> ConnectTo<S, F, T>
where
    S: Sender,
    S::Value: Into<Endpoint>,
    T: ConnectResource,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
{
    ConnectTo {
        upstream,
        body,
        _marker: PhantomData,
    }
}

/// Sender returned by [`connect_to`].
pub struct ConnectTo<S, F, T> {
    upstream: S,
    body: F,
    _marker: PhantomData<fn() -> T>,
}

impl<S, T, F, Body> Sender for ConnectTo<S, F, T>
where
    S: Sender,
    S::Value: Into<Endpoint>,
    T: ConnectResource,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
{
    type Value = Body::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = Body::Value>,
    {
        ConnectToOp {
            upstream: self.upstream,
            body: self.body,
            receiver,
            _marker: PhantomData,
        }
    }
}

struct ConnectToOp<S, F, T, R> {
    upstream: S,
    body: F,
    receiver: R,
    _marker: PhantomData<fn() -> T>,
}

impl<S, T, F, Body, R> OperationState for ConnectToOp<S, F, T, R>
where
    S: Sender,
    S::Value: Into<Endpoint>,
    T: ConnectResource,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
    R: Receiver<Value = Body::Value>,
{
    fn start(self) {
        let env = self.receiver.env();
        let scheduler = env.expect_scheduler();
        match T::create(&scheduler) {
            Err(e) => self.receiver.set_error(Error::Os(e)),
            Ok(resource) => {
                let connect = {
                    let resource = resource.clone();
                    self.upstream
                        .let_value(move |ep| resource.connect_endpoint(ep.into()))
                };
                connect
                    .connect(ScopedBodyReceiver {
                        resource,
                        body: self.body,
                        receiver: self.receiver,
                        _marker: PhantomData,
                    })
                    .start();
            }
        }
    }
}

/// Receiver shared by `connect_to` and `accept_from`: on value, runs the
/// body with the close appended; on error or stop of the acquisition
/// phase, closes first and then re-delivers the saved disposition.
pub(crate) struct ScopedBodyReceiver<T, F, R, Body> {
    pub(crate) resource: T,
    pub(crate) body: F,
    pub(crate) receiver: R,
    pub(crate) _marker: PhantomData<fn() -> Body>,
}

impl<T, F, Body, R> ScopedBodyReceiver<T, F, R, Body>
where
    T: AsyncDrop + Clone,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
    R: Receiver<Value = Body::Value>,
{
    fn close_then(self, saved: Completion<Body::Value>) {
        T::async_drop(Arc::new(self.resource.clone()))
            .connect(Redeliver {
                saved,
                receiver: self.receiver,
            })
            .start();
    }
}

impl<T, F, Body, R> Receiver for ScopedBodyReceiver<T, F, R, Body>
where
    T: AsyncDrop + Clone,
    F: FnOnce(&T) -> Body + Send + 'static,
    Body: Sender,
    R: Receiver<Value = Body::Value>,
{
    type Value = ();

    fn set_value(self, (): ()) {
        let Self {
            resource,
            body,
            receiver,
            ..
        } = self;
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
            .connect(receiver)
            .start();
    }

    fn set_error(self, error: Error) {
        self.close_then(Completion::Error(error));
    }

    fn set_stopped(self) {
        self.close_then(Completion::Stopped);
    }

    fn env(&self) -> Env {
        self.receiver.env()
    }
}

/// Completes a close, then re-delivers the completion saved before it.
pub(crate) struct Redeliver<V, R> {
    pub(crate) saved: Completion<V>,
    pub(crate) receiver: R,
}

impl<V, R> Receiver for Redeliver<V, R>
where
    V: Send + 'static,
    R: Receiver<Value = V>,
{
    type Value = ();

    fn set_value(self, (): ()) {
        self.saved.send_to(self.receiver);
    }

    fn set_error(self, error: Error) {
        self.receiver.set_error(error);
    }

    fn set_stopped(self) {
        self.receiver.set_stopped();
    }

    fn env(&self) -> Env {
        self.receiver.env().but_stop_token(StopToken::never())
    }
}
