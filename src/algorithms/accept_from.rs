//! Scoped accepted sockets.
//!
//! `accept_from(upstream, listener, body)` creates a socket on the
//! listener's loop, accepts one connection into it, lends it to `body`,
//! and closes it afterwards. An accept error or cancellation closes the
//! socket first, then re-delivers the saved disposition — the same
//! layering as [`connect_to`](crate::algorithms::connect_to).

use std::marker::PhantomData;

use crate::algorithms::async_value::AsyncDrop;
use crate::algorithms::connect_to::ScopedBodyReceiver;
use crate::exec::{OperationState, Receiver, Sender, SenderExt};

/// A listener whose connections `accept_from` can scope.
pub trait Acceptor: Clone + Send + Sync + 'static {
    /// The socket type accepted connections land in.
    type Socket: AsyncDrop + Clone;
    /// The accept sender.
    type Accept: Sender<Value = ()>;

    /// Creates an unopened socket on this listener's loop.
    fn make_socket(&self) -> Self::Socket;

    /// Accepts one connection into `socket`.
    fn accept_into(&self, socket: &Self::Socket) -> Self::Accept;
}

/// Lends a freshly accepted connection to `body`, closing it afterwards.
pub fn accept_from<S, L, F, Body>(upstream: S, listener: &L, body: F) -> AcceptFrom<S, L, F>
where
    S: Sender<Value = ()>,
    L: Acceptor,
    F: FnOnce(&L::Socket) -> Body + Send + 'static,
    Body: Sender,
{
    AcceptFrom {
        upstream,
        listener: listener.clone(),
        body,
    }
}

/// Sender returned by [`accept_from`].
pub struct AcceptFrom<S, L, F> {
    upstream: S,
    listener: L,
    body: F,
}

impl<S, L, F, Body> Sender for AcceptFrom<S, L, F>
where
    S: Sender<Value = ()>,
    L: Acceptor,
    F: FnOnce(&L::Socket) -> Body + Send + 'static,
    Body: Sender,
{
    type Value = Body::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = Body::Value>,
    {
        AcceptFromOp {
            upstream: self.upstream,
            listener: self.listener,
            body: self.body,
            receiver,
        }
    }
}

struct AcceptFromOp<S, L, F, R> {
    upstream: S,
    listener: L,
    body: F,
    receiver: R,
}

impl<S, L, F, Body, R> OperationState for AcceptFromOp<S, L, F, R>
where
    S: Sender<Value = ()>,
    L: Acceptor,
    F: FnOnce(&L::Socket) -> Body + Send + 'static,
    Body: Sender,
    R: Receiver<Value = Body::Value>,
{
    fn start(self) {
        let socket = self.listener.make_socket();
        let accept = {
            let listener = self.listener.clone();
            let socket = socket.clone();
            self.upstream
                .let_value(move |()| listener.accept_into(&socket))
        };
        accept
            .connect(ScopedBodyReceiver {
                resource: socket,
                body: self.body,
                receiver: self.receiver,
                _marker: PhantomData,
            })
            .start();
    }
}
