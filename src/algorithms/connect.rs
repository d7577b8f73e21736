//! Stream connect.
//!
//! Issues a non-blocking connect on the loop thread. An in-flight connect
//! parks on writability; the readiness dispatch consults `SO_ERROR` to
//! decide the outcome. Connect is not cancellable — the socket either
//! reaches the connected state or reports the OS error, and cleanup is the
//! caller's close.

use std::sync::Arc;

use crate::error::{Error, OsErrc, OsError};
use crate::event_loop::op::{OnceFlag, Operation};
use crate::event_loop::LoopShared;
use crate::exec::{OperationState, Receiver, Sender};
use crate::net::addr::Endpoint;
use crate::net::tcp::{ConnectProgress, TcpSocket};
use crate::os::io::{next_io_id, AfterReady, IoEntry, ReadyHandler};
use crate::os::poller::Interest;
use crate::pipe::{ApplyValue, PipedWith, SenderClosure};

/// Sender of [`TcpSocket::connect`].
pub struct ConnectSender {
    socket: TcpSocket,
    endpoint: Endpoint,
}

impl ConnectSender {
    pub(crate) fn new(socket: TcpSocket, endpoint: Endpoint) -> Self {
        Self { socket, endpoint }
    }
}

struct ConnectOp<R> {
    socket: TcpSocket,
    endpoint: Endpoint,
    receiver: R,
}

impl<R: Receiver<Value = ()>> OperationState for ConnectOp<R> {
    fn start(self) {
        let shared = self.socket.shared();
        shared.submit(Box::new(self));
    }
}

impl<R: Receiver<Value = ()>> Operation for ConnectOp<R> {
    fn apply(self: Box<Self>) {
        let Self {
            socket,
            endpoint,
            receiver,
        } = *self;
        match socket.start_connect(&endpoint) {
            Err(e) => receiver.set_error(Error::Os(e)),
            Ok(ConnectProgress::Done) => receiver.set_value(()),
            Ok(ConnectProgress::InFlight(fd)) => {
                let shared = socket.shared();
                let id = next_io_id();
                socket.park(id);
                let key = shared.io.lock().insert(IoEntry {
                    id,
                    fd,
                    flag: Arc::new(OnceFlag::new()),
                    guard: None,
                    handler: Box::new(ConnectReady {
                        id,
                        socket: socket.clone(),
                        receiver,
                    }),
                });
                if let Err(e) = shared.poller.register(fd, Interest::Writable, key.to_usize()) {
                    tracing::warn!(error = %e, fd, "failed to register descriptor");
                    let entry = shared.io.lock().remove_key(key);
                    socket.clear_parked(id);
                    if let Some(entry) = entry {
                        entry.handler.aborted();
                    }
                }
            }
        }
    }
}

struct ConnectReady<R> {
    id: u64,
    socket: TcpSocket,
    receiver: R,
}

impl<R: Receiver<Value = ()>> ReadyHandler for ConnectReady<R> {
    fn ready(self: Box<Self>, _lp: &Arc<LoopShared>) -> AfterReady {
        let Self {
            id,
            socket,
            receiver,
        } = *self;
        socket.clear_parked(id);
        let outcome = socket.finish_connect();
        AfterReady::Complete(Box::new(move || match outcome {
            Ok(()) => receiver.set_value(()),
            Err(e) => receiver.set_error(Error::Os(e)),
        }))
    }

    fn cancelled(self: Box<Self>) {
        self.socket.clear_parked(self.id);
        self.receiver.set_stopped();
    }

    fn aborted(self: Box<Self>) {
        self.receiver
            .set_error(Error::Os(OsError::new(OsErrc::OperationCanceled)));
    }
}

impl Sender for ConnectSender {
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        ConnectOp {
            socket: self.socket,
            endpoint: self.endpoint,
            receiver,
        }
    }
}

/// Closure form: takes the endpoint from the predecessor's value.
pub fn connect(socket: &TcpSocket) -> ConnectClosure {
    ConnectClosure {
        socket: socket.clone(),
    }
}

/// Closure returned by [`connect`].
pub struct ConnectClosure {
    socket: TcpSocket,
}

impl<E> ApplyValue<E> for ConnectClosure
where
    E: Into<Endpoint> + Send + 'static,
{
    type Out = ConnectSender;

    fn apply(self, endpoint: E) -> ConnectSender {
        ConnectSender::new(self.socket, endpoint.into())
    }
}

impl<E> SenderClosure<E> for ConnectClosure
where
    E: Into<Endpoint> + Send + 'static,
{
    type Output<S: Sender<Value = E>> = PipedWith<S, Self>;

    fn pipe_from<S: Sender<Value = E>>(self, prev: S) -> Self::Output<S> {
        PipedWith::new(prev, self)
    }
}
