//! Accept: bind a pending connection to a waiting socket.
//!
//! The op-state registers itself with the listener's acceptor queue. The
//! listener completes it on the loop thread — immediately when the kernel
//! already buffered a connection, otherwise from the readiness watcher.
//! Cancellation unlinks the op-state from the queue and delivers
//! `set_stopped`.

use std::sync::Arc;

use crate::error::{Error, OsError};
use crate::event_loop::op::{OnceFlag, Operation};
use crate::exec::{OperationState, Receiver, Sender};
use crate::net::listener::{AcceptParked, AcceptWaiter, TcpListener};
use crate::net::tcp::TcpSocket;
use crate::os::io::next_io_id;

/// Sender of [`TcpListener::accept`]: completes with `()` once a
/// connection has been accepted into the supplied socket.
pub struct AcceptSender {
    listener: TcpListener,
    socket: TcpSocket,
}

impl AcceptSender {
    pub(crate) fn new(listener: TcpListener, socket: TcpSocket) -> Self {
        Self { listener, socket }
    }
}

struct AcceptOp<R> {
    listener: TcpListener,
    socket: TcpSocket,
    receiver: R,
}

impl<R: Receiver<Value = ()>> OperationState for AcceptOp<R> {
    fn start(self) {
        let shared = self.listener.shared();
        shared.submit(Box::new(self));
    }
}

impl<R: Receiver<Value = ()>> Operation for AcceptOp<R> {
    fn apply(self: Box<Self>) {
        let Self {
            listener,
            socket,
            receiver,
        } = *self;
        let flag = Arc::new(OnceFlag::new());
        let env = receiver.env();
        let token = env.stop_token().clone();
        let id = next_io_id();
        listener.register_accept(AcceptParked {
            id,
            flag: flag.clone(),
            guard: None,
            waiter: Box::new(AcceptCompletion { socket, receiver }),
        });
        // May have completed inline above; the guard attach is then a no-op
        // and the claimed flag keeps the callback inert.
        let guard = token.on_stop({
            let listener = listener.clone();
            move || {
                if flag.claim() {
                    let shared = listener.shared();
                    shared.schedule(Box::new(AcceptStopOp { listener, id }));
                }
            }
        });
        listener.attach_guard(id, guard);
    }
}

struct AcceptCompletion<R> {
    socket: TcpSocket,
    receiver: R,
}

impl<R: Receiver<Value = ()>> AcceptWaiter for AcceptCompletion<R> {
    fn accepted(self: Box<Self>, stream: std::net::TcpStream) {
        self.socket.install_stream(stream);
        self.receiver.set_value(());
    }

    fn failed(self: Box<Self>, error: OsError) {
        self.receiver.set_error(Error::Os(error));
    }

    fn stopped(self: Box<Self>) {
        self.receiver.set_stopped();
    }
}

struct AcceptStopOp {
    listener: TcpListener,
    id: u64,
}

impl Operation for AcceptStopOp {
    fn apply(self: Box<Self>) {
        if let Some(parked) = self.listener.cancel_accept(self.id) {
            parked.stopped();
        }
    }
}

impl Sender for AcceptSender {
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        AcceptOp {
            listener: self.listener,
            socket: self.socket,
            receiver,
        }
    }
}
