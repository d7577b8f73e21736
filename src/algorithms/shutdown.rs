//! Stream shutdown (write side).

use crate::error::Error;
use crate::event_loop::op::Operation;
use crate::exec::{OperationState, Receiver, Sender};
use crate::net::tcp::TcpSocket;

/// Sender of [`TcpSocket::shutdown`]: flushes nothing, closes the write
/// side, keeps the handle open for reads and the eventual close.
pub struct ShutdownSender {
    socket: TcpSocket,
}

impl ShutdownSender {
    pub(crate) fn new(socket: TcpSocket) -> Self {
        Self { socket }
    }
}

struct ShutdownOp<R> {
    socket: TcpSocket,
    receiver: R,
}

impl<R: Receiver<Value = ()>> OperationState for ShutdownOp<R> {
    fn start(self) {
        let shared = self.socket.shared();
        shared.submit(Box::new(self));
    }
}

impl<R: Receiver<Value = ()>> Operation for ShutdownOp<R> {
    fn apply(self: Box<Self>) {
        match self.socket.shutdown_now() {
            Ok(()) => self.receiver.set_value(()),
            Err(e) => self.receiver.set_error(Error::Os(e)),
        }
    }
}

impl Sender for ShutdownSender {
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        ShutdownOp {
            socket: self.socket,
            receiver,
        }
    }
}
