//! Stream send and datagram send-to.
//!
//! `send` writes the whole buffer: partial writes continue from the next
//! writability notification with the same buffer and a moving offset.
//! Neither send form is cancellable; bytes handed to the kernel are not
//! clawed back.

use std::io;
use std::sync::Arc;

use crate::error::{Error, OsErrc, OsError};
use crate::event_loop::op::{OnceFlag, Operation};
use crate::event_loop::LoopShared;
use crate::exec::{OperationState, Receiver, Sender};
use crate::net::addr::Endpoint;
use crate::net::tcp::TcpSocket;
use crate::net::udp::UdpSocket;
use crate::os::io::{next_io_id, AfterReady, IoEntry, ReadyHandler};
use crate::os::poller::Interest;
use crate::pipe::{ApplyValue, PipedWith, SenderClosure};

enum SendStep {
    Done,
    Blocked,
    Failed(OsError),
}

fn push_bytes(socket: &TcpSocket, bytes: &[u8], offset: &mut usize) -> SendStep {
    while *offset < bytes.len() {
        match socket.write_at(&bytes[*offset..]) {
            Ok(n) => *offset += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return SendStep::Blocked,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return SendStep::Failed(OsError::from_io(&e)),
        }
    }
    SendStep::Done
}

/// Sender of [`TcpSocket::send`]; delivers `()` after the full buffer is
/// written.
pub struct SendSender<B> {
    socket: TcpSocket,
    buf: B,
}

impl<B> SendSender<B> {
    pub(crate) fn new(socket: TcpSocket, buf: B) -> Self {
        Self { socket, buf }
    }
}

struct SendOp<B, R> {
    socket: TcpSocket,
    buf: B,
    receiver: R,
}

impl<B, R> OperationState for SendOp<B, R>
where
    B: AsRef<[u8]> + Send + 'static,
    R: Receiver<Value = ()>,
{
    fn start(self) {
        let shared = self.socket.shared();
        shared.submit(Box::new(self));
    }
}

impl<B, R> Operation for SendOp<B, R>
where
    B: AsRef<[u8]> + Send + 'static,
    R: Receiver<Value = ()>,
{
    fn apply(self: Box<Self>) {
        let Self {
            socket,
            buf,
            receiver,
        } = *self;
        drive_send(socket, buf, 0, receiver);
    }
}

fn drive_send<B, R>(socket: TcpSocket, buf: B, mut offset: usize, receiver: R)
where
    B: AsRef<[u8]> + Send + 'static,
    R: Receiver<Value = ()>,
{
    match push_bytes(&socket, buf.as_ref(), &mut offset) {
        SendStep::Done => receiver.set_value(()),
        SendStep::Failed(e) => receiver.set_error(Error::Os(e)),
        SendStep::Blocked => {
            let Some(fd) = socket.stream_fd() else {
                receiver.set_error(Error::os(OsErrc::NotConnected));
                return;
            };
            let shared = socket.shared();
            let id = next_io_id();
            socket.park(id);
            let key = shared.io.lock().insert(IoEntry {
                id,
                fd,
                flag: Arc::new(OnceFlag::new()),
                guard: None,
                handler: Box::new(SendReady {
                    id,
                    socket: socket.clone(),
                    buf,
                    offset,
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

struct SendReady<B, R> {
    id: u64,
    socket: TcpSocket,
    buf: B,
    offset: usize,
    receiver: R,
}

impl<B, R> ReadyHandler for SendReady<B, R>
where
    B: AsRef<[u8]> + Send + 'static,
    R: Receiver<Value = ()>,
{
    fn ready(mut self: Box<Self>, _lp: &Arc<LoopShared>) -> AfterReady {
        match push_bytes(&self.socket, self.buf.as_ref(), &mut self.offset) {
            SendStep::Blocked => AfterReady::Rearm(self, Interest::Writable),
            SendStep::Done => {
                self.socket.clear_parked(self.id);
                let receiver = self.receiver;
                AfterReady::Complete(Box::new(move || receiver.set_value(())))
            }
            SendStep::Failed(e) => {
                self.socket.clear_parked(self.id);
                let receiver = self.receiver;
                AfterReady::Complete(Box::new(move || receiver.set_error(Error::Os(e))))
            }
        }
    }

    fn cancelled(self: Box<Self>) {
        self.socket.clear_parked(self.id);
        self.receiver.set_stopped();
    }

    fn aborted(self: Box<Self>) {
        self.receiver.set_error(Error::os(OsErrc::OperationCanceled));
    }
}

impl<B> Sender for SendSender<B>
where
    B: AsRef<[u8]> + Send + 'static,
{
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        SendOp {
            socket: self.socket,
            buf: self.buf,
            receiver,
        }
    }
}

/// Closure form: takes the buffer from the predecessor's value.
pub fn send(socket: &TcpSocket) -> SendClosure {
    SendClosure {
        socket: socket.clone(),
    }
}

/// Closure returned by [`send`].
pub struct SendClosure {
    socket: TcpSocket,
}

impl<B> ApplyValue<B> for SendClosure
where
    B: AsRef<[u8]> + Send + 'static,
{
    type Out = SendSender<B>;

    fn apply(self, buf: B) -> SendSender<B> {
        SendSender::new(self.socket, buf)
    }
}

impl<B> SenderClosure<B> for SendClosure
where
    B: AsRef<[u8]> + Send + 'static,
{
    type Output<S: Sender<Value = B>> = PipedWith<S, Self>;

    fn pipe_from<S: Sender<Value = B>>(self, prev: S) -> Self::Output<S> {
        PipedWith::new(prev, self)
    }
}

/// Sender of [`UdpSocket::send_to`]: one datagram, whole or nothing.
pub struct SendToSender<B> {
    socket: UdpSocket,
    buf: B,
    peer: Endpoint,
}

impl<B> SendToSender<B> {
    pub(crate) fn new(socket: UdpSocket, buf: B, peer: Endpoint) -> Self {
        Self { socket, buf, peer }
    }
}

struct SendToOp<B, R> {
    socket: UdpSocket,
    buf: B,
    peer: Endpoint,
    receiver: R,
}

impl<B, R> OperationState for SendToOp<B, R>
where
    B: AsRef<[u8]> + Send + 'static,
    R: Receiver<Value = ()>,
{
    fn start(self) {
        let shared = self.socket.shared();
        shared.submit(Box::new(self));
    }
}

impl<B, R> Operation for SendToOp<B, R>
where
    B: AsRef<[u8]> + Send + 'static,
    R: Receiver<Value = ()>,
{
    fn apply(self: Box<Self>) {
        let Self {
            socket,
            buf,
            peer,
            receiver,
        } = *self;
        try_send_to(socket, buf, peer, receiver);
    }
}

fn try_send_to<B, R>(socket: UdpSocket, buf: B, peer: Endpoint, receiver: R)
where
    B: AsRef<[u8]> + Send + 'static,
    R: Receiver<Value = ()>,
{
    loop {
        match socket.send_to_at(buf.as_ref(), peer.socket_addr()) {
            Ok(_) => {
                receiver.set_value(());
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                receiver.set_error(Error::Os(OsError::from_io(&e)));
                return;
            }
        }
    }
    let Some(fd) = socket.fd() else {
        receiver.set_error(Error::os(OsErrc::BadFileDescriptor));
        return;
    };
    let shared = socket.shared();
    let id = next_io_id();
    socket.park(id);
    let key = shared.io.lock().insert(IoEntry {
        id,
        fd,
        flag: Arc::new(OnceFlag::new()),
        guard: None,
        handler: Box::new(SendToReady {
            id,
            socket: socket.clone(),
            buf,
            peer,
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

struct SendToReady<B, R> {
    id: u64,
    socket: UdpSocket,
    buf: B,
    peer: Endpoint,
    receiver: R,
}

impl<B, R> ReadyHandler for SendToReady<B, R>
where
    B: AsRef<[u8]> + Send + 'static,
    R: Receiver<Value = ()>,
{
    fn ready(self: Box<Self>, _lp: &Arc<LoopShared>) -> AfterReady {
        let Self {
            id,
            socket,
            buf,
            peer,
            receiver,
        } = *self;
        match socket.send_to_at(buf.as_ref(), peer.socket_addr()) {
            Ok(_) => {
                socket.clear_parked(id);
                AfterReady::Complete(Box::new(move || receiver.set_value(())))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => AfterReady::Rearm(
                Box::new(SendToReady {
                    id,
                    socket,
                    buf,
                    peer,
                    receiver,
                }),
                Interest::Writable,
            ),
            Err(e) => {
                socket.clear_parked(id);
                let err = OsError::from_io(&e);
                AfterReady::Complete(Box::new(move || receiver.set_error(Error::Os(err))))
            }
        }
    }

    fn cancelled(self: Box<Self>) {
        self.socket.clear_parked(self.id);
        self.receiver.set_stopped();
    }

    fn aborted(self: Box<Self>) {
        self.receiver.set_error(Error::os(OsErrc::OperationCanceled));
    }
}

impl<B> Sender for SendToSender<B>
where
    B: AsRef<[u8]> + Send + 'static,
{
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        SendToOp {
            socket: self.socket,
            buf: self.buf,
            peer: self.peer,
            receiver,
        }
    }
}

/// Closure form: takes `(buffer, endpoint)` from the predecessor's value.
pub fn send_to(socket: &UdpSocket) -> SendToClosure {
    SendToClosure {
        socket: socket.clone(),
    }
}

/// Closure returned by [`send_to`].
pub struct SendToClosure {
    socket: UdpSocket,
}

impl<B, E> ApplyValue<(B, E)> for SendToClosure
where
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Endpoint> + Send + 'static,
{
    type Out = SendToSender<B>;

    fn apply(self, (buf, peer): (B, E)) -> SendToSender<B> {
        SendToSender::new(self.socket, buf, peer.into())
    }
}

impl<B, E> SenderClosure<(B, E)> for SendToClosure
where
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Endpoint> + Send + 'static,
{
    type Output<S: Sender<Value = (B, E)>> = PipedWith<S, Self>;

    fn pipe_from<S: Sender<Value = (B, E)>>(self, prev: S) -> Self::Output<S> {
        PipedWith::new(prev, self)
    }
}
