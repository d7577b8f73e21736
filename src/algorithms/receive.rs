//! Stream receive and datagram receive-from.
//!
//! `receive` completes on the first chunk the kernel delivers; end of
//! stream completes with zero bytes read. Both forms are cancellable: the
//! stop callback claims the once-flag and queues the shared I/O stop
//! operation, which unparks the entry and delivers `set_stopped`.

use std::io;
use std::sync::Arc;

use crate::error::{Error, OsErrc, OsError};
use crate::event_loop::op::{OnceFlag, Operation};
use crate::event_loop::LoopShared;
use crate::exec::{OperationState, Receiver, Sender};
use crate::net::addr::Endpoint;
use crate::net::tcp::TcpSocket;
use crate::net::udp::UdpSocket;
use crate::os::io::{next_io_id, AfterReady, IoEntry, IoStopOp, ReadyHandler};
use crate::os::poller::Interest;
use crate::pipe::{ApplyValue, PipedWith, SenderClosure};

/// Parks a cancellable read-side entry and wires its stop callback.
pub(crate) fn park_with_stop(
    shared: &Arc<LoopShared>,
    fd: std::os::fd::RawFd,
    id: u64,
    flag: Arc<OnceFlag>,
    handler: Box<dyn ReadyHandler>,
    token: &crate::stop::StopToken,
) {
    let key = shared.io.lock().insert(IoEntry {
        id,
        fd,
        flag: flag.clone(),
        guard: None,
        handler,
    });
    if let Err(e) = shared.poller.register(fd, Interest::Readable, key.to_usize()) {
        tracing::warn!(error = %e, fd, "failed to register descriptor");
        let entry = shared.io.lock().remove_key(key);
        if let Some(entry) = entry {
            entry.handler.aborted();
        }
        return;
    }
    let guard = token.on_stop({
        let shared = shared.clone();
        move || {
            if flag.claim() {
                let op = Box::new(IoStopOp {
                    shared: shared.clone(),
                    id,
                });
                shared.schedule(op);
            }
        }
    });
    shared.io.lock().attach_guard(id, guard);
}

/// Sender of [`TcpSocket::receive`]; delivers `(buffer, bytes_read)`.
pub struct ReceiveSender<B> {
    socket: TcpSocket,
    buf: B,
}

impl<B> ReceiveSender<B> {
    pub(crate) fn new(socket: TcpSocket, buf: B) -> Self {
        Self { socket, buf }
    }
}

struct ReceiveOp<B, R> {
    socket: TcpSocket,
    buf: B,
    receiver: R,
}

impl<B, R> OperationState for ReceiveOp<B, R>
where
    B: AsMut<[u8]> + Send + 'static,
    R: Receiver<Value = (B, usize)>,
{
    fn start(self) {
        let shared = self.socket.shared();
        shared.submit(Box::new(self));
    }
}

enum ReadStep {
    Got(usize),
    Blocked,
    Failed(OsError),
}

fn pull_bytes(socket: &TcpSocket, buf: &mut [u8]) -> ReadStep {
    loop {
        match socket.read_at(buf) {
            Ok(n) => return ReadStep::Got(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadStep::Blocked,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return ReadStep::Failed(OsError::from_io(&e)),
        }
    }
}

impl<B, R> Operation for ReceiveOp<B, R>
where
    B: AsMut<[u8]> + Send + 'static,
    R: Receiver<Value = (B, usize)>,
{
    fn apply(self: Box<Self>) {
        let Self {
            socket,
            mut buf,
            receiver,
        } = *self;
        match pull_bytes(&socket, buf.as_mut()) {
            ReadStep::Got(n) => receiver.set_value((buf, n)),
            ReadStep::Failed(e) => receiver.set_error(Error::Os(e)),
            ReadStep::Blocked => {
                let Some(fd) = socket.stream_fd() else {
                    receiver.set_error(Error::os(OsErrc::NotConnected));
                    return;
                };
                let shared = socket.shared();
                let flag = Arc::new(OnceFlag::new());
                let env = receiver.env();
                let token = env.stop_token().clone();
                let id = next_io_id();
                socket.park(id);
                park_with_stop(
                    &shared,
                    fd,
                    id,
                    flag,
                    Box::new(ReceiveReady {
                        id,
                        socket: socket.clone(),
                        buf,
                        receiver,
                    }),
                    &token,
                );
            }
        }
    }
}

struct ReceiveReady<B, R> {
    id: u64,
    socket: TcpSocket,
    buf: B,
    receiver: R,
}

impl<B, R> ReadyHandler for ReceiveReady<B, R>
where
    B: AsMut<[u8]> + Send + 'static,
    R: Receiver<Value = (B, usize)>,
{
    fn ready(mut self: Box<Self>, _lp: &Arc<LoopShared>) -> AfterReady {
        match pull_bytes(&self.socket, self.buf.as_mut()) {
            ReadStep::Blocked => AfterReady::Rearm(self, Interest::Readable),
            ReadStep::Got(n) => {
                self.socket.clear_parked(self.id);
                let Self { buf, receiver, .. } = *self;
                AfterReady::Complete(Box::new(move || receiver.set_value((buf, n))))
            }
            ReadStep::Failed(e) => {
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

impl<B> Sender for ReceiveSender<B>
where
    B: AsMut<[u8]> + Send + 'static,
{
    type Value = (B, usize);

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = (B, usize)>,
    {
        ReceiveOp {
            socket: self.socket,
            buf: self.buf,
            receiver,
        }
    }
}

/// Closure form: takes the buffer from the predecessor's value.
pub fn receive(socket: &TcpSocket) -> ReceiveClosure {
    ReceiveClosure {
        socket: socket.clone(),
    }
}

/// Closure returned by [`receive`].
pub struct ReceiveClosure {
    socket: TcpSocket,
}

impl<B> ApplyValue<B> for ReceiveClosure
where
    B: AsMut<[u8]> + Send + 'static,
{
    type Out = ReceiveSender<B>;

    fn apply(self, buf: B) -> ReceiveSender<B> {
        ReceiveSender::new(self.socket, buf)
    }
}

impl<B> SenderClosure<B> for ReceiveClosure
where
    B: AsMut<[u8]> + Send + 'static,
{
    type Output<S: Sender<Value = B>> = PipedWith<S, Self>;

    fn pipe_from<S: Sender<Value = B>>(self, prev: S) -> Self::Output<S> {
        PipedWith::new(prev, self)
    }
}

/// Sender of [`UdpSocket::receive_from`]; delivers
/// `(buffer, bytes_read, peer)`.
pub struct ReceiveFromSender<B> {
    socket: UdpSocket,
    buf: B,
}

impl<B> ReceiveFromSender<B> {
    pub(crate) fn new(socket: UdpSocket, buf: B) -> Self {
        Self { socket, buf }
    }
}

struct ReceiveFromOp<B, R> {
    socket: UdpSocket,
    buf: B,
    receiver: R,
}

impl<B, R> OperationState for ReceiveFromOp<B, R>
where
    B: AsMut<[u8]> + Send + 'static,
    R: Receiver<Value = (B, usize, Endpoint)>,
{
    fn start(self) {
        let shared = self.socket.shared();
        shared.submit(Box::new(self));
    }
}

enum RecvFromStep {
    Got(usize, Endpoint),
    Blocked,
    Failed(OsError),
}

fn pull_datagram(socket: &UdpSocket, buf: &mut [u8]) -> RecvFromStep {
    loop {
        match socket.recv_from_at(buf) {
            Ok((n, peer)) => return RecvFromStep::Got(n, Endpoint::from(peer)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return RecvFromStep::Blocked,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return RecvFromStep::Failed(OsError::from_io(&e)),
        }
    }
}

impl<B, R> Operation for ReceiveFromOp<B, R>
where
    B: AsMut<[u8]> + Send + 'static,
    R: Receiver<Value = (B, usize, Endpoint)>,
{
    fn apply(self: Box<Self>) {
        let Self {
            socket,
            mut buf,
            receiver,
        } = *self;
        match pull_datagram(&socket, buf.as_mut()) {
            RecvFromStep::Got(n, peer) => receiver.set_value((buf, n, peer)),
            RecvFromStep::Failed(e) => receiver.set_error(Error::Os(e)),
            RecvFromStep::Blocked => {
                let Some(fd) = socket.fd() else {
                    receiver.set_error(Error::os(OsErrc::BadFileDescriptor));
                    return;
                };
                let shared = socket.shared();
                let flag = Arc::new(OnceFlag::new());
                let env = receiver.env();
                let token = env.stop_token().clone();
                let id = next_io_id();
                socket.park(id);
                park_with_stop(
                    &shared,
                    fd,
                    id,
                    flag,
                    Box::new(ReceiveFromReady {
                        id,
                        socket: socket.clone(),
                        buf,
                        receiver,
                    }),
                    &token,
                );
            }
        }
    }
}

struct ReceiveFromReady<B, R> {
    id: u64,
    socket: UdpSocket,
    buf: B,
    receiver: R,
}

impl<B, R> ReadyHandler for ReceiveFromReady<B, R>
where
    B: AsMut<[u8]> + Send + 'static,
    R: Receiver<Value = (B, usize, Endpoint)>,
{
    fn ready(mut self: Box<Self>, _lp: &Arc<LoopShared>) -> AfterReady {
        match pull_datagram(&self.socket, self.buf.as_mut()) {
            RecvFromStep::Blocked => AfterReady::Rearm(self, Interest::Readable),
            RecvFromStep::Got(n, peer) => {
                self.socket.clear_parked(self.id);
                let Self { buf, receiver, .. } = *self;
                AfterReady::Complete(Box::new(move || receiver.set_value((buf, n, peer))))
            }
            RecvFromStep::Failed(e) => {
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

impl<B> Sender for ReceiveFromSender<B>
where
    B: AsMut<[u8]> + Send + 'static,
{
    type Value = (B, usize, Endpoint);

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = (B, usize, Endpoint)>,
    {
        ReceiveFromOp {
            socket: self.socket,
            buf: self.buf,
            receiver,
        }
    }
}

/// Closure form: takes the buffer from the predecessor's value.
pub fn receive_from(socket: &UdpSocket) -> ReceiveFromClosure {
    ReceiveFromClosure {
        socket: socket.clone(),
    }
}

/// Closure returned by [`receive_from`].
pub struct ReceiveFromClosure {
    socket: UdpSocket,
}

impl<B> ApplyValue<B> for ReceiveFromClosure
where
    B: AsMut<[u8]> + Send + 'static,
{
    type Out = ReceiveFromSender<B>;

    fn apply(self, buf: B) -> ReceiveFromSender<B> {
        ReceiveFromSender::new(self.socket, buf)
    }
}

impl<B> SenderClosure<B> for ReceiveFromClosure
where
    B: AsMut<[u8]> + Send + 'static,
{
    type Output<S: Sender<Value = B>> = PipedWith<S, Self>;

    fn pipe_from<S: Sender<Value = B>>(self, prev: S) -> Self::Output<S> {
        PipedWith::new(prev, self)
    }
}
