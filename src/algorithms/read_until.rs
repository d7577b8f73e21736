//! Stream read-until: accumulate reads until a predicate says enough.
//!
//! The same buffer is reused for every read — it is a scratch window, not
//! an accumulator — while `total` grows monotonically. The predicate sees
//! bytes-last-read; a `true` stops the loop and delivers
//! `(buffer, total)`. End of stream delivers whatever accumulated so far;
//! other read failures surface on the error channel. A panicking
//! predicate is caught and surfaces as an error instead of unwinding
//! through the dispatch loop.

use std::io;
use std::sync::Arc;

use crate::error::{Error, OsErrc, OsError};
use crate::event_loop::op::{OnceFlag, Operation};
use crate::event_loop::LoopShared;
use crate::exec::{catch_user, OperationState, Receiver, Sender};
use crate::net::tcp::TcpSocket;
use crate::os::io::{next_io_id, AfterReady, ReadyHandler};
use crate::os::poller::Interest;
use crate::pipe::{ApplyValue, PipedWith, SenderClosure};

use super::receive::park_with_stop;

/// Sender of [`TcpSocket::read_until`]; delivers `(buffer, total)`.
pub struct ReadUntilSender<B, F> {
    socket: TcpSocket,
    buf: B,
    condition: F,
}

impl<B, F> ReadUntilSender<B, F> {
    pub(crate) fn new(socket: TcpSocket, buf: B, condition: F) -> Self {
        Self {
            socket,
            buf,
            condition,
        }
    }
}

struct ReadUntilState<B, F, R> {
    id: u64,
    socket: TcpSocket,
    buf: B,
    condition: F,
    total: usize,
    receiver: R,
}

enum UntilStep {
    Finished(usize),
    Blocked,
    Failed(Error),
}

impl<B, F, R> ReadUntilState<B, F, R>
where
    B: AsMut<[u8]> + Send + 'static,
    F: FnMut(usize) -> bool + Send + 'static,
    R: Receiver<Value = (B, usize)>,
{
    /// Reads until the predicate fires, the stream would block, or the
    /// stream ends.
    fn pump(&mut self) -> UntilStep {
        loop {
            match self.socket.read_at(self.buf.as_mut()) {
                Ok(0) => return UntilStep::Finished(self.total),
                Ok(n) => {
                    self.total += n;
                    let condition = &mut self.condition;
                    match catch_user(move || condition(n)) {
                        Ok(true) => return UntilStep::Finished(self.total),
                        Ok(false) => {}
                        Err(panic) => return UntilStep::Failed(panic),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return UntilStep::Blocked,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return UntilStep::Failed(Error::Os(OsError::from_io(&e))),
            }
        }
    }
}

struct ReadUntilOp<B, F, R> {
    socket: TcpSocket,
    buf: B,
    condition: F,
    receiver: R,
}

impl<B, F, R> OperationState for ReadUntilOp<B, F, R>
where
    B: AsMut<[u8]> + Send + 'static,
    F: FnMut(usize) -> bool + Send + 'static,
    R: Receiver<Value = (B, usize)>,
{
    fn start(self) {
        let shared = self.socket.shared();
        shared.submit(Box::new(self));
    }
}

impl<B, F, R> Operation for ReadUntilOp<B, F, R>
where
    B: AsMut<[u8]> + Send + 'static,
    F: FnMut(usize) -> bool + Send + 'static,
    R: Receiver<Value = (B, usize)>,
{
    fn apply(self: Box<Self>) {
        let Self {
            socket,
            buf,
            condition,
            receiver,
        } = *self;
        let id = next_io_id();
        let mut state = ReadUntilState {
            id,
            socket,
            buf,
            condition,
            total: 0,
            receiver,
        };
        match state.pump() {
            UntilStep::Finished(total) => state.receiver.set_value((state.buf, total)),
            UntilStep::Failed(e) => state.receiver.set_error(e),
            UntilStep::Blocked => {
                let Some(fd) = state.socket.stream_fd() else {
                    state
                        .receiver
                        .set_error(Error::os(OsErrc::NotConnected));
                    return;
                };
                let shared = state.socket.shared();
                let flag = Arc::new(OnceFlag::new());
                let env = state.receiver.env();
                let token = env.stop_token().clone();
                state.socket.park(id);
                park_with_stop(&shared, fd, id, flag, Box::new(state), &token);
            }
        }
    }
}

impl<B, F, R> ReadyHandler for ReadUntilState<B, F, R>
where
    B: AsMut<[u8]> + Send + 'static,
    F: FnMut(usize) -> bool + Send + 'static,
    R: Receiver<Value = (B, usize)>,
{
    fn ready(mut self: Box<Self>, _lp: &Arc<LoopShared>) -> AfterReady {
        match self.pump() {
            UntilStep::Blocked => AfterReady::Rearm(self, Interest::Readable),
            UntilStep::Finished(total) => {
                self.socket.clear_parked(self.id);
                let Self { buf, receiver, .. } = *self;
                AfterReady::Complete(Box::new(move || receiver.set_value((buf, total))))
            }
            UntilStep::Failed(e) => {
                self.socket.clear_parked(self.id);
                let receiver = self.receiver;
                AfterReady::Complete(Box::new(move || receiver.set_error(e)))
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

impl<B, F> Sender for ReadUntilSender<B, F>
where
    B: AsMut<[u8]> + Send + 'static,
    F: FnMut(usize) -> bool + Send + 'static,
{
    type Value = (B, usize);

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = (B, usize)>,
    {
        ReadUntilOp {
            socket: self.socket,
            buf: self.buf,
            condition: self.condition,
            receiver,
        }
    }
}

/// Closure form: takes the buffer from the predecessor's value.
pub fn read_until<F>(socket: &TcpSocket, condition: F) -> ReadUntilClosure<F>
where
    F: FnMut(usize) -> bool + Send + 'static,
{
    ReadUntilClosure {
        socket: socket.clone(),
        condition,
    }
}

/// Closure returned by [`read_until`].
pub struct ReadUntilClosure<F> {
    socket: TcpSocket,
    condition: F,
}

impl<B, F> ApplyValue<B> for ReadUntilClosure<F>
where
    B: AsMut<[u8]> + Send + 'static,
    F: FnMut(usize) -> bool + Send + 'static,
{
    type Out = ReadUntilSender<B, F>;

    fn apply(self, buf: B) -> ReadUntilSender<B, F> {
        ReadUntilSender::new(self.socket, buf, self.condition)
    }
}

impl<B, F> SenderClosure<B> for ReadUntilClosure<F>
where
    B: AsMut<[u8]> + Send + 'static,
    F: FnMut(usize) -> bool + Send + 'static,
{
    type Output<S: Sender<Value = B>> = PipedWith<S, Self>;

    fn pipe_from<S: Sender<Value = B>>(self, prev: S) -> Self::Output<S> {
        PipedWith::new(prev, self)
    }
}
