//! TCP listeners and the acceptor queue.
//!
//! The listener owns a bound socket plus a queue of parked accept
//! op-states and the signed `pending` counter: non-negative counts
//! readiness the kernel signalled beyond what acceptors consumed; negative
//! encodes the configured backlog and the fact that `listen` has not run
//! yet. The first registered acceptor starts listening; a listen failure
//! is delivered synchronously to that acceptor.
//!
//! A waiter whose once-flag was claimed by cancellation stays queued until
//! its stop operation unlinks it; readiness dispatch skips it. A
//! connection accepted in the same race window is stashed and handed to
//! the next acceptor.

use std::collections::VecDeque;
use std::io;
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Socket, Type};

use crate::algorithms::close::CloseableResource;
use crate::algorithms::{AcceptSender, Acceptor, AsyncDrop, AsyncValue, BoundResource, CloseSender};
use crate::error::{OsErrc, OsError};
use crate::event_loop::op::OnceFlag;
use crate::event_loop::{EventLoop, LoopShared, Scheduler};
use crate::net::addr::Endpoint;
use crate::net::tcp::TcpSocket;
use crate::os::io::{next_io_id, AfterReady, IoEntry, ReadyHandler};
use crate::os::poller::Interest;
use crate::stop::StopGuard;

/// Backlog used when a listener is created implicitly by `bind_to`.
const DEFAULT_BACKLOG: u32 = 128;

/// One parked accept op-state.
pub(crate) struct AcceptParked {
    pub(crate) id: u64,
    pub(crate) flag: Arc<OnceFlag>,
    pub(crate) guard: Option<StopGuard>,
    pub(crate) waiter: Box<dyn AcceptWaiter>,
}

impl AcceptParked {
    fn accepted(self, stream: TcpStream) {
        drop(self.guard);
        self.waiter.accepted(stream);
    }

    fn failed(self, error: OsError) {
        drop(self.guard);
        self.waiter.failed(error);
    }

    pub(crate) fn stopped(self) {
        drop(self.guard);
        self.waiter.stopped();
    }
}

/// Completion interface of a parked accept.
pub(crate) trait AcceptWaiter: Send + 'static {
    fn accepted(self: Box<Self>, stream: TcpStream);
    fn failed(self: Box<Self>, error: OsError);
    fn stopped(self: Box<Self>);
}

struct ListenerSt {
    sock: Option<Socket>,
    closed: bool,
    /// `>= 0`: readiness beyond what acceptors consumed; `< 0`: negative
    /// backlog, listening not yet started.
    pending: i32,
    waiters: VecDeque<AcceptParked>,
    /// Connections accepted while every waiter was claimed by
    /// cancellation.
    stash: VecDeque<TcpStream>,
    watch_id: Option<u64>,
    armed: bool,
}

impl ListenerSt {
    /// Claims and removes the first waiter cancellation has not touched.
    fn take_claimable(&mut self) -> Option<AcceptParked> {
        let mut idx = 0;
        while idx < self.waiters.len() {
            if self.waiters[idx].flag.claim() {
                return self.waiters.remove(idx);
            }
            idx += 1;
        }
        None
    }

    fn has_claimable(&self) -> bool {
        self.waiters.iter().any(|p| !p.flag.claimed())
    }
}

pub(crate) struct ListenerInner {
    lp: Arc<LoopShared>,
    st: Mutex<ListenerSt>,
}

/// A TCP listener bound to one loop.
///
/// Listening starts lazily with the first accept. Must be closed exactly
/// once before the loop is dropped.
#[derive(Clone)]
pub struct TcpListener {
    inner: Arc<ListenerInner>,
}

enum Registered {
    Accepted(AcceptParked, TcpStream),
    Failed(AcceptParked, OsError),
    Queued,
}

impl TcpListener {
    /// Binds a listener to `endpoint` with the given backlog. `listen`
    /// itself runs when the first accept registers.
    ///
    /// # Errors
    ///
    /// Surfaces the OS error from socket creation or bind.
    pub fn bind(
        lp: &EventLoop,
        endpoint: impl Into<Endpoint>,
        backlog: u32,
    ) -> Result<Self, OsError> {
        Self::bind_shared(lp.shared().clone(), &endpoint.into(), backlog)
    }

    pub(crate) fn bind_shared(
        lp: Arc<LoopShared>,
        endpoint: &Endpoint,
        backlog: u32,
    ) -> Result<Self, OsError> {
        let sock = Socket::new(endpoint.domain(), Type::STREAM, None)
            .map_err(|e| OsError::from_io(&e))?;
        sock.set_reuse_address(true)
            .map_err(|e| OsError::from_io(&e))?;
        sock.set_nonblocking(true)
            .map_err(|e| OsError::from_io(&e))?;
        sock.bind(&endpoint.socket_addr().into())
            .map_err(|e| OsError::from_io(&e))?;
        lp.handles.fetch_add(1, Ordering::AcqRel);
        let backlog = i32::try_from(backlog.max(1)).unwrap_or(i32::MAX);
        Ok(Self {
            inner: Arc::new(ListenerInner {
                lp,
                st: Mutex::new(ListenerSt {
                    sock: Some(sock),
                    closed: false,
                    pending: -backlog,
                    waiters: VecDeque::new(),
                    stash: VecDeque::new(),
                    watch_id: None,
                    armed: false,
                }),
            }),
        })
    }

    /// Sender accepting one connection into `socket`.
    #[must_use]
    pub fn accept(&self, socket: &TcpSocket) -> AcceptSender {
        AcceptSender::new(self.clone(), socket.clone())
    }

    /// Sender closing the listener. Closing twice panics.
    #[must_use]
    pub fn close(&self) -> CloseSender<TcpListener> {
        CloseSender::new(self.clone())
    }

    pub(crate) fn shared(&self) -> Arc<LoopShared> {
        self.inner.lp.clone()
    }

    /// Registers an accept op-state; runs on the loop thread.
    pub(crate) fn register_accept(&self, parked: AcceptParked) {
        let outcome = {
            let mut st = self.inner.st.lock();
            if st.closed {
                Registered::Failed(parked, OsError::new(OsErrc::OperationCanceled))
            } else if let Some(stream) = st.stash.pop_front() {
                Registered::Accepted(parked, stream)
            } else if st.pending > 0 {
                let sock = st.sock.as_ref().expect("open listener has a socket");
                match try_accept(sock) {
                    Ok(Some(stream)) => Registered::Accepted(parked, stream),
                    Ok(None) => {
                        st.pending = 0;
                        st.waiters.push_back(parked);
                        self.arm_locked(&mut st);
                        Registered::Queued
                    }
                    Err(e) => Registered::Failed(parked, e),
                }
            } else {
                st.waiters.push_back(parked);
                if st.pending < 0 {
                    let backlog = -st.pending;
                    let sock = st.sock.as_ref().expect("open listener has a socket");
                    match sock.listen(backlog) {
                        Ok(()) => {
                            st.pending = 0;
                            self.arm_locked(&mut st);
                            Registered::Queued
                        }
                        Err(e) => {
                            let parked = st.waiters.pop_back().expect("just pushed");
                            Registered::Failed(parked, OsError::from_io(&e))
                        }
                    }
                } else {
                    self.arm_locked(&mut st);
                    Registered::Queued
                }
            }
        };
        match outcome {
            Registered::Queued => {}
            Registered::Accepted(parked, stream) => {
                if parked.flag.claim() {
                    parked.accepted(stream);
                } else {
                    // Cancellation owns the waiter; keep both findable.
                    let mut st = self.inner.st.lock();
                    st.stash.push_back(stream);
                    st.waiters.push_back(parked);
                }
            }
            Registered::Failed(parked, error) => {
                if parked.flag.claim() {
                    parked.failed(error);
                } else {
                    self.inner.st.lock().waiters.push_back(parked);
                }
            }
        }
    }

    /// Attaches the stop guard to a still-parked accept.
    pub(crate) fn attach_guard(&self, id: u64, guard: StopGuard) {
        let mut st = self.inner.st.lock();
        if let Some(parked) = st.waiters.iter_mut().find(|p| p.id == id) {
            parked.guard = Some(guard);
        }
    }

    /// Unlinks a parked accept for its stop operation.
    pub(crate) fn cancel_accept(&self, id: u64) -> Option<AcceptParked> {
        let mut st = self.inner.st.lock();
        let pos = st.waiters.iter().position(|p| p.id == id)?;
        st.waiters.remove(pos)
    }

    fn arm_locked(&self, st: &mut ListenerSt) {
        if st.armed {
            return;
        }
        let Some(sock) = st.sock.as_ref() else {
            return;
        };
        let fd = sock.as_raw_fd();
        match st.watch_id {
            Some(id) => {
                if let Some(key) = self.inner.lp.io.lock().key_of(id) {
                    let _ = self
                        .inner
                        .lp
                        .poller
                        .rearm(fd, Interest::Readable, key.to_usize());
                    st.armed = true;
                }
            }
            None => {
                let id = next_io_id();
                let key = self.inner.lp.io.lock().insert(IoEntry {
                    id,
                    fd,
                    flag: Arc::new(OnceFlag::new()),
                    guard: None,
                    handler: Box::new(ListenerReady {
                        listener: self.clone(),
                    }),
                });
                match self
                    .inner
                    .lp
                    .poller
                    .register(fd, Interest::Readable, key.to_usize())
                {
                    Ok(()) => {
                        st.watch_id = Some(id);
                        st.armed = true;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, fd, "failed to watch listener");
                        let _ = self.inner.lp.io.lock().remove_key(key);
                    }
                }
            }
        }
    }
}

fn try_accept(sock: &Socket) -> Result<Option<TcpStream>, OsError> {
    loop {
        match sock.accept() {
            Ok((conn, _peer)) => {
                conn.set_nonblocking(true)
                    .map_err(|e| OsError::from_io(&e))?;
                return Ok(Some(conn.into()));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            // Per-connection failures are skipped, as the connection
            // callback skips error statuses.
            Err(e)
                if e.kind() == io::ErrorKind::Interrupted
                    || e.raw_os_error() == Some(libc::ECONNABORTED) => {}
            Err(e) => return Err(OsError::from_io(&e)),
        }
    }
}

/// Readiness watcher for a listening socket: completes parked acceptors,
/// or records positive `pending` when none wait.
struct ListenerReady {
    listener: TcpListener,
}

impl ReadyHandler for ListenerReady {
    fn ready(self: Box<Self>, _lp: &Arc<LoopShared>) -> AfterReady {
        let mut completions: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
        let inner = self.listener.inner.clone();
        let outcome = {
            let mut st = inner.st.lock();
            loop {
                if st.closed {
                    st.armed = false;
                    break AfterReady::Park(self);
                }
                if !st.has_claimable() {
                    st.pending = st.pending.max(1);
                    st.armed = false;
                    break AfterReady::Park(self);
                }
                let sock = st.sock.as_ref().expect("open listener has a socket");
                match try_accept(sock) {
                    Ok(Some(stream)) => match st.take_claimable() {
                        Some(parked) => {
                            completions.push(Box::new(move || parked.accepted(stream)));
                        }
                        None => {
                            st.stash.push_back(stream);
                            st.armed = false;
                            break AfterReady::Park(self);
                        }
                    },
                    Ok(None) => break AfterReady::Rearm(self, Interest::Readable),
                    Err(e) => {
                        if let Some(parked) = st.take_claimable() {
                            completions.push(Box::new(move || parked.failed(e)));
                        }
                        break AfterReady::Rearm(self, Interest::Readable);
                    }
                }
            }
        };
        for complete in completions {
            complete();
        }
        outcome
    }

    fn cancelled(self: Box<Self>) {}

    fn aborted(self: Box<Self>) {}
}

impl CloseableResource for TcpListener {
    fn shared(&self) -> Arc<LoopShared> {
        self.inner.lp.clone()
    }

    fn close_now(&self) {
        let (sock, drained, watch_id) = {
            let mut st = self.inner.st.lock();
            assert!(!st.closed, "tcp listener closed twice");
            st.closed = true;
            let sock = st.sock.take();
            st.stash.clear();
            // Claimed waiters stay queued: their stop operations own them.
            let mut drained = Vec::new();
            let mut kept = VecDeque::new();
            for parked in st.waiters.drain(..) {
                if parked.flag.claim() {
                    drained.push(parked);
                } else {
                    kept.push_back(parked);
                }
            }
            st.waiters = kept;
            st.armed = false;
            (sock, drained, st.watch_id.take())
        };
        if let Some(id) = watch_id {
            let _ = self.inner.lp.io.lock().remove_id(id);
        }
        if let Some(sock) = &sock {
            self.inner.lp.poller.forget(sock.as_raw_fd());
        }
        drop(sock);
        self.inner.lp.handles.fetch_sub(1, Ordering::AcqRel);
        for parked in drained {
            parked.failed(OsError::new(OsErrc::OperationCanceled));
        }
    }
}

impl AsyncValue for TcpListener {}

impl AsyncDrop for TcpListener {
    type Dropper = CloseSender<TcpListener>;

    fn async_drop(this: Arc<Self>) -> Self::Dropper {
        CloseSender::new((*this).clone())
    }
}

impl BoundResource for TcpListener {
    fn bind_endpoint(scheduler: &Scheduler, endpoint: &Endpoint) -> Result<Self, OsError> {
        Self::bind_shared(scheduler.shared().clone(), endpoint, DEFAULT_BACKLOG)
    }
}

impl Acceptor for TcpListener {
    type Socket = TcpSocket;
    type Accept = AcceptSender;

    fn make_socket(&self) -> TcpSocket {
        TcpSocket::from_shared(self.inner.lp.clone())
    }

    fn accept_into(&self, socket: &TcpSocket) -> AcceptSender {
        self.accept(socket)
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.st.lock();
        f.debug_struct("TcpListener")
            .field("pending", &st.pending)
            .field("waiters", &st.waiters.len())
            .finish()
    }
}
