//! TCP stream sockets.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Socket, Type};

use crate::algorithms::close::CloseableResource;
use crate::algorithms::{
    AsyncDrop, AsyncValue, CloseSender, ConnectResource, ConnectSender, ReadUntilSender,
    ReceiveSender, SendSender, ShutdownSender,
};
use crate::error::{OsErrc, OsError};
use crate::event_loop::{EventLoop, LoopShared, Scheduler};
use crate::net::addr::Endpoint;

pub(crate) enum StreamState {
    /// Created, no descriptor yet (an accept or connect will open one).
    Vacant,
    /// Non-blocking connect in flight.
    Connecting(Socket),
    /// Connected stream.
    Stream(TcpStream),
    Closed,
}

impl StreamState {
    fn raw_fd(&self) -> Option<RawFd> {
        match self {
            Self::Vacant | Self::Closed => None,
            Self::Connecting(sock) => Some(sock.as_raw_fd()),
            Self::Stream(stream) => Some(stream.as_raw_fd()),
        }
    }
}

pub(crate) struct StreamInner {
    lp: Arc<LoopShared>,
    st: Mutex<StreamSt>,
}

struct StreamSt {
    state: StreamState,
    /// Id of the operation currently parked on this socket, if any.
    parked: Option<u64>,
}

/// Outcome of starting a non-blocking connect.
pub(crate) enum ConnectProgress {
    Done,
    InFlight(RawFd),
}

/// A TCP stream socket bound to one loop.
///
/// Handles are cheap clones of a shared inner. The socket must be closed
/// exactly once before its loop is dropped; all I/O goes through the
/// algorithm senders the methods below build.
#[derive(Clone)]
pub struct TcpSocket {
    inner: Arc<StreamInner>,
}

impl TcpSocket {
    /// Creates an unopened socket on `lp`. The descriptor is created by
    /// `connect` or by an accept.
    #[must_use]
    pub fn new(lp: &EventLoop) -> Self {
        Self::from_shared(lp.shared().clone())
    }

    pub(crate) fn from_shared(lp: Arc<LoopShared>) -> Self {
        lp.handles.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::new(StreamInner {
                lp,
                st: Mutex::new(StreamSt {
                    state: StreamState::Vacant,
                    parked: None,
                }),
            }),
        }
    }

    /// Sender connecting this socket to `endpoint`.
    pub fn connect(&self, endpoint: impl Into<Endpoint>) -> ConnectSender {
        ConnectSender::new(self.clone(), endpoint.into())
    }

    /// Sender shutting down the write side.
    #[must_use]
    pub fn shutdown(&self) -> ShutdownSender {
        ShutdownSender::new(self.clone())
    }

    /// Sender writing the whole buffer.
    pub fn send<B>(&self, buf: B) -> SendSender<B>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        SendSender::new(self.clone(), buf)
    }

    /// Alias of [`send`](Self::send) in stream vocabulary.
    pub fn write_some<B>(&self, buf: B) -> SendSender<B>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        self.send(buf)
    }

    /// Sender delivering `(buffer, bytes_read)` for the first chunk the
    /// kernel produces; zero bytes at end of stream.
    pub fn receive<B>(&self, buf: B) -> ReceiveSender<B>
    where
        B: AsMut<[u8]> + Send + 'static,
    {
        ReceiveSender::new(self.clone(), buf)
    }

    /// Alias of [`receive`](Self::receive) in stream vocabulary.
    pub fn read_some<B>(&self, buf: B) -> ReceiveSender<B>
    where
        B: AsMut<[u8]> + Send + 'static,
    {
        self.receive(buf)
    }

    /// Sender reading until `condition(bytes_last_read)` returns true,
    /// delivering `(buffer, total_bytes_read)`.
    pub fn read_until<B, F>(&self, buf: B, condition: F) -> ReadUntilSender<B, F>
    where
        B: AsMut<[u8]> + Send + 'static,
        F: FnMut(usize) -> bool + Send + 'static,
    {
        ReadUntilSender::new(self.clone(), buf, condition)
    }

    /// Sender closing the socket. Closing twice panics.
    #[must_use]
    pub fn close(&self) -> CloseSender<TcpSocket> {
        CloseSender::new(self.clone())
    }

    pub(crate) fn shared(&self) -> Arc<LoopShared> {
        self.inner.lp.clone()
    }

    /// Installs an accepted stream. The socket must be vacant.
    pub(crate) fn install_stream(&self, stream: TcpStream) {
        let mut st = self.inner.st.lock();
        assert!(
            matches!(st.state, StreamState::Vacant),
            "accept into a socket that is already open"
        );
        st.state = StreamState::Stream(stream);
    }

    /// Creates the descriptor if needed and starts a non-blocking connect.
    pub(crate) fn start_connect(&self, endpoint: &Endpoint) -> Result<ConnectProgress, OsError> {
        let mut st = self.inner.st.lock();
        match &st.state {
            StreamState::Vacant => {}
            StreamState::Stream(_) | StreamState::Connecting(_) => {
                return Err(OsError::new(OsErrc::AlreadyConnected))
            }
            StreamState::Closed => return Err(OsError::new(OsErrc::BadFileDescriptor)),
        }
        let sock = Socket::new(endpoint.domain(), Type::STREAM, None)
            .map_err(|e| OsError::from_io(&e))?;
        sock.set_nonblocking(true).map_err(|e| OsError::from_io(&e))?;
        match sock.connect(&endpoint.socket_addr().into()) {
            Ok(()) => {
                st.state = StreamState::Stream(sock.into());
                Ok(ConnectProgress::Done)
            }
            Err(e)
                if e.raw_os_error() == Some(libc::EINPROGRESS)
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                let fd = sock.as_raw_fd();
                st.state = StreamState::Connecting(sock);
                Ok(ConnectProgress::InFlight(fd))
            }
            Err(e) => {
                // Keep the descriptor so the caller's close retires it.
                st.state = StreamState::Connecting(sock);
                Err(OsError::from_io(&e))
            }
        }
    }

    /// Resolves an in-flight connect after a writability notification.
    pub(crate) fn finish_connect(&self) -> Result<(), OsError> {
        let mut st = self.inner.st.lock();
        let state = std::mem::replace(&mut st.state, StreamState::Vacant);
        match state {
            StreamState::Connecting(sock) => match sock.take_error() {
                Ok(None) => {
                    st.state = StreamState::Stream(sock.into());
                    Ok(())
                }
                Ok(Some(e)) => {
                    let err = OsError::from_io(&e);
                    st.state = StreamState::Connecting(sock);
                    Err(err)
                }
                Err(e) => {
                    let err = OsError::from_io(&e);
                    st.state = StreamState::Connecting(sock);
                    Err(err)
                }
            },
            other => {
                st.state = other;
                Err(OsError::new(OsErrc::NotConnected))
            }
        }
    }

    pub(crate) fn read_at(&self, buf: &mut [u8]) -> io::Result<usize> {
        let st = self.inner.st.lock();
        match &st.state {
            StreamState::Stream(stream) => (&*stream).read(buf),
            _ => Err(io::Error::from_raw_os_error(libc::ENOTCONN)),
        }
    }

    pub(crate) fn write_at(&self, buf: &[u8]) -> io::Result<usize> {
        let st = self.inner.st.lock();
        match &st.state {
            StreamState::Stream(stream) => (&*stream).write(buf),
            _ => Err(io::Error::from_raw_os_error(libc::ENOTCONN)),
        }
    }

    pub(crate) fn shutdown_now(&self) -> Result<(), OsError> {
        let st = self.inner.st.lock();
        match &st.state {
            StreamState::Stream(stream) => stream
                .shutdown(std::net::Shutdown::Write)
                .map_err(|e| OsError::from_io(&e)),
            _ => Err(OsError::new(OsErrc::NotConnected)),
        }
    }

    pub(crate) fn stream_fd(&self) -> Option<RawFd> {
        self.inner.st.lock().state.raw_fd()
    }

    pub(crate) fn park(&self, id: u64) {
        self.inner.st.lock().parked = Some(id);
    }

    pub(crate) fn clear_parked(&self, id: u64) {
        let mut st = self.inner.st.lock();
        if st.parked == Some(id) {
            st.parked = None;
        }
    }
}

impl CloseableResource for TcpSocket {
    fn shared(&self) -> Arc<LoopShared> {
        self.inner.lp.clone()
    }

    fn close_now(&self) {
        let (state, parked) = {
            let mut st = self.inner.st.lock();
            let state = std::mem::replace(&mut st.state, StreamState::Closed);
            (state, st.parked.take())
        };
        assert!(
            !matches!(state, StreamState::Closed),
            "tcp socket closed twice"
        );
        let aborted = parked.and_then(|id| self.inner.lp.io.lock().remove_id(id));
        if let Some(fd) = state.raw_fd() {
            self.inner.lp.poller.forget(fd);
        }
        drop(state);
        self.inner.lp.handles.fetch_sub(1, Ordering::AcqRel);
        if let Some(entry) = aborted {
            drop(entry.guard);
            entry.handler.aborted();
        }
    }
}

impl AsyncValue for TcpSocket {}

impl AsyncDrop for TcpSocket {
    type Dropper = CloseSender<TcpSocket>;

    fn async_drop(this: Arc<Self>) -> Self::Dropper {
        CloseSender::new((*this).clone())
    }
}

impl ConnectResource for TcpSocket {
    type Connect = ConnectSender;

    fn create(scheduler: &Scheduler) -> Result<Self, OsError> {
        Ok(Self::from_shared(scheduler.shared().clone()))
    }

    fn connect_endpoint(&self, endpoint: Endpoint) -> ConnectSender {
        self.connect(endpoint)
    }
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.st.lock();
        let state = match &st.state {
            StreamState::Vacant => "vacant",
            StreamState::Connecting(_) => "connecting",
            StreamState::Stream(_) => "open",
            StreamState::Closed => "closed",
        };
        f.debug_struct("TcpSocket").field("state", &state).finish()
    }
}
