//! UDP datagram sockets.

use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Socket, Type};

use crate::algorithms::close::CloseableResource;
use crate::algorithms::{
    AsyncDrop, AsyncValue, BoundResource, CloseSender, ReceiveFromSender, SendToSender,
};
use crate::error::OsError;
use crate::event_loop::{EventLoop, LoopShared, Scheduler};
use crate::net::addr::Endpoint;

enum UdpState {
    Open(StdUdpSocket),
    Closed,
}

struct UdpSt {
    state: UdpState,
    parked: Option<u64>,
}

pub(crate) struct UdpInner {
    lp: Arc<LoopShared>,
    st: Mutex<UdpSt>,
}

/// A UDP socket bound to one loop.
///
/// Created bound (eagerly fallible); must be closed exactly once before
/// its loop is dropped.
#[derive(Clone)]
pub struct UdpSocket {
    inner: Arc<UdpInner>,
}

impl UdpSocket {
    /// Binds a datagram socket to `endpoint`.
    ///
    /// # Errors
    ///
    /// Surfaces the OS error from socket creation or bind.
    pub fn bind(lp: &EventLoop, endpoint: impl Into<Endpoint>) -> Result<Self, OsError> {
        Self::bind_shared(lp.shared().clone(), &endpoint.into())
    }

    pub(crate) fn bind_shared(
        lp: Arc<LoopShared>,
        endpoint: &Endpoint,
    ) -> Result<Self, OsError> {
        let sock = Socket::new(endpoint.domain(), Type::DGRAM, None)
            .map_err(|e| OsError::from_io(&e))?;
        sock.set_nonblocking(true)
            .map_err(|e| OsError::from_io(&e))?;
        sock.bind(&endpoint.socket_addr().into())
            .map_err(|e| OsError::from_io(&e))?;
        lp.handles.fetch_add(1, Ordering::AcqRel);
        Ok(Self {
            inner: Arc::new(UdpInner {
                lp,
                st: Mutex::new(UdpSt {
                    state: UdpState::Open(sock.into()),
                    parked: None,
                }),
            }),
        })
    }

    /// Sender transmitting one datagram to `peer`.
    pub fn send_to<B>(&self, buf: B, peer: impl Into<Endpoint>) -> SendToSender<B>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        SendToSender::new(self.clone(), buf, peer.into())
    }

    /// Sender delivering `(buffer, bytes_read, peer)` for one datagram.
    pub fn receive_from<B>(&self, buf: B) -> ReceiveFromSender<B>
    where
        B: AsMut<[u8]> + Send + 'static,
    {
        ReceiveFromSender::new(self.clone(), buf)
    }

    /// Sender closing the socket. Closing twice panics.
    #[must_use]
    pub fn close(&self) -> CloseSender<UdpSocket> {
        CloseSender::new(self.clone())
    }

    pub(crate) fn shared(&self) -> Arc<LoopShared> {
        self.inner.lp.clone()
    }

    pub(crate) fn send_to_at(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        let st = self.inner.st.lock();
        match &st.state {
            UdpState::Open(sock) => sock.send_to(buf, peer),
            UdpState::Closed => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    pub(crate) fn recv_from_at(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let st = self.inner.st.lock();
        match &st.state {
            UdpState::Open(sock) => sock.recv_from(buf),
            UdpState::Closed => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    pub(crate) fn fd(&self) -> Option<RawFd> {
        let st = self.inner.st.lock();
        match &st.state {
            UdpState::Open(sock) => Some(sock.as_raw_fd()),
            UdpState::Closed => None,
        }
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

impl CloseableResource for UdpSocket {
    fn shared(&self) -> Arc<LoopShared> {
        self.inner.lp.clone()
    }

    fn close_now(&self) {
        let (state, parked) = {
            let mut st = self.inner.st.lock();
            let state = std::mem::replace(&mut st.state, UdpState::Closed);
            (state, st.parked.take())
        };
        assert!(
            !matches!(state, UdpState::Closed),
            "udp socket closed twice"
        );
        let aborted = parked.and_then(|id| self.inner.lp.io.lock().remove_id(id));
        if let UdpState::Open(sock) = &state {
            self.inner.lp.poller.forget(sock.as_raw_fd());
        }
        drop(state);
        self.inner.lp.handles.fetch_sub(1, Ordering::AcqRel);
        if let Some(entry) = aborted {
            drop(entry.guard);
            entry.handler.aborted();
        }
    }
}

impl AsyncValue for UdpSocket {}

impl AsyncDrop for UdpSocket {
    type Dropper = CloseSender<UdpSocket>;

    fn async_drop(this: Arc<Self>) -> Self::Dropper {
        CloseSender::new((*this).clone())
    }
}

impl BoundResource for UdpSocket {
    fn bind_endpoint(scheduler: &Scheduler, endpoint: &Endpoint) -> Result<Self, OsError> {
        Self::bind_shared(scheduler.shared().clone(), endpoint)
    }
}

impl std::fmt::Debug for UdpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.st.lock();
        let state = match &st.state {
            UdpState::Open(_) => "open",
            UdpState::Closed => "closed",
        };
        f.debug_struct("UdpSocket").field("state", &state).finish()
    }
}
