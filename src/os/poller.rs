//! Readiness poller wrapper.
//!
//! Wraps [`polling::Poller`] (epoll/kqueue underneath) in one-shot mode.
//! `notify` doubles as the loop's self-wake handle: any thread may call it
//! to interrupt a blocking wait.

// Raw-descriptor registration needs unsafe; every block carries its
// SAFETY argument.
#![allow(unsafe_code)]

use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use polling::{Event, Events};

/// Readiness direction for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn to_event(self, key: usize) -> Event {
        match self {
            Self::Readable => Event::readable(key),
            Self::Writable => Event::writable(key),
        }
    }
}

pub(crate) struct Poller {
    inner: polling::Poller,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            inner: polling::Poller::new()?,
        })
    }

    /// Registers `fd` for one readiness notification.
    ///
    /// The caller guarantees the descriptor stays open until
    /// [`forget`](Self::forget); parked entries own the resource handle, so
    /// the guarantee is structural.
    pub(crate) fn register(&self, fd: RawFd, interest: Interest, key: usize) -> io::Result<()> {
        // SAFETY: fd is owned by a live resource that outlives the
        // registration (removed via `forget` before the fd closes).
        unsafe { self.inner.add(fd, interest.to_event(key)) }
    }

    /// Re-arms an existing registration for another one-shot notification.
    pub(crate) fn rearm(&self, fd: RawFd, interest: Interest, key: usize) -> io::Result<()> {
        // SAFETY: fd is open; see `register`.
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        self.inner.modify(fd, interest.to_event(key))
    }

    /// Removes a registration. Errors are ignored: the descriptor may
    /// already be gone, which is fine on this path.
    pub(crate) fn forget(&self, fd: RawFd) {
        // SAFETY: only the bit pattern is used for the epoll_ctl delete.
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        let _ = self.inner.delete(fd);
    }

    /// Wakes a blocked [`wait`](Self::wait) from any thread.
    pub(crate) fn notify(&self) {
        let _ = self.inner.notify();
    }

    pub(crate) fn wait(
        &self,
        events: &mut Events,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        self.inner.wait(events, timeout)
    }
}
