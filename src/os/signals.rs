//! Signal-once plumbing.
//!
//! The hub owns a self-pipe whose read end is registered with the poller.
//! Arming a signal installs a process-wide `sigaction` whose handler writes
//! the signal number to the pipe (the only async-signal-safe thing it
//! does); the loop drains the pipe and completes the parked waiters. The
//! previous disposition is restored when the last waiter for a signal
//! goes away.

// sigaction and the self-pipe need unsafe; every block carries its
// SAFETY argument.
#![allow(unsafe_code)]

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{OsErrc, OsError};
use crate::event_loop::op::OnceFlag;
use crate::stop::StopGuard;

/// Poller key reserved for the hub's pipe. `usize::MAX` is the poller's own
/// notification key; stay below it.
pub(crate) const SIGNAL_PIPE_TOKEN: usize = usize::MAX - 1;

const MAX_SIGNAL: usize = 64;

/// Write ends of hub pipes, indexed by signal number. The handler reads
/// this and nothing else.
static PIPE_WRITERS: [AtomicI32; MAX_SIGNAL] = [const { AtomicI32::new(-1) }; MAX_SIGNAL];

extern "C" fn signal_trampoline(signum: libc::c_int) {
    let Ok(index) = usize::try_from(signum) else {
        return;
    };
    if index >= MAX_SIGNAL {
        return;
    }
    let fd = PIPE_WRITERS[index].load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = [signum as u8];
        // SAFETY: write(2) is async-signal-safe; the fd outlives the
        // installed disposition.
        unsafe {
            libc::write(fd, byte.as_ptr().cast(), 1);
        }
    }
}

/// Completion half of a parked signal operation.
pub(crate) trait SignalComplete: Send + 'static {
    fn fire(self: Box<Self>);
    fn stopped(self: Box<Self>);
}

pub(crate) struct SignalWaiter {
    pub(crate) id: u64,
    pub(crate) flag: Arc<OnceFlag>,
    pub(crate) guard: Option<StopGuard>,
    pub(crate) complete: Box<dyn SignalComplete>,
}

impl SignalWaiter {
    pub(crate) fn fire(self) {
        drop(self.guard);
        self.complete.fire();
    }

    pub(crate) fn stopped(self) {
        drop(self.guard);
        self.complete.stopped();
    }
}

#[derive(Default)]
struct HubState {
    waiters: HashMap<i32, Vec<SignalWaiter>>,
    saved: HashMap<i32, libc::sigaction>,
    count: usize,
}

pub(crate) struct SignalHub {
    read_fd: RawFd,
    write_fd: RawFd,
    state: Mutex<HubState>,
}

impl SignalHub {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: plain pipe2 call; fds is a valid out-array.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
            state: Mutex::new(HubState::default()),
        })
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Installs the trampoline for `signum` if this hub has not yet.
    pub(crate) fn ensure_installed(&self, signum: i32) -> Result<(), OsError> {
        if signum <= 0 || signum as usize >= MAX_SIGNAL {
            return Err(OsError::new(OsErrc::InvalidArgument));
        }
        let mut state = self.state.lock();
        if state.saved.contains_key(&signum) {
            return Ok(());
        }
        // SAFETY: sigaction with a valid handler address; the previous
        // disposition is saved and restored on teardown.
        let old = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            let handler: extern "C" fn(libc::c_int) = signal_trampoline;
            action.sa_sigaction = handler as usize;
            action.sa_flags = libc::SA_RESTART;
            let mut old: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &action, &mut old) != 0 {
                return Err(OsError::from_io(&io::Error::last_os_error()));
            }
            old
        };
        PIPE_WRITERS[signum as usize].store(self.write_fd, Ordering::Relaxed);
        state.saved.insert(signum, old);
        Ok(())
    }

    pub(crate) fn add_waiter(&self, signum: i32, waiter: SignalWaiter) {
        let mut state = self.state.lock();
        state.waiters.entry(signum).or_default().push(waiter);
        state.count += 1;
    }

    pub(crate) fn attach_guard(&self, signum: i32, id: u64, guard: StopGuard) {
        let mut state = self.state.lock();
        if let Some(waiter) = state
            .waiters
            .get_mut(&signum)
            .and_then(|v| v.iter_mut().find(|w| w.id == id))
        {
            waiter.guard = Some(guard);
        }
    }

    /// Removes one waiter for its stop operation.
    pub(crate) fn remove(&self, signum: i32, id: u64) -> Option<SignalWaiter> {
        let mut state = self.state.lock();
        let pos = state.waiters.get_mut(&signum)?.iter().position(|w| w.id == id)?;
        let waiter = state.waiters.get_mut(&signum)?.remove(pos);
        state.count -= 1;
        let is_empty = state.waiters.get(&signum).is_some_and(|v| v.is_empty());
        if is_empty {
            state.waiters.remove(&signum);
            Self::uninstall(&mut state, signum);
        }
        Some(waiter)
    }

    /// Drains the pipe and detaches every fireable waiter. The caller runs
    /// the completions with no hub lock held.
    pub(crate) fn drain(&self) -> Vec<SignalWaiter> {
        let mut buf = [0u8; 64];
        let mut seen = Vec::new();
        loop {
            // SAFETY: read(2) into a local buffer on our own pipe fd.
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n <= 0 {
                break;
            }
            for &byte in &buf[..n as usize] {
                let signum = i32::from(byte);
                if !seen.contains(&signum) {
                    seen.push(signum);
                }
            }
        }

        let mut fired = Vec::new();
        let mut state = self.state.lock();
        for signum in seen {
            let Some(waiters) = state.waiters.remove(&signum) else {
                continue;
            };
            let mut kept = Vec::new();
            for waiter in waiters {
                if waiter.flag.claim() {
                    state.count -= 1;
                    fired.push(waiter);
                } else {
                    // Cancellation already claimed it; the stop op finishes.
                    kept.push(waiter);
                }
            }
            if kept.is_empty() {
                Self::uninstall(&mut state, signum);
            } else {
                state.waiters.insert(signum, kept);
            }
        }
        fired
    }

    pub(crate) fn waiting(&self) -> usize {
        self.state.lock().count
    }

    fn uninstall(state: &mut HubState, signum: i32) {
        if let Some(old) = state.saved.remove(&signum) {
            PIPE_WRITERS[signum as usize].store(-1, Ordering::Relaxed);
            // SAFETY: restores the disposition saved at install time.
            unsafe {
                libc::sigaction(signum, &old, std::ptr::null_mut());
            }
        }
    }
}

impl Drop for SignalHub {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        let installed: Vec<i32> = state.saved.keys().copied().collect();
        for signum in installed {
            Self::uninstall(&mut state, signum);
        }
        drop(state);
        // SAFETY: closing our own pipe fds exactly once.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}
