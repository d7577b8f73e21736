//! Parked I/O operations.
//!
//! When a stream operation would block, its state moves into the loop's
//! [`IoTable`] keyed by the poller token. A readiness event hands the entry
//! back to its [`ReadyHandler`], which either completes, re-arms, or — when
//! cancellation claimed the once-flag in between — parks again for the
//! pending stop operation.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::event_loop::op::{OnceFlag, Operation};
use crate::event_loop::LoopShared;
use crate::os::poller::Interest;
use crate::stop::StopGuard;
use crate::util::{Slab, SlabKey};

/// Deferred receiver completion, run after the poller registration is gone.
pub(crate) type CompleteFn = Box<dyn FnOnce() + Send>;

/// Outcome of a readiness dispatch.
pub(crate) enum AfterReady {
    /// Wait for another notification.
    Rearm(Box<dyn ReadyHandler>, Interest),
    /// Keep the entry parked without re-arming (cancellation pending or the
    /// handler waits for an external kick).
    Park(Box<dyn ReadyHandler>),
    /// The operation finished; run the completion once the registration is
    /// deleted, so continuations can re-register the same descriptor.
    Complete(CompleteFn),
}

/// One parked I/O operation.
pub(crate) trait ReadyHandler: Send + 'static {
    /// The descriptor became ready.
    fn ready(self: Box<Self>, lp: &Arc<LoopShared>) -> AfterReady;
    /// The operation's stop path won the once-flag; deliver `set_stopped`.
    fn cancelled(self: Box<Self>);
    /// The resource was closed under the operation; deliver the
    /// cancellation error.
    fn aborted(self: Box<Self>);
}

pub(crate) struct IoEntry {
    pub(crate) id: u64,
    pub(crate) fd: RawFd,
    pub(crate) flag: Arc<OnceFlag>,
    pub(crate) guard: Option<StopGuard>,
    pub(crate) handler: Box<dyn ReadyHandler>,
}

/// Allocates process-unique identifiers for parked operations.
pub(crate) fn next_io_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Table of parked I/O operations, addressable both by poller key and by
/// stable operation id (the key changes when an entry re-parks).
pub(crate) struct IoTable {
    slab: Slab<IoEntry>,
    by_id: HashMap<u64, SlabKey>,
}

impl Default for IoTable {
    fn default() -> Self {
        Self {
            slab: Slab::new(),
            by_id: HashMap::new(),
        }
    }
}

impl IoTable {
    pub(crate) fn insert(&mut self, entry: IoEntry) -> SlabKey {
        let id = entry.id;
        let key = self.slab.insert(entry);
        self.by_id.insert(id, key);
        key
    }

    pub(crate) fn remove_key(&mut self, key: SlabKey) -> Option<IoEntry> {
        let entry = self.slab.remove(key)?;
        self.by_id.remove(&entry.id);
        Some(entry)
    }

    pub(crate) fn remove_id(&mut self, id: u64) -> Option<IoEntry> {
        let key = self.by_id.remove(&id)?;
        self.slab.remove(key)
    }

    pub(crate) fn key_of(&self, id: u64) -> Option<SlabKey> {
        self.by_id.get(&id).copied()
    }

    /// Late-attaches the stop guard to a parked entry. A no-op when the
    /// entry already completed inline.
    pub(crate) fn attach_guard(&mut self, id: u64, guard: StopGuard) {
        if let Some(key) = self.by_id.get(&id) {
            if let Some(entry) = self.slab.get_mut(*key) {
                entry.guard = Some(guard);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<IoEntry> {
        self.by_id.clear();
        self.slab.drain()
    }
}

/// Cancellation operation shared by every parked stream operation: runs on
/// the loop thread after the stop callback claimed the once-flag, retires
/// the registration, and hands the entry to its `cancelled` path.
pub(crate) struct IoStopOp {
    pub(crate) shared: Arc<LoopShared>,
    pub(crate) id: u64,
}

impl Operation for IoStopOp {
    fn apply(self: Box<Self>) {
        let entry = self.shared.io.lock().remove_id(self.id);
        if let Some(entry) = entry {
            self.shared.poller.forget(entry.fd);
            drop(entry.guard);
            entry.handler.cancelled();
        }
    }
}
