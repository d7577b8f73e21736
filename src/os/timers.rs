//! Millisecond timer heap.
//!
//! Deadlines live in a binary heap; entry state lives in a map keyed by
//! timer id so cancellation is O(1) with lazy heap deletion. An entry whose
//! once-flag was claimed by the stop path stays in the map for the stop
//! operation to consume — firing must never race a pending cancellation
//! into a double completion.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use crate::event_loop::clock::LoopInstant;
use crate::event_loop::op::OnceFlag;
use crate::stop::StopGuard;

/// Completion half of a parked timed operation.
pub(crate) trait TimerComplete: Send + 'static {
    fn fire(self: Box<Self>);
    fn stopped(self: Box<Self>);
}

pub(crate) struct TimerEntry {
    pub(crate) flag: Arc<OnceFlag>,
    pub(crate) guard: Option<StopGuard>,
    pub(crate) complete: Box<dyn TimerComplete>,
}

impl TimerEntry {
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
pub(crate) struct TimerTable {
    heap: BinaryHeap<Reverse<(u64, u64)>>,
    entries: HashMap<u64, TimerEntry>,
    next_id: u64,
}

impl TimerTable {
    pub(crate) fn insert(
        &mut self,
        deadline: LoopInstant,
        flag: Arc<OnceFlag>,
        complete: Box<dyn TimerComplete>,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(
            id,
            TimerEntry {
                flag,
                guard: None,
                complete,
            },
        );
        self.heap.push(Reverse((deadline.as_millis(), id)));
        id
    }

    pub(crate) fn attach_guard(&mut self, id: u64, guard: StopGuard) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.guard = Some(guard);
        }
    }

    /// Removes a timer for its stop operation.
    pub(crate) fn cancel(&mut self, id: u64) -> Option<TimerEntry> {
        self.entries.remove(&id)
    }

    /// Pops one due, unclaimed timer, claiming its flag. Entries claimed by
    /// the stop path are left in the map; stale heap nodes are discarded.
    pub(crate) fn pop_due(&mut self, now: LoopInstant) -> Option<TimerEntry> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now.as_millis() {
                return None;
            }
            self.heap.pop();
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            if entry.flag.claim() {
                return self.entries.remove(&id);
            }
            // Claimed by cancellation; its stop op owns the entry now.
        }
        None
    }

    /// Earliest deadline among live timers.
    pub(crate) fn next_deadline(&mut self) -> Option<LoopInstant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.entries.contains_key(&id) {
                return Some(LoopInstant::from_millis(deadline));
            }
            self.heap.pop();
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<TimerEntry> {
        self.heap.clear();
        self.entries.drain().map(|(_, e)| e).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe {
        fired: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    impl TimerComplete for Probe {
        fn fire(self: Box<Self>) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }

        fn stopped(self: Box<Self>) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn probe() -> (Arc<AtomicUsize>, Arc<AtomicUsize>, Box<Probe>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let p = Box::new(Probe {
            fired: fired.clone(),
            stopped: stopped.clone(),
        });
        (fired, stopped, p)
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut table = TimerTable::default();
        let (fired_a, _, a) = probe();
        let (fired_b, _, b) = probe();
        table.insert(LoopInstant::from_millis(20), Arc::new(OnceFlag::new()), b);
        table.insert(LoopInstant::from_millis(10), Arc::new(OnceFlag::new()), a);

        let now = LoopInstant::from_millis(15);
        table.pop_due(now).unwrap().fire();
        assert_eq!(fired_a.load(Ordering::SeqCst), 1);
        assert!(table.pop_due(now).is_none());

        table.pop_due(LoopInstant::from_millis(20)).unwrap().fire();
        assert_eq!(fired_b.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn claimed_timer_is_left_for_the_stop_op() {
        let mut table = TimerTable::default();
        let flag = Arc::new(OnceFlag::new());
        let (fired, stopped, p) = probe();
        let id = table.insert(LoopInstant::from_millis(0), flag.clone(), p);

        assert!(flag.claim());
        assert!(table.pop_due(LoopInstant::from_millis(5)).is_none());
        table.cancel(id).unwrap().stopped();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn next_deadline_skips_cancelled_entries() {
        let mut table = TimerTable::default();
        let (_, _, a) = probe();
        let (_, _, b) = probe();
        let id = table.insert(LoopInstant::from_millis(5), Arc::new(OnceFlag::new()), a);
        table.insert(LoopInstant::from_millis(9), Arc::new(OnceFlag::new()), b);
        table.cancel(id);
        assert_eq!(table.next_deadline(), Some(LoopInstant::from_millis(9)));
    }
}
