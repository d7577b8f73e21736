//! Queued operations and the at-most-once completion flag.

use std::sync::atomic::{AtomicBool, Ordering};

/// A unit of work queued onto the loop.
///
/// `apply` always runs on the loop thread and consumes the operation.
/// Operations submitted during an `apply` are drained in the next loop
/// iteration, never the current one.
pub(crate) trait Operation: Send + 'static {
    fn apply(self: Box<Self>);
}

/// Single-word claim gate shared between an operation's completion path and
/// its cancellation callback. The first claim wins; whoever loses must not
/// complete the receiver.
#[derive(Default)]
pub(crate) struct OnceFlag(AtomicBool);

impl OnceFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attempts to claim. Returns `true` exactly once.
    pub(crate) fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    /// Whether the flag has been claimed by either side.
    pub(crate) fn claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins() {
        let flag = OnceFlag::new();
        assert!(!flag.claimed());
        assert!(flag.claim());
        assert!(!flag.claim());
        assert!(flag.claimed());
    }
}
