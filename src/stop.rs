//! Cooperative cancellation: stop sources, tokens, and callback guards.
//!
//! A [`StopSource`] owns the stop state; [`StopToken`]s observe it. An
//! operation installs a callback with [`StopToken::on_stop`] after arming its
//! OS request; the callback runs on the thread that calls
//! [`StopSource::request_stop`] and typically claims the op's once-flag and
//! schedules a cancellation operation onto the loop. Dropping the returned
//! [`StopGuard`] deregisters the callback, so a callback can never outlive
//! the operation that installed it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct StopState {
    stopped: AtomicBool,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

/// Owner of a stop state. Cloning shares the state.
#[derive(Clone, Default)]
pub struct StopSource {
    state: Arc<StopState>,
}

impl StopSource {
    /// Creates a fresh, unstopped source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Returns `true` on the first request.
    ///
    /// Registered callbacks run on the calling thread, in registration
    /// order, before this returns.
    pub fn request_stop(&self) -> bool {
        let callbacks = {
            let mut guard = self.state.callbacks.lock();
            if self.state.stopped.swap(true, Ordering::SeqCst) {
                return false;
            }
            std::mem::take(&mut *guard)
        };
        for (_, callback) in callbacks {
            callback();
        }
        true
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// A token observing this source.
    #[must_use]
    pub fn token(&self) -> StopToken {
        StopToken {
            state: Some(self.state.clone()),
        }
    }
}

/// Observer handle for a stop state.
#[derive(Clone, Default)]
pub struct StopToken {
    state: Option<Arc<StopState>>,
}

impl StopToken {
    /// A token that can never be stopped.
    #[must_use]
    pub fn never() -> Self {
        Self { state: None }
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.stopped.load(Ordering::SeqCst))
    }

    /// Registers a callback to run when stop is requested.
    ///
    /// If stop was already requested, `f` runs immediately on this thread
    /// and the returned guard is inert. Dropping the guard deregisters the
    /// callback if it has not run yet.
    pub fn on_stop<F>(&self, f: F) -> StopGuard
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(state) = &self.state else {
            return StopGuard::inert();
        };
        {
            let mut callbacks = state.callbacks.lock();
            if !state.stopped.load(Ordering::SeqCst) {
                let id = state.next_id.fetch_add(1, Ordering::Relaxed);
                callbacks.push((id, Box::new(f)));
                return StopGuard {
                    state: Some(Arc::downgrade(state)),
                    id,
                };
            }
        }
        // Already stopped: run inline, outside the lock.
        f();
        StopGuard::inert()
    }
}

/// Deregistration guard returned by [`StopToken::on_stop`].
pub struct StopGuard {
    state: Option<Weak<StopState>>,
    id: u64,
}

impl StopGuard {
    fn inert() -> Self {
        Self { state: None, id: 0 }
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(state) = self.state.take().and_then(|w| w.upgrade()) {
            state.callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn first_request_wins() {
        let source = StopSource::new();
        assert!(source.request_stop());
        assert!(!source.request_stop());
        assert!(source.stop_requested());
    }

    #[test]
    fn callback_runs_on_request() {
        let source = StopSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let guard = source.token().on_stop({
            let hits = hits.clone();
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });
        source.request_stop();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        drop(guard);
    }

    #[test]
    fn callback_runs_inline_when_already_stopped() {
        let source = StopSource::new();
        source.request_stop();
        let hits = Arc::new(AtomicUsize::new(0));
        let _guard = source.token().on_stop({
            let hits = hits.clone();
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_guard_deregisters() {
        let source = StopSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let guard = source.token().on_stop({
            let hits = hits.clone();
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(guard);
        source.request_stop();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn never_token_is_inert() {
        let token = StopToken::never();
        assert!(!token.stop_requested());
        let _guard = token.on_stop(|| panic!("must not run"));
    }
}
