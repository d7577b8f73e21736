//! Core traits of the sender model.

use crate::error::Error;
use crate::event_loop::Scheduler;
use crate::stop::StopToken;

/// The downstream continuation of a sender.
///
/// Each of the three completion methods consumes the receiver; the contract
/// is that exactly one of them is invoked, on the loop thread.
pub trait Receiver: Send + 'static {
    /// Payload of the value channel.
    type Value: Send + 'static;

    /// Successful completion.
    fn set_value(self, value: Self::Value);
    /// Failure completion. OS errors and captured panics both land here.
    fn set_error(self, error: Error);
    /// Cancellation completion. Never an error.
    fn set_stopped(self);

    /// The receiver's environment: stop token and (optionally) the
    /// scheduler the chain runs on.
    fn env(&self) -> Env;
}

/// The resources realizing one started sender. `start` consumes the state;
/// suspended work transfers ownership to the event loop.
pub trait OperationState: Send {
    /// Sets the operation in motion. May be called from any thread.
    fn start(self);
}

/// A lazy asynchronous computation.
pub trait Sender: Send + 'static {
    /// Payload delivered on the value channel.
    type Value: Send + 'static;

    /// Binds the sender to a receiver, producing the operation state.
    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = Self::Value>;
}

/// Queryable environment flowing up from a receiver.
#[derive(Clone, Default)]
pub struct Env {
    stop: StopToken,
    scheduler: Option<Scheduler>,
}

impl Env {
    /// Environment with the given scheduler and an unstoppable token.
    #[must_use]
    pub fn with_scheduler(scheduler: Scheduler) -> Self {
        Self {
            stop: StopToken::never(),
            scheduler: Some(scheduler),
        }
    }

    /// Replaces the stop token.
    #[must_use]
    pub fn but_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    /// The stop token operations read their cancellation state from.
    #[must_use]
    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// The scheduler the chain is bound to, when known.
    #[must_use]
    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    /// The scheduler, required. Resource adaptors call this; a chain that
    /// reaches them without a scheduler is a composition bug.
    #[must_use]
    pub fn expect_scheduler(&self) -> Scheduler {
        self.scheduler
            .clone()
            .expect("sender chain has no scheduler in its environment")
    }

    pub(crate) fn from_parts(stop: StopToken, scheduler: Option<Scheduler>) -> Self {
        Self { stop, scheduler }
    }
}

/// A materialized completion: which channel fired, with its payload.
#[derive(Debug)]
pub enum Completion<V> {
    /// The value channel.
    Value(V),
    /// The error channel.
    Error(Error),
    /// The stopped channel.
    Stopped,
}

impl<V: Send + 'static> Completion<V> {
    /// Re-delivers this completion into a receiver.
    pub fn send_to<R>(self, receiver: R)
    where
        R: Receiver<Value = V>,
    {
        match self {
            Self::Value(v) => receiver.set_value(v),
            Self::Error(e) => receiver.set_error(e),
            Self::Stopped => receiver.set_stopped(),
        }
    }
}
