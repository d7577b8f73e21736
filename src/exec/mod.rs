//! The sender model: lazy computations, receivers, operation states.
//!
//! A [`Sender`] is a lazy description of asynchronous work. Connecting it to
//! a [`Receiver`] yields an [`OperationState`]; starting the operation sets
//! the work in motion. Exactly one of the receiver's three completion
//! channels fires, on the loop thread: value, error, or stopped.
//!
//! Combinators (`then`, `let_value`, `finally`, [`when_any`], ...) build
//! op-states lazily: the returned state owns the child senders and the
//! receiver, and performs the nested `connect` inside `start`. Ownership
//! moves replace the placement ceremony a callback API would need.

mod adaptors;
mod boxed;
mod scope;
mod sender;
mod sync_wait;
mod when_any;

pub use adaptors::{fail, just, Fail, Finally, Just, LetValue, SenderExt, Then, UponError};
pub use boxed::{BoxReceiver, BoxSender};
pub use scope::{AsyncScope, OnEmpty};
pub use sender::{Completion, Env, OperationState, Receiver, Sender};
pub use sync_wait::sync_wait;
pub use when_any::{when_any, WhenAny};

pub(crate) use adaptors::{catch_user, Either};
