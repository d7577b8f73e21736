//! loopexec: a single-threaded event loop coupled to a structured,
//! cancellable sender model.
//!
//! # Overview
//!
//! Work is described as composable *senders* — lazy computations that do
//! nothing until connected to a *receiver* and started. The resulting
//! *operation state* owns everything one start-to-completion lifecycle
//! needs; suspended I/O transfers that ownership to the loop and gets it
//! back at the readiness callback or at cancellation, whichever claims the
//! operation first.
//!
//! # Core Guarantees
//!
//! - **At-most-once completion**: every operation completes exactly one of
//!   value / error / stopped, on the loop thread
//! - **Cooperative cancellation**: stop requests claim an atomic flag and
//!   are processed on the loop thread; cancellation is never an error
//! - **Runner hand-off**: many threads may `sync_wait` concurrently; at
//!   most one drives the loop and ownership is handed off, never lost
//! - **Scoped resources**: `bind_to` / `connect_to` / `accept_from` /
//!   `async_value` retire their resource exactly once on every exit path
//!
//! # Example
//!
//! ```no_run
//! use loopexec::{EventLoop, SenderExt};
//!
//! let lp = EventLoop::new().unwrap();
//! let sched = lp.scheduler();
//! let greeting = sched.schedule().then(|()| "hello");
//! let out = lp.sync_wait(greeting).unwrap();
//! assert_eq!(out, Some("hello"));
//! ```
//!
//! # Module Structure
//!
//! - [`exec`]: the sender/receiver/op-state model and its combinators
//! - [`event_loop`]: the loop, its scheduler handle, and the runner
//!   hand-off protocol
//! - [`net`]: endpoints, TCP sockets and listeners, UDP sockets
//! - [`algorithms`]: the senders lifting loop and socket operations,
//!   including the scoped-resource adaptors
//! - [`pipe`]: closure-style piping of algorithms onto senders
//! - [`error`]: the closed OS error domain
//! - [`stop`]: stop sources, tokens, and callback guards

// Unsafe is confined to the OS adaptor: `os::poller` and `os::signals`
// carry scoped `allow(unsafe_code)` carve-outs for the raw syscall layer.
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod algorithms;
pub mod error;
pub mod event_loop;
pub mod exec;
pub mod net;
pub mod pipe;
pub mod stop;

mod os;
mod util;

pub use algorithms::{
    accept_from, async_value, bind_to, connect, connect_to, read_until, receive, receive_from,
    send, send_to, AcceptSender, Acceptor, AsyncDrop, AsyncValue, BoundResource, CloseSender,
    ConnectResource, ConnectSender, ReadUntilSender, ReceiveFromSender, ReceiveSender,
    ScheduleSender, SendSender, SendToSender, ShutdownSender, SignalSender, TimedSender,
};
pub use error::{Error, OsErrc, OsError, PanicPayload};
pub use event_loop::{EventLoop, LoopInstant, Scheduler};
pub use exec::{
    fail, just, sync_wait, when_any, AsyncScope, BoxReceiver, BoxSender, Completion, Env,
    OperationState, Receiver, Sender, SenderExt,
};
pub use net::{Endpoint, Ipv4Endpoint, Ipv6Endpoint, TcpListener, TcpSocket, UdpSocket};
pub use pipe::SenderClosure;
pub use stop::{StopGuard, StopSource, StopToken};
