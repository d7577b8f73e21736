//! Algorithm adaptors: the senders that lift loop and socket operations
//! into the sender model, plus the higher-order scoped-resource adaptors.

pub mod accept;
pub mod accept_from;
pub mod async_value;
pub mod bind_to;
pub mod close;
pub mod connect;
pub mod connect_to;
pub mod read_until;
pub mod receive;
pub mod schedule;
pub mod send;
pub mod shutdown;

pub use accept::AcceptSender;
pub use accept_from::{accept_from, AcceptFrom, Acceptor};
pub use async_value::{async_value, AsyncDrop, AsyncValue, Scoped};
pub use bind_to::{bind_to, BindTo, BoundResource};
pub use close::CloseSender;
pub use connect::{connect, ConnectSender};
pub use connect_to::{connect_to, ConnectResource, ConnectTo};
pub use read_until::{read_until, ReadUntilSender};
pub use receive::{receive, receive_from, ReceiveFromSender, ReceiveSender};
pub use schedule::{ScheduleSender, SignalSender, TimedSender};
pub use send::{send, send_to, SendSender, SendToSender};
pub use shutdown::ShutdownSender;
