//! Typed network resources: endpoints, stream sockets, listeners, and
//! datagram sockets.
//!
//! A resource binds exactly one OS socket to one loop. Handles are cheap
//! clones of a shared inner; algorithms borrow them and the shared inner
//! keeps the socket alive until its asynchronous close runs. Every open
//! resource must be closed exactly once before its loop is dropped.

pub mod addr;
pub mod listener;
pub mod tcp;
pub mod udp;

pub use addr::{Endpoint, Ipv4Endpoint, Ipv6Endpoint};
pub use listener::TcpListener;
pub use tcp::TcpSocket;
pub use udp::UdpSocket;
