//! OS adaptor: the readiness poller, timer heap, and signal plumbing the
//! loop drives. Everything here is loop-internal; the public surface is the
//! resource and algorithm layer above.

pub(crate) mod io;
pub(crate) mod poller;
pub(crate) mod signals;
pub(crate) mod timers;
