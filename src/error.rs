//! Error types for the loop and its algorithms.
//!
//! OS failures are values, not panics: every fallible operation completes its
//! receiver through the error channel with an [`OsError`] drawn from a closed
//! enumeration ([`OsErrc`]) isomorphic to the POSIX and `getaddrinfo` error
//! sets. Panics raised by user-supplied closures are caught at the boundary
//! and surface as [`Error::Panic`]; they never unwind through the event loop.

use core::fmt;
use std::any::Any;
use std::io;

/// Closed enumeration of OS-level error conditions.
///
/// The variants mirror the POSIX `errno` names plus the `getaddrinfo`
/// (`Ai*`) family. [`OsErrc::EndOfFile`] is the stream end-of-input
/// condition reported by read operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OsErrc {
    // === getaddrinfo ===
    /// Address family for node not supported (`EAI_ADDRFAMILY`).
    AiAddressFamilyNotSupported,
    /// Bad `ai_flags` value (`EAI_BADFLAGS`).
    AiBadFlags,
    /// Unknown node or service (`EAI_NONAME`).
    AiBadNode,
    /// Argument buffer overflow (`EAI_OVERFLOW`).
    AiBufferTooSmall,
    /// Non-recoverable resolution failure (`EAI_FAIL`).
    AiFailure,
    /// Family not supported for the requested node (`EAI_FAMILY`).
    AiFamilyNotSupported,
    /// Out of memory during resolution (`EAI_MEMORY`).
    AiNotEnoughMemory,
    /// No address associated with the node (`EAI_NODATA`).
    AiNoAddress,
    /// Resolution request was cancelled (`EAI_CANCELED`).
    AiRequestCancelled,
    /// Service not available for socket type (`EAI_SERVICE`).
    AiServiceNotAvailable,
    /// Socket type not supported (`EAI_SOCKTYPE`).
    AiSocketTypeNotSupported,
    /// Temporary resolution failure (`EAI_AGAIN`).
    AiTemporaryFailure,

    // === POSIX ===
    /// Address family not supported (`EAFNOSUPPORT`).
    AddressFamilyNotSupported,
    /// Address already in use (`EADDRINUSE`).
    AddressInUse,
    /// Address not available (`EADDRNOTAVAIL`).
    AddressNotAvailable,
    /// Socket is already connected (`EISCONN`).
    AlreadyConnected,
    /// Argument list too long (`E2BIG`).
    ArgumentListTooLong,
    /// Bad address (`EFAULT`).
    BadAddress,
    /// Bad file descriptor (`EBADF`).
    BadFileDescriptor,
    /// Broken pipe (`EPIPE`).
    BrokenPipe,
    /// Connection aborted (`ECONNABORTED`).
    ConnectionAborted,
    /// Connection already in progress (`EALREADY`).
    ConnectionAlreadyInProgress,
    /// Connection refused (`ECONNREFUSED`).
    ConnectionRefused,
    /// Connection reset by peer (`ECONNRESET`).
    ConnectionReset,
    /// Destination address required (`EDESTADDRREQ`).
    DestinationAddressRequired,
    /// Device or resource busy (`EBUSY`).
    DeviceOrResourceBusy,
    /// End of stream input.
    EndOfFile,
    /// File exists (`EEXIST`).
    FileExists,
    /// Host unreachable (`EHOSTUNREACH`).
    HostUnreachable,
    /// Interrupted system call (`EINTR`).
    Interrupted,
    /// Invalid argument (`EINVAL`).
    InvalidArgument,
    /// I/O error (`EIO`).
    IoError,
    /// Message too large (`EMSGSIZE`).
    MessageSize,
    /// Network is down (`ENETDOWN`).
    NetworkDown,
    /// Network unreachable (`ENETUNREACH`).
    NetworkUnreachable,
    /// No buffer space available (`ENOBUFS`).
    NoBufferSpace,
    /// No such device (`ENODEV`).
    NoSuchDevice,
    /// No such file or directory (`ENOENT`).
    NoSuchFileOrDirectory,
    /// Not a socket (`ENOTSOCK`).
    NotASocket,
    /// Socket is not connected (`ENOTCONN`).
    NotConnected,
    /// Out of memory (`ENOMEM`).
    NotEnoughMemory,
    /// Operation not supported (`ENOTSUP`).
    NotSupported,
    /// Operation cancelled (`ECANCELED`).
    OperationCanceled,
    /// Operation not permitted (`EPERM`).
    OperationNotPermitted,
    /// Permission denied (`EACCES`).
    PermissionDenied,
    /// Protocol error (`EPROTO`).
    ProtocolError,
    /// Protocol not supported (`EPROTONOSUPPORT`).
    ProtocolNotSupported,
    /// Resource temporarily unavailable (`EAGAIN`).
    ResourceUnavailableTryAgain,
    /// Result out of range (`ERANGE`).
    ResultOutOfRange,
    /// Socket type not supported (`ESOCKTNOSUPPORT`).
    SocketTypeNotSupported,
    /// Connection timed out (`ETIMEDOUT`).
    TimedOut,
    /// Too many open files (`EMFILE`).
    TooManyFilesOpen,
    /// Too many open files in system (`ENFILE`).
    TooManyFilesOpenInSystem,
    /// Transport endpoint already shut down (`ESHUTDOWN`).
    TransportEndpointShutdown,
    /// Wrong protocol type for socket (`EPROTOTYPE`).
    WrongProtocolType,
    /// Unrecognized error code.
    Unknown,
}

impl OsErrc {
    /// Maps a raw `errno` value onto the enumeration.
    #[must_use]
    pub fn from_raw(code: i32) -> Self {
        match code {
            libc::EAFNOSUPPORT => Self::AddressFamilyNotSupported,
            libc::EADDRINUSE => Self::AddressInUse,
            libc::EADDRNOTAVAIL => Self::AddressNotAvailable,
            libc::EISCONN => Self::AlreadyConnected,
            libc::E2BIG => Self::ArgumentListTooLong,
            libc::EFAULT => Self::BadAddress,
            libc::EBADF => Self::BadFileDescriptor,
            libc::EPIPE => Self::BrokenPipe,
            libc::ECONNABORTED => Self::ConnectionAborted,
            libc::EALREADY => Self::ConnectionAlreadyInProgress,
            libc::ECONNREFUSED => Self::ConnectionRefused,
            libc::ECONNRESET => Self::ConnectionReset,
            libc::EDESTADDRREQ => Self::DestinationAddressRequired,
            libc::EBUSY => Self::DeviceOrResourceBusy,
            libc::EEXIST => Self::FileExists,
            libc::EHOSTUNREACH => Self::HostUnreachable,
            libc::EINTR => Self::Interrupted,
            libc::EINVAL => Self::InvalidArgument,
            libc::EIO => Self::IoError,
            libc::EMSGSIZE => Self::MessageSize,
            libc::ENETDOWN => Self::NetworkDown,
            libc::ENETUNREACH => Self::NetworkUnreachable,
            libc::ENOBUFS => Self::NoBufferSpace,
            libc::ENODEV => Self::NoSuchDevice,
            libc::ENOENT => Self::NoSuchFileOrDirectory,
            libc::ENOTSOCK => Self::NotASocket,
            libc::ENOTCONN => Self::NotConnected,
            libc::ENOMEM => Self::NotEnoughMemory,
            libc::ENOTSUP => Self::NotSupported,
            libc::ECANCELED => Self::OperationCanceled,
            libc::EPERM => Self::OperationNotPermitted,
            libc::EACCES => Self::PermissionDenied,
            libc::EPROTO => Self::ProtocolError,
            libc::EPROTONOSUPPORT => Self::ProtocolNotSupported,
            libc::EAGAIN => Self::ResourceUnavailableTryAgain,
            libc::ERANGE => Self::ResultOutOfRange,
            libc::ESOCKTNOSUPPORT => Self::SocketTypeNotSupported,
            libc::ETIMEDOUT => Self::TimedOut,
            libc::EMFILE => Self::TooManyFilesOpen,
            libc::ENFILE => Self::TooManyFilesOpenInSystem,
            libc::ESHUTDOWN => Self::TransportEndpointShutdown,
            libc::EPROTOTYPE => Self::WrongProtocolType,
            _ => Self::Unknown,
        }
    }

    /// Human-readable message for the condition.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::AiAddressFamilyNotSupported => "address family for node not supported",
            Self::AiBadFlags => "bad ai_flags value",
            Self::AiBadNode => "unknown node or service",
            Self::AiBufferTooSmall => "argument buffer overflow",
            Self::AiFailure => "permanent failure in name resolution",
            Self::AiFamilyNotSupported => "ai_family not supported",
            Self::AiNotEnoughMemory => "out of memory during resolution",
            Self::AiNoAddress => "no address associated with node",
            Self::AiRequestCancelled => "resolution request cancelled",
            Self::AiServiceNotAvailable => "service not available for socket type",
            Self::AiSocketTypeNotSupported => "ai_socktype not supported",
            Self::AiTemporaryFailure => "temporary failure in name resolution",
            Self::AddressFamilyNotSupported => "address family not supported",
            Self::AddressInUse => "address already in use",
            Self::AddressNotAvailable => "address not available",
            Self::AlreadyConnected => "socket is already connected",
            Self::ArgumentListTooLong => "argument list too long",
            Self::BadAddress => "bad address in system call argument",
            Self::BadFileDescriptor => "bad file descriptor",
            Self::BrokenPipe => "broken pipe",
            Self::ConnectionAborted => "software caused connection abort",
            Self::ConnectionAlreadyInProgress => "connection already in progress",
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset by peer",
            Self::DestinationAddressRequired => "destination address required",
            Self::DeviceOrResourceBusy => "resource busy or locked",
            Self::EndOfFile => "end of file",
            Self::FileExists => "file already exists",
            Self::HostUnreachable => "host is unreachable",
            Self::Interrupted => "interrupted system call",
            Self::InvalidArgument => "invalid argument",
            Self::IoError => "i/o error",
            Self::MessageSize => "message too long",
            Self::NetworkDown => "network is down",
            Self::NetworkUnreachable => "network is unreachable",
            Self::NoBufferSpace => "no buffer space available",
            Self::NoSuchDevice => "no such device",
            Self::NoSuchFileOrDirectory => "no such file or directory",
            Self::NotASocket => "socket operation on non-socket",
            Self::NotConnected => "socket is not connected",
            Self::NotEnoughMemory => "not enough memory",
            Self::NotSupported => "operation not supported",
            Self::OperationCanceled => "operation canceled",
            Self::OperationNotPermitted => "operation not permitted",
            Self::PermissionDenied => "permission denied",
            Self::ProtocolError => "protocol error",
            Self::ProtocolNotSupported => "protocol not supported",
            Self::ResourceUnavailableTryAgain => "resource temporarily unavailable",
            Self::ResultOutOfRange => "result too large",
            Self::SocketTypeNotSupported => "socket type not supported",
            Self::TimedOut => "connection timed out",
            Self::TooManyFilesOpen => "too many open files",
            Self::TooManyFilesOpenInSystem => "too many open files in system",
            Self::TransportEndpointShutdown => "cannot send after transport endpoint shutdown",
            Self::WrongProtocolType => "protocol wrong type for socket",
            Self::Unknown => "unknown error",
        }
    }
}

/// An OS error: a closed condition plus the raw code it was mapped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsError {
    errc: OsErrc,
    code: i32,
}

impl OsError {
    /// Creates an error from a condition with a synthesized raw code.
    #[must_use]
    pub fn new(errc: OsErrc) -> Self {
        Self { errc, code: -1 }
    }

    /// Creates an error from a raw `errno` value.
    #[must_use]
    pub fn from_raw(code: i32) -> Self {
        Self {
            errc: OsErrc::from_raw(code),
            code,
        }
    }

    /// Maps an [`io::Error`] coming back from a system call.
    #[must_use]
    pub fn from_io(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self::from_raw(code),
            None => match err.kind() {
                io::ErrorKind::UnexpectedEof => Self::new(OsErrc::EndOfFile),
                io::ErrorKind::TimedOut => Self::new(OsErrc::TimedOut),
                _ => Self::new(OsErrc::Unknown),
            },
        }
    }

    /// The closed condition.
    #[must_use]
    pub fn errc(&self) -> OsErrc {
        self.errc
    }

    /// The integer code the condition was mapped from.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errc.message())
    }
}

impl std::error::Error for OsError {}

impl From<OsErrc> for OsError {
    fn from(errc: OsErrc) -> Self {
        Self::new(errc)
    }
}

/// Captured payload of a panic raised inside a user-supplied closure.
///
/// Only the message survives the capture; the payload itself is consumed so
/// the type stays cloneable and printable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Captures a payload produced by `catch_unwind`.
    #[must_use]
    pub fn from_any(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self { message }
    }

    /// The captured panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Error channel payload of a sender completion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An OS operation failed.
    #[error(transparent)]
    Os(#[from] OsError),
    /// A user-supplied closure panicked.
    #[error("user closure panicked: {0}")]
    Panic(PanicPayload),
}

impl Error {
    /// Shorthand for an OS error built from a condition.
    #[must_use]
    pub fn os(errc: OsErrc) -> Self {
        Self::Os(OsError::new(errc))
    }

    /// Returns the OS error if this is one.
    #[must_use]
    pub fn as_os(&self) -> Option<OsError> {
        match self {
            Self::Os(e) => Some(*e),
            Self::Panic(_) => None,
        }
    }
}

impl From<OsErrc> for Error {
    fn from(errc: OsErrc) -> Self {
        Self::os(errc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mapping_round_trips_known_codes() {
        let e = OsError::from_raw(libc::EADDRINUSE);
        assert_eq!(e.errc(), OsErrc::AddressInUse);
        assert_eq!(e.code(), libc::EADDRINUSE);
        assert_eq!(e.to_string(), "address already in use");
    }

    #[test]
    fn unknown_codes_do_not_panic() {
        let e = OsError::from_raw(999_999);
        assert_eq!(e.errc(), OsErrc::Unknown);
    }

    #[test]
    fn io_error_without_raw_code_maps_eof() {
        let io = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(OsError::from_io(&io).errc(), OsErrc::EndOfFile);
    }

    #[test]
    fn panic_payload_keeps_message() {
        let p = PanicPayload::from_any(Box::new("boom"));
        assert_eq!(p.message(), "boom");
        let p = PanicPayload::from_any(Box::new(String::from("again")));
        assert_eq!(p.message(), "again");
    }
}
