//! Endpoints: typed IPv4/IPv6 address-port pairs.

use core::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::error::{OsErrc, OsError};

/// An IPv4 endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Endpoint {
    addr: SocketAddrV4,
}

impl Ipv4Endpoint {
    /// Parses a dotted-quad literal plus port.
    ///
    /// # Errors
    ///
    /// `AiBadNode` when `ip` is not an IPv4 literal. Name resolution is
    /// deliberately out of scope.
    pub fn new(ip: &str, port: u16) -> Result<Self, OsError> {
        let ip: Ipv4Addr = ip.parse().map_err(|_| OsError::new(OsErrc::AiBadNode))?;
        Ok(Self {
            addr: SocketAddrV4::new(ip, port),
        })
    }

    /// `0.0.0.0:0`, the implicit bind target.
    #[must_use]
    pub fn any() -> Self {
        Self {
            addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        }
    }

    /// The endpoint's port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl fmt::Display for Ipv4Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// An IPv6 endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv6Endpoint {
    addr: SocketAddrV6,
}

impl Ipv6Endpoint {
    /// Parses a colon-hex literal plus port.
    ///
    /// # Errors
    ///
    /// `AiBadNode` when `ip` is not an IPv6 literal.
    pub fn new(ip: &str, port: u16) -> Result<Self, OsError> {
        let ip: Ipv6Addr = ip.parse().map_err(|_| OsError::new(OsErrc::AiBadNode))?;
        Ok(Self {
            addr: SocketAddrV6::new(ip, port, 0, 0),
        })
    }

    /// `[::]:0`, the implicit bind target.
    #[must_use]
    pub fn any() -> Self {
        Self {
            addr: SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0),
        }
    }

    /// The endpoint's port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl fmt::Display for Ipv6Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// The endpoint kinds the TCP and UDP resources accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// An IPv4 endpoint.
    V4(Ipv4Endpoint),
    /// An IPv6 endpoint.
    V6(Ipv6Endpoint),
}

impl Endpoint {
    /// The plain socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        match self {
            Self::V4(ep) => SocketAddr::V4(ep.addr),
            Self::V6(ep) => SocketAddr::V6(ep.addr),
        }
    }

    /// The endpoint's port.
    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            Self::V4(ep) => ep.port(),
            Self::V6(ep) => ep.port(),
        }
    }

    pub(crate) fn domain(&self) -> socket2::Domain {
        match self {
            Self::V4(_) => socket2::Domain::IPV4,
            Self::V6(_) => socket2::Domain::IPV6,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(ep) => ep.fmt(f),
            Self::V6(ep) => ep.fmt(f),
        }
    }
}

impl From<Ipv4Endpoint> for Endpoint {
    fn from(ep: Ipv4Endpoint) -> Self {
        Self::V4(ep)
    }
}

impl From<Ipv6Endpoint> for Endpoint {
    fn from(ep: Ipv6Endpoint) -> Self {
        Self::V6(ep)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::V4(Ipv4Endpoint { addr: v4 }),
            SocketAddr::V6(v6) => Self::V6(Ipv6Endpoint { addr: v6 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v4_literals() {
        let ep = Ipv4Endpoint::new("127.0.0.1", 1329).unwrap();
        assert_eq!(ep.to_string(), "127.0.0.1:1329");
        assert_eq!(ep.port(), 1329);
    }

    #[test]
    fn parses_v6_literals() {
        let ep = Ipv6Endpoint::new("::1", 80).unwrap();
        assert_eq!(ep.to_string(), "[::1]:80");
    }

    #[test]
    fn rejects_names() {
        let err = Ipv4Endpoint::new("localhost", 80).unwrap_err();
        assert_eq!(err.errc(), OsErrc::AiBadNode);
        let err = Ipv6Endpoint::new("freckles", 80).unwrap_err();
        assert_eq!(err.errc(), OsErrc::AiBadNode);
    }

    #[test]
    fn defaults_are_wildcards() {
        assert_eq!(Ipv4Endpoint::any().to_string(), "0.0.0.0:0");
        assert_eq!(Ipv6Endpoint::any().to_string(), "[::]:0");
    }

    #[test]
    fn socket_addr_round_trips() {
        let ep: Endpoint = Ipv4Endpoint::new("10.0.0.2", 7).unwrap().into();
        assert_eq!(Endpoint::from(ep.socket_addr()), ep);
    }
}
