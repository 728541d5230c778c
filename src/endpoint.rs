use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// An (address, port) pair identifying a network location. Compared by value.
///
/// The default endpoint is `0.0.0.0:0`, which is what an unfilled connection slot holds
///  before the remote side is known.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Endpoint {
    addr: SocketAddr,
}

impl Endpoint {
    pub fn new(address: IpAddr, port: u16) -> Endpoint {
        Endpoint { addr: SocketAddr::new(address, port) }
    }

    /// wildcard v4 address, used for listening on all interfaces
    pub fn any(port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }

    pub fn any_v6(port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
    }

    pub fn loopback(port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    pub fn address(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn family(&self) -> AddressFamily {
        if self.addr.is_ipv4() {
            AddressFamily::V4
        }
        else {
            AddressFamily::V6
        }
    }

    pub fn is_any(&self) -> bool {
        self.addr.ip().is_unspecified()
    }

    /// true for an endpoint that names an actual peer, i.e. neither wildcard address nor port 0
    pub fn is_concrete(&self) -> bool {
        !self.is_any() && self.port() != 0
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Maps a wildcard address to the loopback address of the same family, keeping the port.
    ///  This is how a local client reaches a listener bound to 'any'.
    pub fn to_loopback(&self) -> Endpoint {
        match self.family() {
            AddressFamily::V4 if self.is_any() => Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port()),
            AddressFamily::V6 if self.is_any() => Endpoint::new(IpAddr::V6(Ipv6Addr::LOCALHOST), self.port()),
            _ => *self,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::any(0)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint { addr }
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.addr
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::any(Endpoint::any(5000), true, false)]
    #[case::any_v6(Endpoint::any_v6(5000), true, false)]
    #[case::default(Endpoint::default(), true, false)]
    #[case::loopback(Endpoint::loopback(5000), false, true)]
    #[case::loopback_port_0(Endpoint::loopback(0), false, false)]
    fn test_any_and_concrete(#[case] endpoint: Endpoint, #[case] is_any: bool, #[case] is_concrete: bool) {
        assert_eq!(endpoint.is_any(), is_any);
        assert_eq!(endpoint.is_concrete(), is_concrete);
    }

    #[test]
    fn test_to_loopback() {
        assert_eq!(Endpoint::any(17).to_loopback(), Endpoint::loopback(17));
        assert_eq!(Endpoint::any_v6(17).to_loopback(), Endpoint::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 17));
        assert_eq!(Endpoint::loopback(18).to_loopback(), Endpoint::loopback(18));
    }

    #[test]
    fn test_family() {
        assert_eq!(Endpoint::any(1).family(), AddressFamily::V4);
        assert_eq!(Endpoint::any_v6(1).family(), AddressFamily::V6);
    }
}
