use std::fmt::{Display, Formatter};
use std::sync::RwLock;
use crate::endpoint::Endpoint;

/// This process's record of a relationship with one remote endpoint over a socket.
///
/// A TCP session creates its connection as an empty slot when it starts listening, and fills
///  in the remote endpoint when the peer is accepted. That is the only time a connection's
///  endpoint changes.
#[derive(Debug, Default)]
pub struct Connection {
    remote_endpoint: RwLock<Endpoint>,
}

impl Connection {
    pub fn new(remote_endpoint: Endpoint) -> Connection {
        Connection {
            remote_endpoint: RwLock::new(remote_endpoint),
        }
    }

    pub fn remote_endpoint(&self) -> Endpoint {
        *self.remote_endpoint.read()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_remote_endpoint(&self, remote_endpoint: Endpoint) {
        *self.remote_endpoint.write()
            .unwrap_or_else(|e| e.into_inner()) = remote_endpoint;
    }

    /// a connection is attached iff its remote endpoint names an actual peer
    pub fn is_attached(&self) -> bool {
        self.remote_endpoint().is_concrete()
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_attached() {
            write!(f, "Connection: {}", self.remote_endpoint())
        }
        else {
            write!(f, "Connection: <unattached>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_is_filled_on_accept() {
        let connection = Connection::default();
        assert!(!connection.is_attached());
        assert_eq!(connection.to_string(), "Connection: <unattached>");

        connection.set_remote_endpoint(Endpoint::loopback(4711));
        assert!(connection.is_attached());
        assert_eq!(connection.remote_endpoint(), Endpoint::loopback(4711));
        assert_eq!(connection.to_string(), "Connection: 127.0.0.1:4711");
    }

    #[test]
    fn test_wildcard_is_not_attached() {
        assert!(!Connection::new(Endpoint::any(4711)).is_attached());
    }
}
