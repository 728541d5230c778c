use std::io;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use crate::error::TransportError;

/// How received bytes map to messages
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Framing {
    /// a byte stream, read in exactly the sizes the mailbox asks for (header, then body)
    Stream,
    /// one datagram per receive, framed in place
    Datagram,
}

/// The protocol-specific part of a receive loop.
#[async_trait]
pub trait ReceiveStrategy: Send + Sync + 'static {
    fn framing(&self) -> Framing;

    /// Runs once inside the reactor before the first receive, e.g. for accepting the peer
    async fn pre_receive(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Stream framing fills all of `buf`. A peer closing the connection is reported as
    ///  `Ok(0)` or as an `UnexpectedEof` error. Datagram framing receives one datagram and
    ///  records its sender.
    async fn receive(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// The protocol-specific part of a send loop.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendStrategy: Send + Sync + 'static {
    /// Runs once inside the reactor before the first send
    async fn pre_send(&self) -> Result<(), TransportError>;

    /// transfers all of `packed` to the current destination
    async fn send(&self, packed: &[u8]) -> io::Result<usize>;

    /// Selects the destination by its index in the socket's connections, for sockets that
    ///  know several peers
    fn set_destination(&self, _connection_index: usize) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("choosing a destination"))
    }
}
