use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use tracing::{debug, trace};
use crate::error::TransportError;
use crate::socket_holder::SocketHolder;
use crate::transport::strategy::{Framing, ReceiveStrategy, SendStrategy};

/// Socket operations for a connectionless UDP socket.
///
/// Receiving records every sender that was not seen before as a new connection, which is how
///  a single bound socket discovers its peers. Sending goes to the connection selected by
///  index, waiting until that connection is known.
pub struct UdpOps {
    socket: Arc<SocketHolder>,
    send_connection: AtomicUsize,
}

impl UdpOps {
    pub fn new(socket: Arc<SocketHolder>) -> Arc<UdpOps> {
        Arc::new(UdpOps {
            socket,
            send_connection: AtomicUsize::new(0),
        })
    }

    pub fn send_connection(&self) -> usize {
        self.send_connection.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ReceiveStrategy for UdpOps {
    fn framing(&self) -> Framing {
        Framing::Datagram
    }

    async fn pre_receive(&self) -> Result<(), TransportError> {
        self.socket.register_with_reactor()
    }

    async fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        let (len, from) = self.socket.async_receive(buf).await?;
        trace!("received {} bytes from {}", len, from);
        if !self.socket.has_connection(from) {
            self.socket.add_connection(from);
            debug!("discovered peer {} - now {} connection(s)", from, self.socket.connection_count());
        }
        Ok(len)
    }
}

#[async_trait]
impl SendStrategy for UdpOps {
    async fn pre_send(&self) -> Result<(), TransportError> {
        self.socket.register_with_reactor()
    }

    async fn send(&self, packed: &[u8]) -> io::Result<usize> {
        let destination = self.socket.wait_for_connection(self.send_connection()).await
            .remote_endpoint();
        self.socket.async_send(packed, destination).await
    }

    fn set_destination(&self, connection_index: usize) -> Result<(), TransportError> {
        self.send_connection.store(connection_index, Ordering::Release);
        Ok(())
    }
}
