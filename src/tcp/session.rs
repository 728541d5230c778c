use std::io;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::debug;
use crate::config::SocketConfig;
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::mailbox::Mailbox;
use crate::message::MessageHeader;
use crate::socket_holder::{Protocol, SocketHolder};
use crate::transport::strategy::{Framing, ReceiveStrategy};
use crate::transport::Transport;

/// Receiving side of a TCP session: accepts exactly one peer, then reads from it.
pub struct TcpSession {
    socket: Arc<SocketHolder>,
}

impl TcpSession {
    pub fn new(socket: Arc<SocketHolder>) -> Arc<TcpSession> {
        Arc::new(TcpSession { socket })
    }
}

#[async_trait]
impl ReceiveStrategy for TcpSession {
    fn framing(&self) -> Framing {
        Framing::Stream
    }

    async fn pre_receive(&self) -> Result<(), TransportError> {
        let remote = self.socket.accept().await?;
        debug!("session established with {}", remote);
        Ok(())
    }

    async fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.async_read(buf).await
    }
}

/// Creates a receive transport listening on `endpoint` for a single TCP peer. The peer is
///  accepted once the receive loop runs.
pub fn session_transport<H: MessageHeader>(mailbox: Arc<Mailbox<H>>, endpoint: Endpoint, socket_config: SocketConfig, handle: Handle) -> Result<Transport<H>, TransportError> {
    let socket = Arc::new(SocketHolder::new(Protocol::Tcp, socket_config));
    socket.bind_for_listen(endpoint, true)?;
    Ok(Transport::new(socket.clone(), mailbox, handle)
        .with_receive_strategy(TcpSession::new(socket)))
}
