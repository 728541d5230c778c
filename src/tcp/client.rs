use std::io;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::runtime::Handle;
use crate::config::{SendConfig, SocketConfig};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::mailbox::Mailbox;
use crate::message::MessageHeader;
use crate::reactor::Reactor;
use crate::socket_holder::{Protocol, SocketHolder};
use crate::transport::strategy::SendStrategy;
use crate::transport::{Transport, TransportHandle};

/// Sending side of a TCP connection that was established by `SocketHolder::connect`
pub struct TcpClientOps {
    socket: Arc<SocketHolder>,
}

impl TcpClientOps {
    pub fn new(socket: Arc<SocketHolder>) -> Arc<TcpClientOps> {
        Arc::new(TcpClientOps { socket })
    }
}

#[async_trait]
impl SendStrategy for TcpClientOps {
    async fn pre_send(&self) -> Result<(), TransportError> {
        self.socket.register_with_reactor()
    }

    async fn send(&self, packed: &[u8]) -> io::Result<usize> {
        self.socket.async_write(packed).await
    }
}

/// Connects to `remote` (blocking, see `SocketHolder::connect` for the timeout semantics) and
///  creates a send transport for the connection.
pub fn client_transport<H: MessageHeader>(
    mailbox: Arc<Mailbox<H>>,
    remote: Endpoint,
    connection_timeout_micros: i64,
    send_config: SendConfig,
    socket_config: SocketConfig,
    handle: Handle,
) -> Result<Transport<H>, TransportError> {
    send_config.validate()
        .map_err(|e| TransportError::Config(e.to_string()))?;
    let socket = Arc::new(SocketHolder::new(Protocol::Tcp, socket_config));
    socket.connect(remote, connection_timeout_micros)?;
    Ok(Transport::new(socket.clone(), mailbox, handle)
        .with_send_strategy(TcpClientOps::new(socket), send_config))
}

/// A standalone TCP sender with its own reactor thread.
pub struct TcpClient<H: MessageHeader> {
    transport: Transport<H>,
    reactor: Reactor,
}

impl <H: MessageHeader> TcpClient<H> {
    /// Connects and starts sending whatever is pushed to `mailbox`
    pub fn connect(mailbox: Arc<Mailbox<H>>, remote: Endpoint, connection_timeout_micros: i64, send_config: SendConfig) -> anyhow::Result<TcpClient<H>> {
        let reactor = Reactor::new("layline-tcp-client")?;
        let transport = client_transport(mailbox, remote, connection_timeout_micros, send_config, SocketConfig::default(), reactor.handle())?;
        transport.start_send()?;
        reactor.run()?;

        Ok(TcpClient {
            transport,
            reactor,
        })
    }

    pub fn transport(&self) -> &Transport<H> {
        &self.transport
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<H>> {
        self.transport.mailbox()
    }

    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.transport.socket().local_endpoint()
    }

    pub fn shutdown(&self) {
        self.transport.shutdown();
        self.reactor.shutdown();
    }
}
