use std::sync::Arc;
use crate::config::{SendConfig, SocketConfig};
use crate::connection::Connection;
use crate::endpoint::{AddressFamily, Endpoint};
use crate::error::TransportError;
use crate::mailbox::Mailbox;
use crate::message::MessageHeader;
use crate::reactor::Reactor;
use crate::socket_holder::{Protocol, SocketHolder};
use crate::transport::{Transport, TransportHandle};
use crate::udp::ops::UdpOps;

/// A standalone UDP peer with its own reactor thread. It sends to one of its known remote
///  connections, and can receive replies on the same socket.
pub struct UdpClient<H: MessageHeader> {
    transport: Transport<H>,
    reactor: Reactor,
}

impl <H: MessageHeader> UdpClient<H> {
    pub fn new(mailbox: Arc<Mailbox<H>>, send_config: SendConfig) -> anyhow::Result<UdpClient<H>> {
        send_config.validate()?;
        let reactor = Reactor::new("layline-udp-client")?;
        let socket = Arc::new(SocketHolder::new(Protocol::Udp, SocketConfig::default()));
        let ops = UdpOps::new(socket.clone());
        let transport = Transport::new(socket, mailbox, reactor.handle())
            .with_receive_strategy(ops.clone())
            .with_send_strategy(ops, send_config);

        Ok(UdpClient {
            transport,
            reactor,
        })
    }

    /// Opens the socket, bound to an ephemeral port on all interfaces of the family
    pub fn open_socket(&self, family: AddressFamily) -> Result<(), TransportError> {
        let wildcard = match family {
            AddressFamily::V4 => Endpoint::any(0),
            AddressFamily::V6 => Endpoint::any_v6(0),
        };
        self.socket().bind_for_listen(wildcard, true)
    }

    pub fn add_remote_connection(&self, remote: Endpoint) -> Arc<Connection> {
        self.socket().add_connection(remote)
    }

    pub fn set_send_connection(&self, connection_index: usize) -> Result<(), TransportError> {
        self.transport.set_send_connection(connection_index)
    }

    pub fn start_send(&self) -> anyhow::Result<()> {
        self.transport.start_send()?;
        self.reactor.run()
    }

    pub fn start_receive(&self) -> anyhow::Result<()> {
        self.transport.start_receive()?;
        self.reactor.run()
    }

    pub fn socket(&self) -> &Arc<SocketHolder> {
        self.transport.socket()
    }

    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.socket().local_endpoint()
    }

    pub fn transport(&self) -> &Transport<H> {
        &self.transport
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<H>> {
        self.transport.mailbox()
    }

    pub fn shutdown(&self) {
        self.transport.shutdown();
        self.reactor.shutdown();
    }
}
