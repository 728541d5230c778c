use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use crate::config::{SendConfig, SocketConfig};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::mailbox::Mailbox;
use crate::message::MessageHeader;
use crate::reactor::Reactor;
use crate::transport::{Transport, TransportHandle};
use crate::{tcp, udp};

/// Owns a reactor thread and the transports running on it. This is where mailboxes and
///  transports are wired together.
///
/// All transports of a server share its thread. Transports can be added before or after
///  `run()`; their loops start processing once the server runs.
pub struct Server {
    socket_config: SocketConfig,
    transports: Mutex<Vec<Arc<dyn TransportHandle>>>,
    reactor: Reactor,
}

impl Server {
    pub fn new() -> anyhow::Result<Server> {
        Self::with_socket_config(SocketConfig::default())
    }

    pub fn with_socket_config(socket_config: SocketConfig) -> anyhow::Result<Server> {
        Ok(Server {
            socket_config,
            transports: Default::default(),
            reactor: Reactor::new("layline-server")?,
        })
    }

    fn transports_mut(&self) -> MutexGuard<'_, Vec<Arc<dyn TransportHandle>>> {
        self.transports.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register<H: MessageHeader>(&self, transport: Transport<H>) -> Arc<Transport<H>> {
        let transport = Arc::new(transport);
        self.transports_mut().push(transport.clone());
        transport
    }

    /// Listens on `endpoint` for a single TCP peer and receives its messages into `mailbox`
    pub fn add_listener_transport<H: MessageHeader>(&self, mailbox: Arc<Mailbox<H>>, endpoint: Endpoint) -> Result<Arc<Transport<H>>, TransportError> {
        let transport = tcp::session_transport(mailbox, endpoint, self.socket_config.clone(), self.reactor.handle())?;
        transport.start_receive()?;
        info!("added TCP listener on {:?}", transport.socket().local_endpoint());
        Ok(self.register(transport))
    }

    /// Binds a UDP socket to `endpoint` and receives from every peer that sends to it. The
    ///  transport can also send (paced by `send_interval_micros`) to discovered peers once
    ///  `start_send()` is called on it.
    pub fn add_transport<H: MessageHeader>(&self, mailbox: Arc<Mailbox<H>>, endpoint: Endpoint, send_interval_micros: u64) -> Result<Arc<Transport<H>>, TransportError> {
        let transport = udp::listener_transport(mailbox, endpoint, SendConfig::steady(send_interval_micros), self.socket_config.clone(), self.reactor.handle())?;
        transport.start_receive()?;
        info!("added UDP transport on {:?}", transport.socket().local_endpoint());
        Ok(self.register(transport))
    }

    /// Connects to a TCP listener and sends the messages pushed to `mailbox`. This blocks
    ///  while connecting, see `SocketHolder::connect` for the timeout semantics.
    pub fn add_send_transport<H: MessageHeader>(&self, mailbox: Arc<Mailbox<H>>, remote: Endpoint, send_interval_micros: u64, connection_timeout_micros: i64) -> Result<Arc<Transport<H>>, TransportError> {
        let transport = tcp::client_transport(
            mailbox,
            remote,
            connection_timeout_micros,
            SendConfig::steady(send_interval_micros),
            self.socket_config.clone(),
            self.reactor.handle(),
        )?;
        transport.start_send()?;
        info!("added TCP send transport to {}", remote);
        Ok(self.register(transport))
    }

    pub fn transports(&self) -> Vec<Arc<dyn TransportHandle>> {
        self.transports_mut().clone()
    }

    /// Starts the server's thread. Calling this while the server runs has no effect.
    pub fn run(&self) -> anyhow::Result<()> {
        self.reactor.run()
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_running()
    }

    /// Stops the server's thread, leaving the transports in place so that a subsequent `run()`
    ///  continues where they stopped. Calling this when the server is not running has no
    ///  effect.
    pub fn shutdown(&self) {
        self.reactor.shutdown();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let transports = std::mem::take(&mut *self.transports_mut());
        debug!("closing {} transport(s)", transports.len());
        for transport in transports {
            transport.shutdown();
        }
        self.reactor.shutdown();
    }
}
