//! UDP transports: a listener that discovers its peers from incoming datagrams (and can reply
//!  to them), and a standalone client.

pub mod client;
pub mod ops;

use std::sync::Arc;
use tokio::runtime::Handle;
use crate::config::{SendConfig, SocketConfig};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::mailbox::Mailbox;
use crate::message::MessageHeader;
use crate::socket_holder::{Protocol, SocketHolder};
use crate::transport::Transport;
use crate::udp::ops::UdpOps;

pub use client::UdpClient;

/// Creates a transport bound to `endpoint` with both roles. Only receiving needs to be
///  started; sending goes to a discovered peer (the first one unless selected otherwise).
pub fn listener_transport<H: MessageHeader>(mailbox: Arc<Mailbox<H>>, endpoint: Endpoint, send_config: SendConfig, socket_config: SocketConfig, handle: Handle) -> Result<Transport<H>, TransportError> {
    send_config.validate()
        .map_err(|e| TransportError::Config(e.to_string()))?;
    let socket = Arc::new(SocketHolder::new(Protocol::Udp, socket_config));
    socket.bind_for_listen(endpoint, true)?;
    let ops = UdpOps::new(socket.clone());
    Ok(Transport::new(socket, mailbox, handle)
        .with_receive_strategy(ops.clone())
        .with_send_strategy(ops, send_config))
}
