//! The generic transport driver: continuous receive and send loops moving bytes between one
//!  socket and one mailbox.
//!
//! Protocol specifics (accepting a TCP peer, tracking UDP senders, choosing a UDP destination)
//!  are injected as [ReceiveStrategy] / [SendStrategy] objects. A transport has a receive
//!  role, a send role, or both, depending on which strategies it was built with.

pub mod strategy;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use crate::clock::precise_sleep_until;
use crate::config::SendConfig;
use crate::error::TransportError;
use crate::mailbox::Mailbox;
use crate::message::MessageHeader;
use crate::socket_holder::SocketHolder;
use crate::transport::strategy::{Framing, ReceiveStrategy, SendStrategy};

/// The state of one loop of a transport.
///
/// Receive: `Idle -> Receiving -> (HandlingCompletion -> Receiving)* -> Stopped | Failed`
///
/// Send: `Idle -> Sending -> (HandlingCompletion -> Sending)* -> Stopped | Failed`
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum TransportState {
    Idle = 0,
    Receiving = 1,
    Sending = 2,
    HandlingCompletion = 3,
    /// terminal: shut down, or the peer closed the connection
    Stopped = 4,
    /// terminal: the loop ended with an error
    Failed = 5,
}

struct AtomicTransportState(AtomicU8);

impl AtomicTransportState {
    fn new() -> AtomicTransportState {
        AtomicTransportState(AtomicU8::new(TransportState::Idle.into()))
    }

    fn get(&self) -> TransportState {
        TransportState::try_from(self.0.load(Ordering::Acquire))
            .unwrap_or(TransportState::Failed)
    }

    /// Moves to a new state unless the loop was stopped already - a loop that is still
    ///  completing an operation while it is shut down must not revive its state
    fn advance(&self, new_state: TransportState) {
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            if cur == u8::from(TransportState::Stopped) {
                None
            }
            else {
                Some(new_state.into())
            }
        });
    }

    fn start(&self, running: TransportState) -> bool {
        self.0.compare_exchange(TransportState::Idle.into(), running.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn stop(&self) {
        self.0.store(TransportState::Stopped.into(), Ordering::Release);
    }
}

/// The part of a transport that does not depend on its mailbox's message type, so that
///  transports for different messages can be managed together
pub trait TransportHandle: Send + Sync {
    fn socket(&self) -> &Arc<SocketHolder>;

    fn receive_state(&self) -> TransportState;

    fn send_state(&self) -> TransportState;

    /// Stops both loops and closes the socket. Calling this more than once is harmless.
    fn shutdown(&self);
}

pub struct Transport<H: MessageHeader> {
    socket: Arc<SocketHolder>,
    mailbox: Arc<Mailbox<H>>,
    handle: Handle,
    receive_strategy: Option<Arc<dyn ReceiveStrategy>>,
    send_strategy: Option<Arc<dyn SendStrategy>>,
    send_config: SendConfig,
    receive_state: Arc<AtomicTransportState>,
    send_state: Arc<AtomicTransportState>,
    attached_receiver: AtomicBool,
    attached_sender: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl <H: MessageHeader> Transport<H> {
    /// A transport without any role. Loops are spawned through `handle`, i.e. they run on
    ///  the reactor it belongs to.
    pub fn new(socket: Arc<SocketHolder>, mailbox: Arc<Mailbox<H>>, handle: Handle) -> Transport<H> {
        Transport {
            socket,
            mailbox,
            handle,
            receive_strategy: None,
            send_strategy: None,
            send_config: SendConfig::default(),
            receive_state: Arc::new(AtomicTransportState::new()),
            send_state: Arc::new(AtomicTransportState::new()),
            attached_receiver: AtomicBool::new(false),
            attached_sender: AtomicBool::new(false),
            tasks: Default::default(),
        }
    }

    pub fn with_receive_strategy(mut self, strategy: Arc<dyn ReceiveStrategy>) -> Transport<H> {
        self.receive_strategy = Some(strategy);
        self
    }

    pub fn with_send_strategy(mut self, strategy: Arc<dyn SendStrategy>, send_config: SendConfig) -> Transport<H> {
        self.send_strategy = Some(strategy);
        self.send_config = send_config;
        self
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<H>> {
        &self.mailbox
    }

    pub fn can_receive(&self) -> bool {
        self.receive_strategy.is_some()
    }

    pub fn can_send(&self) -> bool {
        self.send_strategy.is_some()
    }

    pub fn send_config(&self) -> &SendConfig {
        &self.send_config
    }

    /// the connection (by index) that the send loop sends to, for transports with several peers
    pub fn set_send_connection(&self, connection_index: usize) -> Result<(), TransportError> {
        self.send_strategy.as_ref()
            .ok_or(TransportError::Unsupported("sending"))?
            .set_destination(connection_index)
    }

    /// Spawns the receive loop. Starting a loop that was started before has no effect.
    ///
    /// Only one transport at a time can receive into a given mailbox; a second one is
    ///  rejected with `TransportError::MailboxInUse`.
    pub fn start_receive(&self) -> Result<(), TransportError> {
        let strategy = self.receive_strategy.clone()
            .ok_or(TransportError::Unsupported("receiving"))?;
        if self.receive_state.get() != TransportState::Idle {
            debug!("receive loop was started before");
            return Ok(());
        }
        if !self.mailbox.attach_receiver() {
            return Err(TransportError::MailboxInUse("receiving"));
        }
        if !self.receive_state.start(TransportState::Receiving) {
            self.mailbox.detach_receiver();
            return Ok(());
        }
        self.attached_receiver.store(true, Ordering::Release);

        let span = span!(Level::INFO, "receive", local = ?self.socket.local_endpoint());
        let task = self.handle.spawn(
            receive_loop(strategy, self.mailbox.clone(), self.receive_state.clone())
                .instrument(span)
        );
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).push(task);
        Ok(())
    }

    /// Spawns the send loop. Starting a loop that was started before has no effect.
    ///
    /// Only one transport at a time can send from a given mailbox; a second one is rejected
    ///  with `TransportError::MailboxInUse`.
    pub fn start_send(&self) -> Result<(), TransportError> {
        let strategy = self.send_strategy.clone()
            .ok_or(TransportError::Unsupported("sending"))?;
        self.send_config.validate()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        if self.send_state.get() != TransportState::Idle {
            debug!("send loop was started before");
            return Ok(());
        }
        if !self.mailbox.attach_sender() {
            return Err(TransportError::MailboxInUse("sending"));
        }
        if !self.send_state.start(TransportState::Sending) {
            self.mailbox.detach_sender();
            return Ok(());
        }
        self.attached_sender.store(true, Ordering::Release);

        let span = span!(Level::INFO, "send", local = ?self.socket.local_endpoint());
        let task = self.handle.spawn(
            send_loop(strategy, self.mailbox.clone(), self.send_config.clone(), self.send_state.clone())
                .instrument(span)
        );
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).push(task);
        Ok(())
    }
}

impl <H: MessageHeader> TransportHandle for Transport<H> {
    fn socket(&self) -> &Arc<SocketHolder> {
        &self.socket
    }

    fn receive_state(&self) -> TransportState {
        self.receive_state.get()
    }

    fn send_state(&self) -> TransportState {
        self.send_state.get()
    }

    fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        self.receive_state.stop();
        self.send_state.stop();
        if self.attached_receiver.swap(false, Ordering::AcqRel) {
            self.mailbox.detach_receiver();
        }
        if self.attached_sender.swap(false, Ordering::AcqRel) {
            self.mailbox.detach_sender();
        }
        self.socket.close_and_shutdown_socket();
    }
}

impl <H: MessageHeader> Drop for Transport<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// peer-side closing of a stream, which ends a receive loop regularly
fn is_closed_by_peer(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted)
}

async fn receive_loop<H: MessageHeader>(strategy: Arc<dyn ReceiveStrategy>, mailbox: Arc<Mailbox<H>>, state: Arc<AtomicTransportState>) {
    if let Err(e) = strategy.pre_receive().await {
        error!("preparing to receive failed: {}", e);
        state.advance(TransportState::Failed);
        return;
    }
    info!("starting receive loop");

    let framing = strategy.framing();
    let mut slot = mailbox.receive_slot().await;
    let end_state = loop {
        state.advance(TransportState::Receiving);
        let completion = match framing {
            Framing::Stream => match slot.writeable_buffer() {
                Ok(buf) => strategy.receive(buf).await,
                Err(e) => {
                    error!("no room for the next read, stopping: {}", e);
                    break TransportState::Failed;
                }
            },
            Framing::Datagram => strategy.receive(slot.datagram_buffer()).await,
        };

        state.advance(TransportState::HandlingCompletion);
        match completion {
            Ok(0) if framing == Framing::Stream => {
                info!("peer closed the connection");
                break TransportState::Stopped;
            }
            Ok(n) if framing == Framing::Stream => {
                trace!("received {} bytes", n);
                if let Err(e) = slot.unpack_receive(n) {
                    error!("sender and receiver disagree on framing, stopping: {}", e);
                    break TransportState::Failed;
                }
            }
            Ok(n) => {
                let num_messages = slot.unpack_datagram(n);
                trace!("received datagram of {} bytes with {} message(s)", n, num_messages);
            }
            Err(e) if framing == Framing::Stream && is_closed_by_peer(&e) => {
                info!("connection closed by peer: {}", e);
                break TransportState::Stopped;
            }
            Err(e) if framing == Framing::Datagram && matches!(e.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset) => {
                // an earlier datagram was rejected by its destination
                debug!("ignoring {}", e);
            }
            Err(e) => {
                error!("receive failed, stopping: {}", e);
                break TransportState::Failed;
            }
        }
    };
    state.advance(end_state);
}

async fn send_loop<H: MessageHeader>(strategy: Arc<dyn SendStrategy>, mailbox: Arc<Mailbox<H>>, config: SendConfig, state: Arc<AtomicTransportState>) {
    if let Err(e) = strategy.pre_send().await {
        error!("preparing to send failed: {}", e);
        state.advance(TransportState::Failed);
        return;
    }
    info!("starting send loop, interval {:?}", config.send_interval);

    let mut slot = mailbox.send_slot().await;
    let end_state = loop {
        state.advance(TransportState::Sending);
        let started = Instant::now();
        let packed = match config.group_count {
            None => slot.pack_send(),
            Some(count) => slot.pack_group_send(Some(count)),
        };
        match packed {
            Ok(0) => {
                mailbox.wait_for_send().await;
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                error!("packing failed, stopping: {}", e);
                break TransportState::Failed;
            }
        }

        let completion = strategy.send(slot.packed_bytes()).await;
        state.advance(TransportState::HandlingCompletion);
        match completion {
            Ok(n) => {
                trace!("sent {} bytes", n);
                slot.on_message_sent();
            }
            Err(e) => {
                warn!("send failed, stopping: {}", e);
                break TransportState::Failed;
            }
        }

        if !config.send_interval.is_zero() {
            precise_sleep_until(started + config.send_interval).await;
        }
    };
    state.advance(end_state);
}
