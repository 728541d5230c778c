//! Ownership of one OS socket plus the remote connections known for it.
//!
//! Sockets are created and configured with `socket2` on whatever thread sets a transport up,
//!  which is where the blocking parts (bind, listen, connect) happen. They are handed over to
//!  tokio by `register_with_reactor()` / `accept()` from inside the reactor, after which the
//!  async primitives are available.

use std::io;
use std::net::Shutdown;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use socket2::{Domain, SockAddr, SockRef, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};
use crate::clock::{precise_sleep, ExpireTimer};
use crate::config::{SocketConfig, MAX_MESSAGE_SIZE_BYTES};
use crate::connection::Connection;
use crate::endpoint::{AddressFamily, Endpoint};
use crate::error::TransportError;

const LISTEN_BACKLOG: i32 = 1;

/// pause between connection attempts while the remote side refuses
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    Tcp,
    Udp,
}

enum SocketState {
    Closed,
    Open { socket: Socket, family: AddressFamily },
    /// A connected stream, split so that reading and writing do not wait for each other.
    ///  `control` is a duplicate handle for options and shutdown while a read is pending.
    Stream {
        reader: Arc<tokio::sync::Mutex<OwnedReadHalf>>,
        writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
        control: Socket,
    },
    Datagram(Arc<UdpSocket>),
}

impl SocketState {
    fn stream(stream: TcpStream) -> io::Result<SocketState> {
        let control = SockRef::from(&stream).try_clone()?;
        let (reader, writer) = stream.into_split();
        Ok(SocketState::Stream {
            reader: Arc::new(tokio::sync::Mutex::new(reader)),
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            control,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct SocketHolder {
    protocol: Protocol,
    config: SocketConfig,
    socket: Mutex<SocketState>,
    acceptor: Mutex<Option<Socket>>,
    local_endpoint: RwLock<Option<Endpoint>>,
    connections: RwLock<Vec<Arc<Connection>>>,
    connection_added: Notify,
}

impl SocketHolder {
    pub fn new(protocol: Protocol, config: SocketConfig) -> SocketHolder {
        SocketHolder {
            protocol,
            config,
            socket: Mutex::new(SocketState::Closed),
            acceptor: Mutex::new(None),
            local_endpoint: RwLock::new(None),
            connections: Default::default(),
            connection_added: Notify::new(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn new_socket(&self, family: AddressFamily) -> Result<Socket, TransportError> {
        let domain = match family {
            AddressFamily::V4 => Domain::IPV4,
            AddressFamily::V6 => Domain::IPV6,
        };
        let socket = match self.protocol {
            Protocol::Tcp => Socket::new(domain, Type::STREAM, Some(socket2::Protocol::TCP)),
            Protocol::Udp => Socket::new(domain, Type::DGRAM, Some(socket2::Protocol::UDP)),
        }.map_err(|e| TransportError::Socket(format!("opening {:?} socket failed: {}", family, e)))?;

        self.configure(&socket)
            .map_err(|e| TransportError::Socket(format!("setting socket options failed: {}", e)))?;
        Ok(socket)
    }

    fn configure(&self, socket: &Socket) -> io::Result<()> {
        socket.set_recv_buffer_size(self.config.receive_buffer_size)?;
        if self.protocol == Protocol::Tcp {
            // no lingering on close, so that ports are free again immediately
            socket.set_linger(None)?;
        }
        Ok(())
    }

    /// Opens the socket for an address family. Opening a socket that is already open is a
    ///  contract violation and fails with `TransportError::Socket`.
    pub fn open_socket(&self, family: AddressFamily) -> Result<(), TransportError> {
        let mut state = lock(&self.socket);
        if !matches!(*state, SocketState::Closed) {
            return Err(TransportError::Socket("socket is already open".to_string()));
        }
        *state = SocketState::Open { socket: self.new_socket(family)?, family };
        trace!("opened {:?} socket", self.protocol);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !matches!(*lock(&self.socket), SocketState::Closed)
    }

    pub fn bind_socket(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        let state = lock(&self.socket);
        let socket = match &*state {
            SocketState::Open { socket, family } if *family == endpoint.family() => socket,
            SocketState::Open { family, .. } => return Err(TransportError::Socket(format!("cannot bind {:?} socket to {}", family, endpoint))),
            SocketState::Closed => return Err(TransportError::NotOpen),
            _ => return Err(TransportError::Socket("socket is already in use".to_string())),
        };

        socket.bind(&SockAddr::from(endpoint.socket_addr()))
            .map_err(|source| TransportError::Bind { endpoint, source })?;
        let local = socket.local_addr().ok().and_then(|a| a.as_socket()).map(Endpoint::from);
        self.record_local_endpoint(local);
        debug!("bound {:?} socket to {:?}", self.protocol, local);
        Ok(())
    }

    /// Prepares a socket for receiving, with the address family implied by `endpoint`.
    ///
    /// For TCP this opens a listening acceptor waiting for exactly one peer, and creates the
    ///  (unattached) connection slot that is filled when the peer is accepted. For UDP the
    ///  socket itself is opened.
    pub fn bind_for_listen(&self, endpoint: Endpoint, should_bind: bool) -> Result<(), TransportError> {
        match self.protocol {
            Protocol::Udp => {
                self.open_socket(endpoint.family())?;
                if should_bind {
                    self.bind_socket(endpoint)?;
                }
            }
            Protocol::Tcp => {
                let mut acceptor = lock(&self.acceptor);
                if acceptor.is_some() {
                    return Err(TransportError::Socket("acceptor is already open".to_string()));
                }
                let socket = self.new_socket(endpoint.family())?;
                if should_bind {
                    socket.bind(&SockAddr::from(endpoint.socket_addr()))
                        .map_err(|source| TransportError::Bind { endpoint, source })?;
                }
                socket.listen(LISTEN_BACKLOG)
                    .map_err(|source| TransportError::Bind { endpoint, source })?;

                self.record_local_endpoint(socket.local_addr().ok().and_then(|a| a.as_socket()).map(Endpoint::from));
                *acceptor = Some(socket);
                drop(acceptor);

                self.add_connection_slot();
                debug!("listening on {:?}", self.local_endpoint());
            }
        }
        Ok(())
    }

    /// Waits for the single peer of a listening TCP socket. The peer's endpoint fills the
    ///  connection slot, and the accepted stream becomes this holder's socket.
    pub async fn accept(&self) -> Result<Endpoint, TransportError> {
        let acceptor = lock(&self.acceptor).take()
            .ok_or(TransportError::NotOpen)?;
        acceptor.set_nonblocking(true)?;
        let listener = TcpListener::from_std(acceptor.into())?;

        let (stream, remote) = listener.accept().await?;
        let remote = Endpoint::from(remote);
        if let Err(e) = self.configure(&SockRef::from(&stream)) {
            warn!("setting socket options for accepted connection failed: {}", e);
        }
        self.record_local_endpoint(stream.local_addr().ok().map(Endpoint::from));
        *lock(&self.socket) = SocketState::stream(stream)?;

        match self.connection_at(0) {
            Some(slot) => slot.set_remote_endpoint(remote),
            None => {
                self.add_connection(remote);
            }
        }
        self.connection_added.notify_waiters();
        info!("accepted connection from {}", remote);
        Ok(remote)
    }

    /// Connects a TCP socket synchronously. A refused connection is retried with a fresh
    ///  socket until `timeout_micros` has elapsed; a negative timeout means a single attempt.
    ///
    /// The remote endpoint is registered as a connection.
    pub fn connect(&self, remote: Endpoint, timeout_micros: i64) -> Result<(), TransportError> {
        if self.protocol != Protocol::Tcp {
            return Err(TransportError::Unsupported("synchronous connect on a datagram socket"));
        }

        let was_open = self.is_open();
        let timer = ExpireTimer::from_micros(timeout_micros.max(0) as u64);
        let mut num_attempts = 0;
        loop {
            let socket = self.take_unconnected_socket(remote.family())?;
            num_attempts += 1;
            match socket.connect(&SockAddr::from(remote.socket_addr())) {
                Ok(()) => {
                    let local = socket.local_addr().ok().and_then(|a| a.as_socket()).map(Endpoint::from);
                    self.record_local_endpoint(local);
                    *lock(&self.socket) = SocketState::Open { socket, family: remote.family() };
                    self.add_connection(remote);
                    info!("connected to {} after {} attempt(s)", remote, num_attempts);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused && timeout_micros >= 0 && !timer.is_expired() => {
                    trace!("connection to {} refused, retrying", remote);
                    precise_sleep(CONNECT_RETRY_INTERVAL);
                }
                Err(source) => {
                    warn!("connecting to {} failed after {} attempt(s): {}", remote, num_attempts, source);
                    if was_open {
                        self.reopen(remote.family());
                    }
                    return Err(TransportError::Connect { endpoint: remote, source });
                }
            }
        }
    }

    /// A socket whose connect failed is unusable. An explicitly opened socket is replaced by
    ///  a fresh one so that it stays open until it is closed explicitly.
    fn reopen(&self, family: AddressFamily) {
        match self.new_socket(family) {
            Ok(socket) => {
                let mut state = lock(&self.socket);
                if matches!(*state, SocketState::Closed) {
                    *state = SocketState::Open { socket, family };
                }
            }
            Err(e) => warn!("reopening socket after failed connect: {}", e),
        }
    }

    /// the opened (but not yet connected) socket if there is one for this family, otherwise
    ///  a new one
    fn take_unconnected_socket(&self, family: AddressFamily) -> Result<Socket, TransportError> {
        let mut state = lock(&self.socket);
        match std::mem::replace(&mut *state, SocketState::Closed) {
            SocketState::Open { socket, family: f } if f == family => Ok(socket),
            SocketState::Open { .. } | SocketState::Closed => self.new_socket(family),
            other => {
                *state = other;
                Err(TransportError::Socket("socket is already connected".to_string()))
            }
        }
    }

    /// Hands an opened socket over to the tokio reactor. This must be called from inside the
    ///  reactor, and is a no-op for sockets that were handed over before.
    pub fn register_with_reactor(&self) -> Result<(), TransportError> {
        let mut state = lock(&self.socket);
        match std::mem::replace(&mut *state, SocketState::Closed) {
            SocketState::Open { socket, .. } => {
                socket.set_nonblocking(true)?;
                *state = match self.protocol {
                    Protocol::Tcp => SocketState::stream(TcpStream::from_std(socket.into())?)?,
                    Protocol::Udp => SocketState::Datagram(Arc::new(UdpSocket::from_std(socket.into())?)),
                };
                Ok(())
            }
            SocketState::Closed => Err(TransportError::NotOpen),
            other => {
                *state = other;
                Ok(())
            }
        }
    }

    fn stream_reader(&self) -> io::Result<Arc<tokio::sync::Mutex<OwnedReadHalf>>> {
        match &*lock(&self.socket) {
            SocketState::Stream { reader, .. } => Ok(reader.clone()),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "no connected stream socket")),
        }
    }

    fn stream_writer(&self) -> io::Result<Arc<tokio::sync::Mutex<OwnedWriteHalf>>> {
        match &*lock(&self.socket) {
            SocketState::Stream { writer, .. } => Ok(writer.clone()),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "no connected stream socket")),
        }
    }

    fn datagram_socket(&self) -> io::Result<Arc<UdpSocket>> {
        match &*lock(&self.socket) {
            SocketState::Datagram(socket) => Ok(socket.clone()),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "no registered datagram socket")),
        }
    }

    /// Reads exactly `buf.len()` bytes from a stream socket. A peer closing the connection
    ///  before all of them arrived is reported as `UnexpectedEof`.
    pub async fn async_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let reader = self.stream_reader()?;
        let mut reader = reader.lock().await;
        reader.read_exact(buf).await
    }

    /// writes all of `buf` to a stream socket
    pub async fn async_write(&self, buf: &[u8]) -> io::Result<usize> {
        let writer = self.stream_writer()?;
        let mut writer = writer.lock().await;
        writer.write_all(buf).await?;
        Ok(buf.len())
    }

    /// Reads and discards exactly `num_bytes` bytes from a stream socket
    pub async fn flush_socket(&self, num_bytes: usize) -> Result<(), TransportError> {
        if self.protocol != Protocol::Tcp {
            return Err(TransportError::Unsupported("flushing a datagram socket"));
        }

        let reader = self.stream_reader()?;
        let mut reader = reader.lock().await;
        let mut scratch = [0u8; MAX_MESSAGE_SIZE_BYTES];
        let mut remaining = num_bytes;
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            reader.read_exact(&mut scratch[..chunk]).await?;
            remaining -= chunk;
        }
        trace!("flushed {} bytes", num_bytes);
        Ok(())
    }

    /// Receives exactly one datagram, regardless of the buffer size, and reports where it
    ///  came from
    pub async fn async_receive(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        let socket = self.datagram_socket()?;
        let (len, from) = socket.recv_from(buf).await?;
        Ok((len, Endpoint::from(from)))
    }

    pub async fn async_send(&self, buf: &[u8], to: Endpoint) -> io::Result<usize> {
        let socket = self.datagram_socket()?;
        socket.send_to(buf, to.socket_addr()).await
    }

    /// Shuts down both directions and closes the socket. Failures are logged only - the peer
    ///  may have closed its side already.
    pub fn close_and_shutdown_socket(&self) {
        let state = std::mem::replace(&mut *lock(&self.socket), SocketState::Closed);
        let result = match &state {
            SocketState::Stream { control, .. } => control.shutdown(Shutdown::Both),
            SocketState::Open { socket, .. } if self.protocol == Protocol::Tcp => socket.shutdown(Shutdown::Both),
            _ => Ok(()),
        };
        if let Err(e) = result {
            debug!("shutting down socket: {}", e);
        }
        drop(state);

        if lock(&self.acceptor).take().is_some() {
            debug!("closed acceptor");
        }
    }

    /// The local endpoint as reported by the OS, or as recorded when the socket was bound or
    ///  the peer was accepted
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        let live = match &*lock(&self.socket) {
            SocketState::Open { socket, .. } => socket.local_addr().ok().and_then(|a| a.as_socket()),
            SocketState::Stream { control, .. } => control.local_addr().ok().and_then(|a| a.as_socket()),
            SocketState::Datagram(socket) => socket.local_addr().ok(),
            SocketState::Closed => None,
        };
        live.map(Endpoint::from)
            .or_else(|| *self.local_endpoint.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn record_local_endpoint(&self, local: Option<Endpoint>) {
        if local.is_some() {
            *self.local_endpoint.write().unwrap_or_else(|e| e.into_inner()) = local;
        }
    }

    /// the OS-level receive buffer size (which the OS may have adjusted from the configured
    ///  value)
    pub fn receive_buffer_size(&self) -> Result<usize, TransportError> {
        let state = lock(&self.socket);
        let size = match &*state {
            SocketState::Open { socket, .. } => socket.recv_buffer_size(),
            SocketState::Stream { control, .. } => control.recv_buffer_size(),
            SocketState::Datagram(socket) => SockRef::from(&**socket).recv_buffer_size(),
            SocketState::Closed => match &*lock(&self.acceptor) {
                Some(acceptor) => acceptor.recv_buffer_size(),
                None => return Err(TransportError::NotOpen),
            }
        };
        Ok(size?)
    }

    /// Registers a connection for a remote endpoint, or returns the existing one
    pub fn add_connection(&self, remote: Endpoint) -> Arc<Connection> {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = connections.iter().find(|c| c.remote_endpoint() == remote) {
            return existing.clone();
        }
        let connection = Arc::new(Connection::new(remote));
        connections.push(connection.clone());
        drop(connections);

        debug!("new connection to {}", remote);
        self.connection_added.notify_waiters();
        connection
    }

    fn add_connection_slot(&self) -> Arc<Connection> {
        let slot = Arc::new(Connection::default());
        self.connections.write().unwrap_or_else(|e| e.into_inner())
            .push(slot.clone());
        slot
    }

    pub fn has_connection(&self, remote: Endpoint) -> bool {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|c| c.remote_endpoint() == remote)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn connection_at(&self, index: usize) -> Option<Arc<Connection>> {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
            .get(index)
            .cloned()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// one line per connection, in the order they were registered
    pub fn connection_info(&self) -> Vec<String> {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    /// waits until there is an attached connection at `index`
    pub async fn wait_for_connection(&self, index: usize) -> Arc<Connection> {
        loop {
            // registered before checking, so that a connection added in between is not missed
            let notified = self.connection_added.notified();
            if let Some(connection) = self.connection_at(index) {
                if connection.is_attached() {
                    return connection;
                }
            }
            notified.await;
        }
    }
}
