use std::time::Duration;
use anyhow::bail;

/// The largest single packed message (or packed group of messages) that goes into one write.
///  1400 bytes stays below common Ethernet MTUs so that UDP datagrams are never fragmented.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 1400;

/// The OS-level receive buffer size that is configured every time a socket is opened.
pub const DEFAULT_SOCKET_RECEIVE_BUFFER_SIZE_BYTES: usize = 65535;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MailboxConfig {
    /// Upper bound for a single packed message as well as for a packed group. This is a hard
    ///  limit, packing beyond it is rejected.
    pub max_message_size: usize,

    /// This is the maximum number of queued messages that `pack_group_send` combines into a
    ///  single write.
    pub max_simultaneous_sends: usize,

    /// The receive buffer holds this many messages of maximum size. For datagrams, this bounds
    ///  how many packed messages a single datagram can carry.
    pub max_simultaneous_receives: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        MailboxConfig {
            max_message_size: MAX_MESSAGE_SIZE_BYTES,
            max_simultaneous_sends: 1,
            max_simultaneous_receives: 5,
        }
    }
}

impl MailboxConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_message_size == 0 {
            bail!("maximum message size must be positive");
        }
        if self.max_message_size > MAX_MESSAGE_SIZE_BYTES {
            bail!("maximum message size {} exceeds the protocol limit of {} bytes", self.max_message_size, MAX_MESSAGE_SIZE_BYTES);
        }
        if self.max_simultaneous_sends == 0 {
            bail!("at least one message must fit into the send buffer");
        }
        if self.max_simultaneous_receives == 0 {
            bail!("at least one message must fit into the receive buffer");
        }
        Ok(())
    }

    pub fn send_buffer_capacity(&self) -> usize {
        self.max_message_size
    }

    pub fn receive_buffer_capacity(&self) -> usize {
        self.max_message_size * self.max_simultaneous_receives
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SocketConfig {
    pub receive_buffer_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            receive_buffer_size: DEFAULT_SOCKET_RECEIVE_BUFFER_SIZE_BYTES,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SendConfig {
    /// Minimum time between the start of two consecutive sends. Zero sends as fast as the
    ///  queue allows.
    pub send_interval: Duration,

    /// `None` writes one message at a time, `Some(n)` packs up to `n` queued messages (bounded
    ///  by the mailbox's capacity) into one write
    pub group_count: Option<usize>,
}

impl SendConfig {
    pub fn steady(send_interval_micros: u64) -> SendConfig {
        SendConfig {
            send_interval: Duration::from_micros(send_interval_micros),
            group_count: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.group_count == Some(0) {
            bail!("a group send must pack at least one message");
        }
        Ok(())
    }
}
