use std::io;
use thiserror::Error;
use crate::endpoint::Endpoint;

/// Failures surfaced by sockets, transports and the send path of a mailbox.
///
/// `Socket` and `MessageTooLarge` are contract violations between layers (double open, a
///  message that can never fit the wire), the rest are environmental and can be handled by
///  the caller.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Socket(String),

    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("socket is not open")]
    NotOpen,

    #[error("message of {size} bytes exceeds the limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("mailbox is already used for {0} by another transport")]
    MailboxInUse(&'static str),

    #[error("transport does not support {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures decoding framed bytes. These never cross the async boundary: the mailbox drops
///  the offending message and resumes expecting a header.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum FramingError {
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    BufferUnderflow { needed: usize, remaining: usize },

    #[error("unexpected element count {actual}, expected {expected}")]
    BadElementCount { expected: u64, actual: u64 },

    #[error("declared message of {size} bytes does not fit the receive buffer of {capacity} bytes")]
    MessageTooLarge { size: usize, capacity: usize },
}
