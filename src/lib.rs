//! Message transport over TCP and UDP: application messages are queued in a mailbox, framed
//!  into bytes and moved over a socket by continuous asynchronous send and receive loops.
//!
//! ## Design
//!
//! * A [server::Server] owns one reactor thread and any number of transports running on it
//!   * receive and send completions of all its transports are processed on that thread
//!   * application threads interact with transports only through mailboxes (push, retrieve)
//!      and read-only diagnostics (connections, queue counts, states)
//! * A [transport::Transport] is a generic driver with a receive role, a send role or both.
//!    Protocol specifics are strategy objects:
//!   * TCP session: listens for exactly one peer, then receives from it
//!   * TCP client: connects (blocking, with retries), then sends
//!   * UDP listener: bound socket that discovers peers from incoming datagrams and can reply
//!   * UDP client: sends to a selected peer, and can receive replies
//! * Sending can be paced: a steady interval between the start of consecutive sends, with
//!    sub-millisecond accuracy
//! * There is no retransmission, reordering or reconnection. TCP delivers in order; UDP
//!    messages may be lost, and stale or reordered ones are dropped if the mailbox is
//!    configured to validate sequence numbers
//!
//! ## Wire format
//!
//! All numbers are little endian. Each message is
//!
//! ```ascii
//! 0: element count of the header (u64) - always 1
//! 8: header struct (fixed size, defined by the header type)
//! *: element count of the body (u64) - the body length in bytes
//! *: body bytes
//! ```
//!
//! The body part is present only if the header declares a body size greater than zero. A
//!  single write (a message or a group of packed messages) is at most 1400 bytes, which keeps
//!  UDP datagrams below common MTUs.
//!
//! Stream sockets are read in two phases: first the fixed-size header part, and then exactly
//!  as many bytes as the header declares for the body. A datagram contains one or several
//!  whole messages.

pub mod clock;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod reactor;
pub mod server;
pub mod socket_holder;
pub mod tcp;
pub mod transport;
pub mod udp;
pub mod wire;

#[cfg(test)]
mod test_util;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
