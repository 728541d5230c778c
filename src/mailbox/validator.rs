#[cfg(test)] use mockall::automock;
use tracing::{trace, warn};
use crate::message::MessageHeader;

/// Decides whether a structurally sound header should be accepted into the receive queue.
///  Rejected messages are dropped silently.
#[cfg_attr(test, automock)]
pub trait ReceiveValidator<H: Send + 'static>: Send {
    fn is_valid(&mut self, header: &H) -> bool;
}

/// accepts every message that could be decoded
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl <H: MessageHeader> ReceiveValidator<H> for AcceptAll {
    fn is_valid(&mut self, _header: &H) -> bool {
        true
    }
}

/// Accepts only messages whose sequence number is strictly greater than that of the last
///  accepted message. Stale, duplicated and reordered messages are dropped rather than
///  buffered; a gap in the numbering is logged, but the message is accepted.
#[derive(Clone, Copy, Debug, Default)]
pub struct IncreasingSequence {
    last_accepted: Option<u32>,
}

impl IncreasingSequence {
    pub fn last_accepted(&self) -> Option<u32> {
        self.last_accepted
    }
}

impl <H: MessageHeader> ReceiveValidator<H> for IncreasingSequence {
    fn is_valid(&mut self, header: &H) -> bool {
        let number = header.sequence_number();
        match self.last_accepted {
            Some(last) if number <= last => {
                trace!("dropping message {} - last accepted was {}", number, last);
                false
            }
            Some(last) => {
                if number - last > 1 {
                    warn!("skipped {} message(s): last accepted {}, now {}", number - last - 1, last, number);
                }
                self.last_accepted = Some(number);
                true
            }
            None => {
                self.last_accepted = Some(number);
                true
            }
        }
    }
}
