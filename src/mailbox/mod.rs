//! The mailbox turns application messages into framed bytes and back.
//!
//! It owns one send buffer and one receive buffer, which are reused for every socket
//!  operation, plus a send queue and a receive queue. The queues are shared between the
//!  application and the reactor thread, each guarded by its own mutex. The buffers each have a
//!  single writer - the send loop and the receive loop of the transports the mailbox is wired
//!  to - which is enforced by handing them out as [SendSlot] and [ReceiveSlot] guards.
//!
//! ## Framing
//!
//! Stream transports receive in two phases: exactly `message_header_size_bytes()` bytes
//!  first, then - if the header declares a body - exactly the body's wire size. Datagram
//!  transports receive a whole datagram at once, which is framed in place and may contain
//!  several messages packed by `pack_group_send`.

pub mod message_buffer;
pub mod validator;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, error, trace, warn};
use crate::config::MailboxConfig;
use crate::error::{FramingError, TransportError};
use crate::mailbox::message_buffer::MessageBuffer;
use crate::mailbox::validator::{AcceptAll, ReceiveValidator};
use crate::message::{Message, MessageHeader};
use crate::wire::try_get_counted_struct;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct SendState {
    buffer: MessageBuffer,
}

struct ReceiveState<H: MessageHeader> {
    buffer: MessageBuffer,
    expecting_header: bool,
    write_offset: usize,
    expected_len: usize,
    validator: Box<dyn ReceiveValidator<H>>,
}

impl <H: MessageHeader> ReceiveState<H> {
    fn reset(&mut self) {
        self.expecting_header = true;
        self.write_offset = 0;
        self.expected_len = 0;
    }
}

pub struct Mailbox<H: MessageHeader> {
    config: MailboxConfig,

    send_queue: Mutex<VecDeque<Message<H>>>,
    send_queue_count: AtomicU32,
    send_ready: Notify,

    receive_queue: Mutex<VecDeque<Message<H>>>,
    receive_queue_count: AtomicU32,

    send_state: tokio::sync::Mutex<SendState>,
    packed_send_size: AtomicUsize,
    receive_state: tokio::sync::Mutex<ReceiveState<H>>,

    sender_attached: AtomicBool,
    receiver_attached: AtomicBool,
}

impl <H: MessageHeader> Mailbox<H> {
    /// a mailbox that accepts every well-formed incoming message
    pub fn new(config: MailboxConfig) -> anyhow::Result<Mailbox<H>> {
        Self::with_validator(config, Box::new(AcceptAll))
    }

    pub fn with_validator(config: MailboxConfig, validator: Box<dyn ReceiveValidator<H>>) -> anyhow::Result<Mailbox<H>> {
        config.validate()?;
        if Message::<H>::header_size() > config.max_message_size {
            anyhow::bail!("header of {} bytes does not fit into a message of {} bytes", Message::<H>::header_size(), config.max_message_size);
        }

        Ok(Mailbox {
            send_queue: Default::default(),
            send_queue_count: AtomicU32::new(0),
            send_ready: Notify::new(),
            receive_queue: Default::default(),
            receive_queue_count: AtomicU32::new(0),
            send_state: tokio::sync::Mutex::new(SendState {
                buffer: MessageBuffer::new(config.send_buffer_capacity()),
            }),
            packed_send_size: AtomicUsize::new(0),
            receive_state: tokio::sync::Mutex::new(ReceiveState {
                buffer: MessageBuffer::new(config.receive_buffer_capacity()),
                expecting_header: true,
                write_offset: 0,
                expected_len: 0,
                validator,
            }),
            sender_attached: AtomicBool::new(false),
            receiver_attached: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    /// the number of bytes read in the header phase of the framing protocol
    pub fn message_header_size_bytes(&self) -> usize {
        Message::<H>::header_size()
    }

    /// Queues a message for sending. Messages that can never fit into a single write are
    ///  rejected here rather than when they reach the front of the queue.
    pub fn push(&self, message: Message<H>) -> Result<(), TransportError> {
        let size = message.serialized_size();
        if size > self.config.max_message_size {
            error!("rejecting message {} of {} bytes - the limit is {} bytes", message.sequence_number(), size, self.config.max_message_size);
            return Err(TransportError::MessageTooLarge { size, limit: self.config.max_message_size });
        }

        lock(&self.send_queue).push_back(message);
        self.send_queue_count.fetch_add(1, Ordering::AcqRel);
        self.send_ready.notify_one();
        Ok(())
    }

    /// takes the oldest received message, transferring ownership to the caller
    pub fn retrieve(&self) -> Option<Message<H>> {
        let mut queue = lock(&self.receive_queue);
        let message = queue.pop_front()?;
        self.receive_queue_count.fetch_sub(1, Ordering::AcqRel);
        Some(message)
    }

    pub fn retrieve_all(&self) -> Vec<Message<H>> {
        let mut queue = lock(&self.receive_queue);
        let result = queue.drain(..).collect::<Vec<_>>();
        self.receive_queue_count.fetch_sub(result.len() as u32, Ordering::AcqRel);
        result
    }

    pub fn send_queue_count(&self) -> u32 {
        self.send_queue_count.load(Ordering::Acquire)
    }

    pub fn receive_queue_count(&self) -> u32 {
        self.receive_queue_count.load(Ordering::Acquire)
    }

    /// the number of bytes packed for sending that were not confirmed as sent yet
    pub fn packed_send_size(&self) -> usize {
        self.packed_send_size.load(Ordering::Acquire)
    }

    /// Exclusive access to the send buffer, held by a send loop for its lifetime
    pub async fn send_slot(&self) -> SendSlot<'_, H> {
        SendSlot {
            mailbox: self,
            state: self.send_state.lock().await,
        }
    }

    pub fn try_send_slot(&self) -> Option<SendSlot<'_, H>> {
        Some(SendSlot {
            mailbox: self,
            state: self.send_state.try_lock().ok()?,
        })
    }

    /// Exclusive access to the receive buffer, held by a receive loop for its lifetime
    pub async fn receive_slot(&self) -> ReceiveSlot<'_, H> {
        ReceiveSlot {
            mailbox: self,
            state: self.receive_state.lock().await,
        }
    }

    pub fn try_receive_slot(&self) -> Option<ReceiveSlot<'_, H>> {
        Some(ReceiveSlot {
            mailbox: self,
            state: self.receive_state.try_lock().ok()?,
        })
    }

    /// Claims the send side for one transport. A send loop holds the send buffer for its
    ///  whole lifetime, so a second transport sending from the same mailbox would never run.
    pub(crate) fn attach_sender(&self) -> bool {
        self.sender_attached.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub(crate) fn detach_sender(&self) {
        self.sender_attached.store(false, Ordering::Release);
    }

    /// Claims the receive side for one transport, see `attach_sender`
    pub(crate) fn attach_receiver(&self) -> bool {
        self.receiver_attached.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub(crate) fn detach_receiver(&self) {
        self.receiver_attached.store(false, Ordering::Release);
    }

    /// completes once a message was pushed since the last call, or immediately if a push
    ///  happened while nobody was waiting
    pub(crate) async fn wait_for_send(&self) {
        self.send_ready.notified().await;
    }

    fn pop_for_send(&self) -> Option<Message<H>> {
        let message = lock(&self.send_queue).pop_front()?;
        self.send_queue_count.fetch_sub(1, Ordering::AcqRel);
        Some(message)
    }

    fn enqueue_received(&self, message: Message<H>) {
        trace!("received message {}", message.sequence_number());
        lock(&self.receive_queue).push_back(message);
        self.receive_queue_count.fetch_add(1, Ordering::AcqRel);
    }
}

pub struct SendSlot<'a, H: MessageHeader> {
    mailbox: &'a Mailbox<H>,
    state: tokio::sync::MutexGuard<'a, SendState>,
}

impl <'a, H: MessageHeader> SendSlot<'a, H> {
    /// the size of the bytes currently packed and not yet sent, zero if there are none
    pub fn packed_size(&self) -> usize {
        self.state.buffer.len()
    }

    pub fn packed_bytes(&self) -> &[u8] {
        self.state.buffer.as_ref()
    }

    /// Marks the packed bytes as sent. Until this is called, packing returns the same bytes
    ///  again instead of taking the next message from the queue.
    pub fn on_message_sent(&mut self) {
        self.state.buffer.clear();
        self.mailbox.packed_send_size.store(0, Ordering::Release);
    }

    /// Packs the message at the front of the send queue into the send buffer.
    ///
    /// Returns the number of packed bytes, which is zero if the queue is empty.
    pub fn pack_send(&mut self) -> Result<usize, TransportError> {
        if self.packed_size() > 0 {
            return Ok(self.packed_size());
        }

        if let Some(mut message) = self.mailbox.pop_for_send() {
            self.pack_message(&mut message)?;
        }
        Ok(self.packed_size())
    }

    /// Packs up to `count` queued messages (all of them for `None`) contiguously into the
    ///  send buffer, bounded by the configured number of simultaneous sends and by the
    ///  maximum message size for the aggregate.
    pub fn pack_group_send(&mut self, count: Option<usize>) -> Result<usize, TransportError> {
        if self.packed_size() > 0 {
            return Ok(self.packed_size());
        }

        let limit = count
            .unwrap_or(usize::MAX)
            .min(self.mailbox.config.max_simultaneous_sends);

        for num_packed in 0..limit {
            let next_size = match lock(&self.mailbox.send_queue).front() {
                Some(msg) => msg.serialized_size(),
                None => break,
            };
            if num_packed > 0 && self.packed_size() + next_size > self.mailbox.config.max_message_size {
                break;
            }
            match self.mailbox.pop_for_send() {
                Some(mut message) => {
                    self.pack_message(&mut message)?;
                }
                None => break,
            }
        }

        trace!("packed {} bytes for group send", self.packed_size());
        Ok(self.packed_size())
    }

    fn pack_message(&mut self, message: &mut Message<H>) -> Result<usize, TransportError> {
        let size = message.serialized_size();
        let limit = self.mailbox.config.max_message_size;
        if self.packed_size() + size > limit {
            error!("cannot pack message {} of {} bytes - {} bytes already packed, limit {}", message.sequence_number(), size, self.packed_size(), limit);
            return Err(TransportError::MessageTooLarge { size: self.packed_size() + size, limit });
        }

        let packed = message.pack(&mut self.state.buffer);
        self.mailbox.packed_send_size.store(self.packed_size(), Ordering::Release);
        trace!("packed message {} ({} bytes)", message.sequence_number(), packed);
        Ok(packed)
    }
}

pub struct ReceiveSlot<'a, H: MessageHeader> {
    mailbox: &'a Mailbox<H>,
    state: tokio::sync::MutexGuard<'a, ReceiveState<H>>,
}

impl <'a, H: MessageHeader> ReceiveSlot<'a, H> {
    pub fn expecting_header(&self) -> bool {
        self.state.expecting_header
    }

    /// the number of bytes the next stream read must deliver
    pub fn expected_len(&self) -> usize {
        if self.state.expecting_header {
            Message::<H>::header_size()
        }
        else {
            self.state.expected_len
        }
    }

    /// The buffer region for the next stream read: sized for a header if a header is
    ///  expected, or for the declared body following the header otherwise
    pub fn writeable_buffer(&mut self) -> Result<&mut [u8], FramingError> {
        let len = self.expected_len();
        let offset = self.state.write_offset;
        let capacity = self.state.buffer.capacity();
        self.state.buffer.region_mut(offset, len)
            .ok_or(FramingError::MessageTooLarge { size: offset + len, capacity })
    }

    /// Processes `bytes_transferred` bytes that a stream read placed in `writeable_buffer()`.
    ///
    /// A corrupt header is dropped and a new header is expected. A header declaring a body
    ///  that cannot fit the receive buffer is reported as an error, since the stream cannot
    ///  be re-synchronized.
    pub fn unpack_receive(&mut self, bytes_transferred: usize) -> Result<(), FramingError> {
        if bytes_transferred < self.expected_len() {
            debug!("incomplete read of {} bytes, expected {} - dropping", bytes_transferred, self.expected_len());
            self.state.reset();
            return Ok(());
        }

        if !self.state.expecting_header {
            self.verify_and_unpack(0, Message::<H>::header_size() + self.state.expected_len);
            self.state.reset();
            return Ok(());
        }

        let header_size = Message::<H>::header_size();
        let header = match self.parse_header(0) {
            Ok(header) => header,
            Err(e) => {
                warn!("dropping message with corrupt header: {}", e);
                self.state.reset();
                return Ok(());
            }
        };

        let body_len = Message::<H>::declared_body_wire_size(&header);
        if body_len == 0 {
            self.verify_and_unpack(0, header_size);
            self.state.reset();
        }
        else if header_size + body_len > self.state.buffer.capacity() {
            self.state.reset();
            return Err(FramingError::MessageTooLarge { size: header_size + body_len, capacity: self.state.buffer.capacity() });
        }
        else {
            self.state.write_offset = header_size;
            self.state.expected_len = body_len;
            self.state.expecting_header = false;
        }
        Ok(())
    }

    /// the whole receive buffer, for reading a datagram
    pub fn datagram_buffer(&mut self) -> &mut [u8] {
        let capacity = self.state.buffer.capacity();
        self.state.buffer.region_mut(0, capacity)
            .unwrap_or_default()
    }

    /// Frames a datagram of `len` bytes that was received into `datagram_buffer()`, and
    ///  returns the number of messages that were added to the receive queue.
    ///
    /// A datagram whose content does not add up to whole messages is dropped from the first
    ///  message that does not fit.
    pub fn unpack_datagram(&mut self, len: usize) -> usize {
        self.state.reset();
        self.state.buffer.terminate_at(len);

        let header_size = Message::<H>::header_size();
        let mut offset = 0;
        let mut num_received = 0;
        while offset < len {
            if self.state.buffer.byte_at(offset) == Some(0) {
                break;
            }
            let header = match self.parse_header(offset) {
                Ok(header) => header,
                Err(e) => {
                    debug!("dropping datagram with corrupt header at offset {}: {}", offset, e);
                    break;
                }
            };

            let end = offset + header_size + Message::<H>::declared_body_wire_size(&header);
            if end > len {
                debug!("dropping truncated datagram: message at offset {} ends at {}, datagram has {} bytes", offset, end, len);
                break;
            }
            if self.verify_and_unpack(offset, end) {
                num_received += 1;
            }
            offset = end;
        }
        num_received
    }

    fn parse_header(&self, offset: usize) -> Result<H, FramingError> {
        let mut buf = self.state.buffer.from_offset(offset);
        try_get_counted_struct(&mut buf)
    }

    /// Checks that there is a message at `offset` at all: inside the buffer and not the zero
    ///  sentinel
    fn is_receive_buffer_valid(&self, offset: usize) -> bool {
        offset < self.state.buffer.capacity() && self.state.buffer.byte_at(offset) != Some(0)
    }

    /// Decodes the message in `offset..end` and queues it if the validator accepts it. The
    ///  validator only sees messages that decoded completely.
    fn verify_and_unpack(&mut self, offset: usize, end: usize) -> bool {
        if !self.is_receive_buffer_valid(offset) {
            return false;
        }

        let mut buf = &self.state.buffer.from_offset(offset)[..end - offset];
        let message = match Message::<H>::unpack(&mut buf) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping undecodable message: {}", e);
                return false;
            }
        };

        if !self.state.validator.is_valid(message.header()) {
            return false;
        }
        self.mailbox.enqueue_received(message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use crate::mailbox::validator::{IncreasingSequence, MockReceiveValidator};
    use crate::message::StandardHeader;
    use crate::test_util::{push_test_messages, TestHeader};

    fn standard_message(number: u32, body_len: usize) -> Message<StandardHeader> {
        Message::with_body(
            StandardHeader { sequence_number: number, sender_id: 9, ..StandardHeader::default() },
            vec![number as u8; body_len],
        ).unwrap()
    }

    /// feeds bytes through the two-phase stream framing, the way a stream read loop does
    fn feed_stream<H: MessageHeader>(mailbox: &Mailbox<H>, mut bytes: &[u8]) {
        let mut slot = mailbox.try_receive_slot().unwrap();
        while !bytes.is_empty() {
            let region = slot.writeable_buffer().unwrap();
            let n = region.len();
            region.copy_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
            slot.unpack_receive(n).unwrap();
        }
    }

    fn pack_one<H: MessageHeader>(mailbox: &Mailbox<H>) -> Vec<u8> {
        let mut slot = mailbox.try_send_slot().unwrap();
        slot.pack_send().unwrap();
        let result = slot.packed_bytes().to_vec();
        slot.on_message_sent();
        result
    }

    #[test]
    fn test_queue_counters() {
        let mailbox = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        push_test_messages(&mailbox, 0..5);
        assert_eq!(mailbox.send_queue_count(), 5);

        for remaining in (0..5).rev() {
            pack_one(&mailbox);
            assert_eq!(mailbox.send_queue_count(), remaining);
        }

        let mut slot = mailbox.try_send_slot().unwrap();
        assert_eq!(slot.pack_send().unwrap(), 0);
    }

    #[test]
    fn test_pack_send_keeps_unsent_bytes() {
        let mailbox = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        push_test_messages(&mailbox, 0..2);

        let mut slot = mailbox.try_send_slot().unwrap();
        let size = slot.pack_send().unwrap();
        assert_eq!(size, 20);
        let first = slot.packed_bytes().to_vec();

        assert_eq!(slot.pack_send().unwrap(), size);
        assert_eq!(slot.packed_bytes(), first.as_slice());
        assert_eq!(mailbox.send_queue_count(), 1);
        assert_eq!(mailbox.packed_send_size(), size);

        slot.on_message_sent();
        assert_eq!(slot.packed_size(), 0);
        assert_eq!(mailbox.packed_send_size(), 0);
        assert_eq!(slot.pack_send().unwrap(), size);
        assert_ne!(slot.packed_bytes(), first.as_slice());
    }

    #[rstest]
    #[case::header_only(0)]
    #[case::with_body(100)]
    #[case::maximum_size(1364)]
    fn test_stream_round_trip(#[case] body_len: usize) {
        let sender = Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap();
        let receiver = Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap();

        sender.push(standard_message(3, body_len)).unwrap();
        let bytes = pack_one(&sender);
        assert!(bytes.len() <= 1400);
        feed_stream(&receiver, &bytes);

        assert_eq!(receiver.receive_queue_count(), 1);
        let received = receiver.retrieve().unwrap();
        assert_eq!(received.header().sequence_number, 3);
        assert_eq!(received.header().sender_id, 9);
        assert_eq!(received.body().len(), body_len);
        assert!(received.body().iter().all(|b| *b == 3));
        assert_eq!(receiver.receive_queue_count(), 0);
    }

    #[test]
    fn test_one_byte_over_maximum_is_rejected() {
        let mailbox = Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap();
        assert_eq!(standard_message(0, 1364).serialized_size(), 1400);

        assert!(mailbox.push(standard_message(0, 1364)).is_ok());
        assert!(matches!(
            mailbox.push(standard_message(1, 1365)),
            Err(TransportError::MessageTooLarge { size: 1401, limit: 1400 })
        ));
        assert_eq!(mailbox.send_queue_count(), 1);
    }

    #[test]
    fn test_stream_framing_in_two_phases() {
        let sender = Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap();
        let receiver = Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap();
        sender.push(standard_message(1, 10)).unwrap();
        let bytes = pack_one(&sender);

        let mut slot = receiver.try_receive_slot().unwrap();
        assert!(slot.expecting_header());
        assert_eq!(slot.expected_len(), 28);

        slot.writeable_buffer().unwrap().copy_from_slice(&bytes[..28]);
        slot.unpack_receive(28).unwrap();
        assert!(!slot.expecting_header());
        assert_eq!(slot.expected_len(), 18);
        assert_eq!(receiver.receive_queue_count(), 0);

        slot.writeable_buffer().unwrap().copy_from_slice(&bytes[28..]);
        slot.unpack_receive(18).unwrap();
        assert!(slot.expecting_header());
        assert_eq!(receiver.receive_queue_count(), 1);
    }

    #[test]
    fn test_corrupt_header_is_dropped_and_framing_recovers() {
        let receiver = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        let sender = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        push_test_messages(&sender, [5]);

        let mut bytes = vec![7u8; 20];
        bytes.extend(pack_one(&sender));
        feed_stream(&receiver, &bytes);

        let received = receiver.retrieve_all();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].header().number, 5);
    }

    #[test]
    fn test_zero_sentinel_is_not_a_message() {
        let receiver = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        feed_stream(&receiver, &[0u8; 20]);
        assert_eq!(receiver.receive_queue_count(), 0);
    }

    #[test]
    fn test_oversized_declared_body_on_stream() {
        let config = MailboxConfig { max_simultaneous_receives: 1, ..MailboxConfig::default() };
        let receiver = Mailbox::<StandardHeader>::new(config).unwrap();

        let mut header = Vec::new();
        crate::wire::put_counted_struct(&mut header, &StandardHeader { body_size: 5000, ..StandardHeader::default() });

        let mut slot = receiver.try_receive_slot().unwrap();
        slot.writeable_buffer().unwrap().copy_from_slice(&header);
        assert_eq!(
            slot.unpack_receive(28),
            Err(FramingError::MessageTooLarge { size: 28 + 8 + 5000, capacity: 1400 }),
        );
        assert!(slot.expecting_header());
    }

    #[test]
    fn test_group_send_and_datagram_unpack() {
        let config = MailboxConfig { max_simultaneous_sends: 4, ..MailboxConfig::default() };
        let sender = Mailbox::<StandardHeader>::new(config.clone()).unwrap();
        let receiver = Mailbox::<StandardHeader>::new(config).unwrap();
        for i in 0..6 {
            sender.push(standard_message(i, i as usize)).unwrap();
        }

        let mut send_slot = sender.try_send_slot().unwrap();
        let packed = send_slot.pack_group_send(None).unwrap();
        let expected: usize = (0..4).map(|i| standard_message(i, i as usize).serialized_size()).sum();
        assert_eq!(packed, expected);
        assert_eq!(sender.send_queue_count(), 2);

        let mut receive_slot = receiver.try_receive_slot().unwrap();
        receive_slot.datagram_buffer()[..packed].copy_from_slice(send_slot.packed_bytes());
        assert_eq!(receive_slot.unpack_datagram(packed), 4);
        drop(receive_slot);

        let numbers = receiver.retrieve_all().iter()
            .map(|m| m.header().sequence_number)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
    }

    #[rstest]
    #[case::explicit_count(Some(2), 8, 2)]
    #[case::bounded_by_sends(None, 3, 3)]
    #[case::bounded_by_size(None, 100, 70)]
    fn test_group_send_bounds(#[case] count: Option<usize>, #[case] max_simultaneous_sends: usize, #[case] expected_messages: usize) {
        let config = MailboxConfig { max_simultaneous_sends, ..MailboxConfig::default() };
        let mailbox = Mailbox::<TestHeader>::new(config).unwrap();
        push_test_messages(&mailbox, 0..100);

        let mut slot = mailbox.try_send_slot().unwrap();
        let packed = slot.pack_group_send(count).unwrap();
        assert_eq!(packed, expected_messages * 20);
        assert!(packed <= 1400);
        assert_eq!(mailbox.send_queue_count() as usize, 100 - expected_messages);
    }

    #[test]
    fn test_truncated_datagram_is_dropped() {
        let sender = Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap();
        let receiver = Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap();
        sender.push(standard_message(1, 50)).unwrap();
        let bytes = pack_one(&sender);

        let mut slot = receiver.try_receive_slot().unwrap();
        slot.datagram_buffer()[..bytes.len() - 1].copy_from_slice(&bytes[..bytes.len() - 1]);
        assert_eq!(slot.unpack_datagram(bytes.len() - 1), 0);

        slot.datagram_buffer()[..bytes.len()].copy_from_slice(&bytes);
        assert_eq!(slot.unpack_datagram(bytes.len()), 1);
    }

    #[test]
    fn test_sequence_validator_drops_stale_datagrams() {
        let sender = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        let receiver = Mailbox::<TestHeader>::with_validator(MailboxConfig::default(), Box::new(IncreasingSequence::default())).unwrap();
        push_test_messages(&sender, [1, 3, 2, 3, 4]);

        for _ in 0..5 {
            let bytes = pack_one(&sender);
            let mut slot = receiver.try_receive_slot().unwrap();
            slot.datagram_buffer()[..bytes.len()].copy_from_slice(&bytes);
            slot.unpack_datagram(bytes.len());
        }

        let numbers = receiver.retrieve_all().iter()
            .map(|m| m.header().number)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 3, 4]);
    }

    #[test]
    fn test_undecodable_body_does_not_advance_sequence() {
        let receiver = Mailbox::<StandardHeader>::with_validator(MailboxConfig::default(), Box::new(IncreasingSequence::default())).unwrap();

        let mut corrupt = Vec::new();
        crate::wire::put_counted_struct(&mut corrupt, &StandardHeader { sequence_number: 5, body_size: 10, ..StandardHeader::default() });
        crate::wire::put_counted_bytes(&mut corrupt, &[1u8; 9]);
        corrupt.push(1);

        let mut slot = receiver.try_receive_slot().unwrap();
        slot.datagram_buffer()[..corrupt.len()].copy_from_slice(&corrupt);
        assert_eq!(slot.unpack_datagram(corrupt.len()), 0);
        drop(slot);

        let sender = Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap();
        sender.push(standard_message(5, 10)).unwrap();
        let bytes = pack_one(&sender);
        let mut slot = receiver.try_receive_slot().unwrap();
        slot.datagram_buffer()[..bytes.len()].copy_from_slice(&bytes);
        assert_eq!(slot.unpack_datagram(bytes.len()), 1);
        drop(slot);

        assert_eq!(receiver.retrieve().unwrap().header().sequence_number, 5);
    }

    #[test]
    fn test_one_transport_per_side() {
        let mailbox = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        assert!(mailbox.attach_receiver());
        assert!(!mailbox.attach_receiver());
        assert!(mailbox.attach_sender());
        assert!(!mailbox.attach_sender());

        mailbox.detach_receiver();
        assert!(mailbox.attach_receiver());
    }

    #[test]
    fn test_validator_rejection_is_not_queued() {
        let mut validator = MockReceiveValidator::<TestHeader>::new();
        validator.expect_is_valid()
            .times(2)
            .returning(|h| h.number % 2 == 0);
        let receiver = Mailbox::<TestHeader>::with_validator(MailboxConfig::default(), Box::new(validator)).unwrap();

        let sender = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        push_test_messages(&sender, [1, 2]);
        let mut bytes = pack_one(&sender);
        bytes.extend(pack_one(&sender));
        feed_stream(&receiver, &bytes);

        let received = receiver.retrieve_all();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].header().number, 2);
    }

    #[test]
    fn test_retrieve_transfers_ownership_in_order() {
        let sender = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        let receiver = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        push_test_messages(&sender, 0..3);
        for _ in 0..3 {
            feed_stream(&receiver, &pack_one(&sender));
        }
        assert_eq!(receiver.receive_queue_count(), 3);

        assert_eq!(receiver.retrieve().unwrap().header().number, 0);
        assert_eq!(receiver.receive_queue_count(), 2);
        let rest = receiver.retrieve_all();
        assert_eq!(rest.iter().map(|m| m.header().number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(receiver.receive_queue_count(), 0);
        assert!(receiver.retrieve().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_send_after_push() {
        let mailbox = Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap();
        push_test_messages(&mailbox, [1]);
        tokio::time::timeout(std::time::Duration::from_secs(1), mailbox.wait_for_send())
            .await
            .unwrap();
    }
}
