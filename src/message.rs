use std::fmt::Debug;
use bytes::{Buf, BufMut, Bytes};
use crate::clock::utc_time_micros;
use crate::error::{FramingError, TransportError};
use crate::wire::{counted_bytes_len, counted_struct_len, put_counted_bytes, put_counted_struct, try_get_counted_bytes, try_get_counted_struct, CheckedBuf, WireStruct};

/// The fixed-size metadata in front of every message. The declared body size must be
///  recoverable from the header alone, since that is what a receiver uses to decide how many
///  more bytes belong to the message.
pub trait MessageHeader: WireStruct + Clone + Debug + Send + Sync + 'static {
    /// Whether messages with this header can carry a body
    const HAS_BODY: bool = false;

    fn sequence_number(&self) -> u32;

    /// declared length of the message body in bytes
    fn body_size(&self) -> u32 {
        0
    }

    fn set_body_size(&mut self, _body_size: u32) {
    }

    /// called right before the header is serialized for sending
    fn on_pack(&mut self) {
    }
}

/// General-purpose header: sequence number, sender identity, send timestamp (stamped when
///  the message is packed) and the body size.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StandardHeader {
    pub sequence_number: u32,
    pub send_time_micros: u64,
    pub sender_id: u32,
    pub body_size: u32,
}

impl WireStruct for StandardHeader {
    const SERIALIZED_LEN: usize = 4 + 8 + 4 + 4;

    fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.sequence_number);
        buf.put_u64_le(self.send_time_micros);
        buf.put_u32_le(self.sender_id);
        buf.put_u32_le(self.body_size);
    }

    fn deser(buf: &mut impl Buf) -> Result<Self, FramingError> {
        Ok(StandardHeader {
            sequence_number: buf.checked_u32_le()?,
            send_time_micros: buf.checked_u64_le()?,
            sender_id: buf.checked_u32_le()?,
            body_size: buf.checked_u32_le()?,
        })
    }
}

impl MessageHeader for StandardHeader {
    const HAS_BODY: bool = true;

    fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    fn body_size(&self) -> u32 {
        self.body_size
    }

    fn set_body_size(&mut self, body_size: u32) {
        self.body_size = body_size;
    }

    fn on_pack(&mut self) {
        self.send_time_micros = utc_time_micros();
    }
}

/// An application message: a header plus an optional body.
///
/// Messages are owned values. Pushing one into a mailbox moves it into the send queue, and
///  retrieving one from a mailbox hands ownership to the caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message<H> {
    header: H,
    body: Bytes,
}

impl <H: MessageHeader> Message<H> {
    pub fn new(header: H) -> Message<H> {
        Message {
            header,
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut header: H, body: impl Into<Bytes>) -> Result<Message<H>, TransportError> {
        let body = body.into();
        if !body.is_empty() && !H::HAS_BODY {
            return Err(TransportError::Unsupported("message bodies for this header type"));
        }
        let body_size: u32 = body.len().try_into()
            .map_err(|_| TransportError::MessageTooLarge { size: body.len(), limit: u32::MAX as usize })?;
        header.set_body_size(body_size);

        Ok(Message {
            header,
            body,
        })
    }

    pub fn header(&self) -> &H {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut H {
        &mut self.header
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn sequence_number(&self) -> u32 {
        self.header.sequence_number()
    }

    pub fn into_parts(self) -> (H, Bytes) {
        (self.header, self.body)
    }

    /// wire size of the header including its element count
    pub const fn header_size() -> usize {
        counted_struct_len::<H>()
    }

    /// the number of bytes this message occupies on the wire
    pub fn serialized_size(&self) -> usize {
        Self::header_size() + counted_bytes_len(self.body.len())
    }

    /// Number of bytes following the header, as declared by a header. Zero means that the
    ///  header is the complete message.
    pub fn declared_body_wire_size(header: &H) -> usize {
        counted_bytes_len(header.body_size() as usize)
    }

    /// Serializes the message. The caller is responsible for `buf` having room for
    ///  `serialized_size()` bytes.
    pub fn pack(&mut self, buf: &mut impl BufMut) -> usize {
        self.header.on_pack();
        put_counted_struct(buf, &self.header);
        if !self.body.is_empty() {
            put_counted_bytes(buf, &self.body);
        }
        self.serialized_size()
    }

    pub fn unpack(buf: &mut impl Buf) -> Result<Message<H>, FramingError> {
        let header: H = try_get_counted_struct(buf)?;
        let body_size = header.body_size() as usize;
        let body = if body_size == 0 {
            Bytes::new()
        }
        else {
            try_get_counted_bytes(buf, body_size)?
        };

        Ok(Message {
            header,
            body,
        })
    }
}
