//! Field-level wire encoding shared by all message headers and bodies.
//!
//! Every field on the wire is preceded by an 8 byte element count: `1` for a header struct,
//!  the number of bytes for a body. All numbers are little-endian, written through explicit
//!  `bytes` accessors rather than by copying struct memory, so the encoding is identical on
//!  big-endian hosts.
//!
//! ```ascii
//! [u64 LE: 1][header fields]  ([u64 LE: body length][body bytes])?
//! ```

use bytes::{Buf, BufMut, Bytes};
use crate::error::FramingError;

pub const ELEMENT_COUNT_LEN: usize = std::mem::size_of::<u64>();

/// A fixed-size struct with an exact little-endian representation
pub trait WireStruct: Sized {
    /// length of the struct's fields on the wire, excluding the element count
    const SERIALIZED_LEN: usize;

    fn ser(&self, buf: &mut impl BufMut);

    fn deser(buf: &mut impl Buf) -> Result<Self, FramingError>;
}

macro_rules! checked_get_impl {
    ($checked_getter: ident, $ty:ty, $getter: ident) => {
        fn $checked_getter(&mut self) -> Result<$ty, FramingError> {
            self.ensure_remaining(std::mem::size_of::<$ty>())?;
            Ok(self.$getter())
        }
    }
}

pub trait CheckedBuf: Buf {
    fn ensure_remaining(&mut self, needed: usize) -> Result<(), FramingError> {
        if self.remaining() < needed {
            return Err(FramingError::BufferUnderflow { needed, remaining: self.remaining() });
        }
        Ok(())
    }

    checked_get_impl!(checked_u8, u8, get_u8);
    checked_get_impl!(checked_u16_le, u16, get_u16_le);
    checked_get_impl!(checked_u32_le, u32, get_u32_le);
    checked_get_impl!(checked_u64_le, u64, get_u64_le);
    checked_get_impl!(checked_i32_le, i32, get_i32_le);
    checked_get_impl!(checked_i64_le, i64, get_i64_le);
}

impl <T: Buf> CheckedBuf for T {
}

pub fn put_counted_struct<T: WireStruct>(buf: &mut impl BufMut, value: &T) {
    buf.put_u64_le(1);
    value.ser(buf);
}

pub fn try_get_counted_struct<T: WireStruct>(buf: &mut impl Buf) -> Result<T, FramingError> {
    let count = buf.checked_u64_le()?;
    if count != 1 {
        return Err(FramingError::BadElementCount { expected: 1, actual: count });
    }
    buf.ensure_remaining(T::SERIALIZED_LEN)?;
    T::deser(buf)
}

pub fn put_counted_bytes(buf: &mut impl BufMut, bytes: &[u8]) {
    buf.put_u64_le(bytes.len() as u64);
    buf.put_slice(bytes);
}

pub fn try_get_counted_bytes(buf: &mut impl Buf, expected_len: usize) -> Result<Bytes, FramingError> {
    let count = buf.checked_u64_le()?;
    if count != expected_len as u64 {
        return Err(FramingError::BadElementCount { expected: expected_len as u64, actual: count });
    }
    buf.ensure_remaining(expected_len)?;
    Ok(buf.copy_to_bytes(expected_len))
}

/// size of a counted struct on the wire
pub const fn counted_struct_len<T: WireStruct>() -> usize {
    ELEMENT_COUNT_LEN + T::SERIALIZED_LEN
}

/// size of a counted body on the wire - an empty body is not written at all
pub const fn counted_bytes_len(len: usize) -> usize {
    if len == 0 { 0 } else { ELEMENT_COUNT_LEN + len }
}
