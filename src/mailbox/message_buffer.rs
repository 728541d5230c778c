//! Fixed-capacity byte buffers owned by a mailbox and reused across all socket operations.
//!
//! * backed by a pre-allocated buffer that never grows
//! * implements `BufMut` so messages are packed through the `bytes` API
//! * capacity is a hard ceiling: regions beyond it are never handed out, and writing past
//!   it panics instead of truncating

use std::fmt::{Debug, Formatter};
use bytes::buf::UninitSlice;

pub struct MessageBuffer {
    buf: Vec<u8>,
    len: usize,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> MessageBuffer {
        MessageBuffer {
            buf: vec![0; capacity],
            len: 0,
        }
    }

    /// the number of valid bytes, i.e. bytes packed so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// A writable region of the underlying buffer, independent of `len`. Returns `None` if
    ///  the region does not fit into the buffer's capacity.
    pub fn region_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)?;
        if end > self.capacity() {
            return None;
        }
        Some(&mut self.buf[offset..end])
    }

    /// the readable bytes from `offset` up to the buffer's capacity
    pub fn from_offset(&self, offset: usize) -> &[u8] {
        &self.buf[offset.min(self.capacity())..]
    }

    pub fn byte_at(&self, offset: usize) -> Option<u8> {
        self.buf.get(offset).copied()
    }

    /// Writes the zero sentinel after the last valid byte, if there is room for it
    pub fn terminate_at(&mut self, offset: usize) {
        if let Some(b) = self.buf.get_mut(offset) {
            *b = 0;
        }
    }
}

impl Debug for MessageBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl AsRef<[u8]> for MessageBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

unsafe impl bytes::BufMut for MessageBuffer {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.len
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.len + cnt <= self.capacity());
        self.len += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.len..])
    }
}
