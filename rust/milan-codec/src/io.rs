//! Byte-oriented adapters between codecs and their buffers.

use bytes::BytesMut;
use milan_wire::{Error, Result};

/// Sink of encoded bytes.
pub trait WriteBytes: Send {
    fn put(&mut self, bytes: &[u8]);
}

impl WriteBytes for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl WriteBytes for BytesMut {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Sink that discards bytes and counts them. Lets callers size a
/// message before committing to a buffer.
#[derive(Default)]
pub struct SizeSink {
    len: usize,
}

impl SizeSink {
    pub fn new() -> Self {
        SizeSink::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }
}

impl WriteBytes for SizeSink {
    fn put(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

/// Cursor over a borrowed input buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::eof("input exhausted"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Consume everything that is left.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}
