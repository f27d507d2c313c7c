//! Primitive SSH encoding.
//!
//! [`Reader`] consumes `uint32`, `boolean` and `string` values from a byte
//! slice; [`WireWrite`] appends them to a [`BytesMut`]. Payload types build
//! on both through the [`Payload`] trait.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, Result};

/// A typed payload with a fixed field layout.
pub trait Payload: Sized {
    /// Append the encoded fields to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Read the fields from `reader`, leaving any remaining input untouched.
    fn read(reader: &mut Reader<'_>) -> Result<Self>;

    /// Decode a complete payload, rejecting trailing bytes.
    fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let payload = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(payload)
    }

    /// Encode into a fresh immutable buffer.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Cursor over an encoded payload.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Create a reader over `buf`.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn require(&self, field: &'static str, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::truncated(field, needed, self.buf.remaining()));
        }
        Ok(())
    }

    /// Read a single byte.
    pub fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        self.require(field, 1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a big-endian `uint32`.
    pub fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        self.require(field, 4)?;
        Ok(self.buf.get_u32())
    }

    /// Read a `boolean`. Any non-zero value is true.
    pub fn read_bool(&mut self, field: &'static str) -> Result<bool> {
        Ok(self.read_u8(field)? != 0)
    }

    /// Read a length-prefixed byte string.
    pub fn read_bytes(&mut self, field: &'static str) -> Result<&'a [u8]> {
        let len = self.read_u32(field)? as usize;
        self.require(field, len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self, field: &'static str) -> Result<String> {
        let raw = self.read_bytes(field)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { field })
    }

    /// Fail if any input is left.
    pub const fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes {
                count: self.buf.len(),
            })
        }
    }
}

/// SSH primitive writers for [`BytesMut`].
pub trait WireWrite {
    /// Append a `boolean`.
    fn put_ssh_bool(&mut self, value: bool);

    /// Append a length-prefixed byte string.
    fn put_ssh_bytes(&mut self, value: &[u8]);

    /// Append a length-prefixed UTF-8 string.
    fn put_ssh_string(&mut self, value: &str) {
        self.put_ssh_bytes(value.as_bytes());
    }
}

impl WireWrite for BytesMut {
    fn put_ssh_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    fn put_ssh_bytes(&mut self, value: &[u8]) {
        self.put_u32(value.len() as u32);
        self.put_slice(value);
    }
}
