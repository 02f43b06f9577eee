//! Binary codec
//!
//! Fixed-width big-endian primitives shared by every on-disk structure.
//! Encoding writes straight into a `Vec<u8>` through `bytes::BufMut`
//! (whose `put_u16`/`put_u32` are big-endian); decoding goes through
//! [`Decoder`], which checks the remaining length before every read so a
//! truncated buffer surfaces as a format error instead of a panic.

use bytes::Buf;

use crate::error::{LhdbError, Result};

/// Bounds-checked big-endian reader over a byte slice
pub struct Decoder<'a> {
    buf: &'a [u8],
    /// What is being decoded, for error messages
    what: &'static str,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(LhdbError::Format(format!(
                "truncated {}: need {} bytes, {} left",
                self.what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    /// Borrow the next `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Read a run of `count` u32 values
    pub fn read_u32_array(&mut self, count: usize) -> Result<Vec<u32>> {
        self.need(count * 4)?;
        Ok((0..count).map(|_| self.buf.get_u32()).collect())
    }
}

/// Encode a u32 slice as consecutive big-endian words
pub fn encode_u32_array(values: &[u32]) -> Vec<u8> {
    use bytes::BufMut;

    let mut out = Vec::with_capacity(values.len() * 4);
    for value in values {
        out.put_u32(*value);
    }
    out
}

/// Narrow a file offset or size to the 32-bit on-disk width
pub fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| LhdbError::Format(format!("{} {} exceeds 32-bit field", what, value)))
}
