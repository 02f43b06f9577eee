//! Stored value envelope
//!
//! ```text
//! inline:  [0u8][raw bytes ...]                 (values ≤ 512 bytes)
//! spilled: [1u8][offset u32][size u32]          (value stored separately)
//! ```

use bytes::BufMut;

use crate::codec::Decoder;
use crate::error::{LhdbError, Result};
use crate::format::INLINE_VALUE_LIMIT;

const TAG_INLINE: u8 = 0;
const TAG_SPILLED: u8 = 1;

/// A value as held inside a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// Small value kept in the bucket itself
    Inline(Vec<u8>),
    /// Large value in its own allocator region
    Spilled { offset: u32, size: u32 },
}

impl StoredValue {
    /// True when a value of `len` bytes must be spilled
    pub fn needs_spill(len: usize) -> bool {
        len > INLINE_VALUE_LIMIT
    }

    /// The allocator region of a spilled value
    pub fn spilled_region(&self) -> Option<(u64, u64)> {
        match self {
            StoredValue::Spilled { offset, size } if *offset > 0 && *size > 0 => {
                Some((*offset as u64, *size as u64))
            }
            _ => None,
        }
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self, StoredValue::Spilled { .. })
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            StoredValue::Inline(bytes) => 1 + bytes.len(),
            StoredValue::Spilled { .. } => 9,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            StoredValue::Inline(bytes) => {
                out.put_u8(TAG_INLINE);
                out.put_slice(bytes);
            }
            StoredValue::Spilled { offset, size } => {
                out.put_u8(TAG_SPILLED);
                out.put_u32(*offset);
                out.put_u32(*size);
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes, "stored value");
        match dec.read_u8()? {
            TAG_INLINE => Ok(StoredValue::Inline(bytes[1..].to_vec())),
            TAG_SPILLED => {
                let offset = dec.read_u32()?;
                let size = dec.read_u32()?;
                if !dec.is_empty() {
                    return Err(LhdbError::format("trailing bytes after spilled value"));
                }
                Ok(StoredValue::Spilled { offset, size })
            }
            tag => Err(LhdbError::Format(format!("invalid stored value tag {}", tag))),
        }
    }
}
