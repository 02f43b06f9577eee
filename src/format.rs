//! On-disk format
//!
//! ## File Layout (all integers big-endian)
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (256 bytes)                                           │
//! │   Magic "LHDB" (4) | Version u32 (4) | AllocDirty u8 (1)     │
//! │   base | fsize | n | m | s | o   (u32 each), zero padded     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Page-table directory @256: 256 × u32 page-table offsets      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ First page table @1280: 512 × u32 page offsets               │
//! ├──────────────────────────────────────────────────────────────┤
//! │ First page @3328: 256 × (offset u32, size u32) bucket refs   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ base @5376: buddy-managed region                             │
//! │   page tables, pages, encoded buckets, spilled values        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ fsize: allocator blob  [len u32][BuddyAllocator encoding]    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use bytes::BufMut;

use crate::codec::Decoder;
use crate::error::{LhdbError, Result};

// =============================================================================
// Layout Constants
// =============================================================================

/// Magic bytes identifying an lhdb file
pub const MAGIC: &[u8; 4] = b"LHDB";

/// Current format version
pub const VERSION: u32 = 1;

/// Header size, including padding
pub const HEADER_SIZE: u64 = 256;

/// Byte position of the allocator-dirty flag inside the header
pub const DIRTY_FLAG_OFFSET: u64 = 8;

/// Page-table directory: 256 page-table slots right after the header
pub const DIRECTORY_OFFSET: u64 = HEADER_SIZE;
pub const DIRECTORY_SLOTS: usize = 256;
pub const DIRECTORY_BYTES: u64 = DIRECTORY_SLOTS as u64 * 4;

/// A page table holds 512 page offsets
pub const PAGE_TABLE_SLOTS: usize = 512;
pub const PAGE_TABLE_BYTES: u64 = PAGE_TABLE_SLOTS as u64 * 4;

/// A page holds 256 (offset, size) bucket references
pub const PAGE_SLOTS: usize = 256;
pub const PAGE_BYTES: u64 = PAGE_SLOTS as u64 * 8;

/// Fixed position of page table 0 (outside the allocator)
pub const FIRST_PAGE_TABLE_OFFSET: u64 = DIRECTORY_OFFSET + DIRECTORY_BYTES;

/// Fixed position of page 0 (outside the allocator)
pub const FIRST_PAGE_OFFSET: u64 = FIRST_PAGE_TABLE_OFFSET + PAGE_TABLE_BYTES;

/// First allocator-managed byte of a fresh file
pub const INITIAL_BASE: u64 = FIRST_PAGE_OFFSET + PAGE_BYTES;

/// Buckets per growth step (one page)
pub const BUCKETS_PER_PAGE: u32 = PAGE_SLOTS as u32;

/// Initial hash modulus and capacity
pub const INITIAL_BUCKETS: u32 = BUCKETS_PER_PAGE;

/// Hard bucket ceiling: 256 page tables × 512 pages × 256 buckets
pub const MAX_BUCKETS: u32 = 1 << 25;

/// Values above this many bytes are spilled out of their bucket
pub const INLINE_VALUE_LIMIT: usize = 512;

// =============================================================================
// Header
// =============================================================================

/// Decoded file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Allocator state on disk may not match the directory
    pub allocator_dirty: bool,
    /// First allocator-managed offset
    pub base: u32,
    /// Logical end of managed data (allocator blob position)
    pub fsize: u32,
    /// Allocated bucket capacity
    pub capacity: u32,
    /// Hash modulus
    pub modulus: u32,
    /// Split pointer
    pub split: u32,
    /// Live key count
    pub count: u32,
}

impl Header {
    /// Header of a freshly initialized file
    pub fn fresh() -> Self {
        Self {
            allocator_dirty: false,
            base: INITIAL_BASE as u32,
            fsize: INITIAL_BASE as u32,
            capacity: INITIAL_BUCKETS,
            modulus: INITIAL_BUCKETS,
            split: 0,
            count: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        buf.put_slice(MAGIC);
        buf.put_u32(VERSION);
        buf.put_u8(self.allocator_dirty as u8);
        buf.put_u32(self.base);
        buf.put_u32(self.fsize);
        buf.put_u32(self.capacity);
        buf.put_u32(self.modulus);
        buf.put_u32(self.split);
        buf.put_u32(self.count);
        buf.resize(HEADER_SIZE as usize, 0);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes, "header");
        let magic = dec.read_bytes(4)?;
        if magic != MAGIC {
            return Err(LhdbError::Format(format!(
                "Invalid magic: expected LHDB, got {:?}",
                magic
            )));
        }
        let version = dec.read_u32()?;
        if version != VERSION {
            return Err(LhdbError::Format(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let header = Self {
            allocator_dirty: dec.read_u8()? != 0,
            base: dec.read_u32()?,
            fsize: dec.read_u32()?,
            capacity: dec.read_u32()?,
            modulus: dec.read_u32()?,
            split: dec.read_u32()?,
            count: dec.read_u32()?,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(LhdbError::Format(msg));
        if !self.modulus.is_power_of_two() || self.modulus < INITIAL_BUCKETS {
            return bad(format!("hash modulus {} is not a power of two", self.modulus));
        }
        if self.split >= self.modulus {
            return bad(format!(
                "split pointer {} outside modulus {}",
                self.split, self.modulus
            ));
        }
        if self.capacity % BUCKETS_PER_PAGE != 0 || self.capacity > MAX_BUCKETS {
            return bad(format!("bucket capacity {} is invalid", self.capacity));
        }
        // every split bucket has exactly one mirror past the modulus
        if self.capacity as u64 != self.modulus as u64 + self.split as u64 {
            return bad(format!(
                "capacity {} does not match modulus {} + split {}",
                self.capacity, self.modulus, self.split
            ));
        }
        if (self.base as u64) < INITIAL_BASE || self.fsize < self.base {
            return bad(format!(
                "base {} / fsize {} out of range",
                self.base, self.fsize
            ));
        }
        Ok(())
    }
}
