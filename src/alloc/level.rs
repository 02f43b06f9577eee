//! Buddy Level
//!
//! The free list of one size class.

use std::collections::BTreeSet;

use bytes::BufMut;

use crate::codec::{to_u32, Decoder};
use crate::error::{LhdbError, Result};

use super::{MAX_LEVEL, REGION_SIZE};

/// Free blocks of size `2^log_level`
///
/// Blocks are stored as `(offset - base) >> log_level` so the set stays
/// dense, and kept sorted so "take first" always yields the lowest offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuddyLevel {
    base: u64,
    log_level: u32,
    free: BTreeSet<u64>,
}

impl BuddyLevel {
    pub fn new(base: u64, log_level: u32) -> Self {
        Self {
            base,
            log_level,
            free: BTreeSet::new(),
        }
    }

    fn index(&self, offset: u64) -> u64 {
        (offset - self.base) >> self.log_level
    }

    fn offset(&self, index: u64) -> u64 {
        (index << self.log_level) + self.base
    }

    pub fn log_level(&self) -> u32 {
        self.log_level
    }

    /// Block size of this level in bytes
    pub fn block_size(&self) -> u64 {
        1 << self.log_level
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.free.contains(&self.index(offset))
    }

    pub fn insert(&mut self, offset: u64) {
        let index = self.index(offset);
        self.free.insert(index);
    }

    /// Remove a free block; returns false if it was not free
    pub fn remove(&mut self, offset: u64) -> bool {
        let index = self.index(offset);
        self.free.remove(&index)
    }

    /// Take the lowest free block
    pub fn take_first(&mut self) -> Option<u64> {
        let index = self.free.pop_first()?;
        Some(self.offset(index))
    }

    /// Absolute offsets of all free blocks, ascending
    pub fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.free.iter().map(move |&index| self.offset(index))
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.put_u8(self.log_level as u8);
        out.put_u32(to_u32(self.free.len() as u64, "level count")?);
        for offset in self.offsets() {
            out.put_u32(to_u32(offset, "free block offset")?);
        }
        Ok(())
    }

    pub fn decode(base: u64, expected_level: u32, dec: &mut Decoder<'_>) -> Result<Self> {
        let log_level = dec.read_u8()? as u32;
        if log_level != expected_level || log_level > MAX_LEVEL {
            return Err(LhdbError::Format(format!(
                "allocator level {} found where level {} was expected",
                log_level, expected_level
            )));
        }

        let mut level = BuddyLevel::new(base, log_level);
        let count = dec.read_u32()?;
        for _ in 0..count {
            let offset = dec.read_u32()? as u64;
            let aligned = offset >= base && (offset - base) % level.block_size() == 0;
            if !aligned || offset - base + level.block_size() > REGION_SIZE {
                return Err(LhdbError::Format(format!(
                    "free block {} is not a valid level {} block",
                    offset, log_level
                )));
            }
            level.insert(offset);
        }
        Ok(level)
    }
}
