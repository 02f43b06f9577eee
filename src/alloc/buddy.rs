//! Buddy System
//!
//! Allocation, freeing with coalescing, and explicit replay.

use bytes::BufMut;

use crate::codec::{to_u32, Decoder};
use crate::error::{LhdbError, Result};

use super::level::BuddyLevel;
use super::{LEVELS, MAX_LEVEL, REGION_SIZE};

/// Smallest level whose block size is at least `size` (`ceil(log2(size))`)
///
/// Exact integer arithmetic: `log_level(2^k) == k` and
/// `log_level(2^k + 1) == k + 1` for every k. Callers reject `size == 0`.
pub fn log_level(size: u64) -> u32 {
    if size <= 1 {
        0
    } else {
        64 - (size - 1).leading_zeros()
    }
}

/// Power-of-two free-space allocator over `[base, base + 2^31)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuddyAllocator {
    base: u64,
    levels: Vec<BuddyLevel>,
}

impl BuddyAllocator {
    /// A fresh allocator: the whole region is one free top-level block
    pub fn new(base: u64) -> Self {
        let mut levels: Vec<BuddyLevel> = (0..LEVELS as u32)
            .map(|log| BuddyLevel::new(base, log))
            .collect();
        levels[MAX_LEVEL as usize].insert(base);
        Self { base, levels }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn level(&self, log: u32) -> &BuddyLevel {
        &self.levels[log as usize]
    }

    /// Buddy of the `2^log` block at `offset`: flip bit `log` of `offset - base`
    pub fn buddy(&self, offset: u64, log: u32) -> u64 {
        ((offset - self.base) ^ (1 << log)) + self.base
    }

    fn check_size(size: u64) -> Result<u32> {
        if size < 1 {
            return Err(LhdbError::InvalidArgument(format!("wrong size argument {}", size)));
        }
        let log = log_level(size);
        if log > MAX_LEVEL {
            return Err(LhdbError::AllocationExhausted { size });
        }
        Ok(log)
    }

    fn check_block(&self, offset: u64, log: u32) -> Result<()> {
        if offset < self.base {
            return Err(LhdbError::InvalidArgument(format!(
                "wrong offset argument {} (base {})",
                offset, self.base
            )));
        }
        let rel = offset - self.base;
        if rel % (1 << log) != 0 || rel + (1 << log) > REGION_SIZE {
            return Err(LhdbError::InvalidArgument(format!(
                "offset {} is not a level {} block",
                offset, log
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate `size` bytes; the result is aligned to `2^ceil(log2(size))`
    ///
    /// Takes the lowest free block of the smallest non-empty level that
    /// fits, then splits it back down, returning each upper half as free.
    pub fn allocate(&mut self, size: u64) -> Result<u64> {
        let want = Self::check_size(size)?;

        let mut log = want;
        while self.levels[log as usize].is_empty() {
            log += 1;
            if log > MAX_LEVEL {
                return Err(LhdbError::AllocationExhausted { size });
            }
        }

        let offset = self.levels[log as usize]
            .take_first()
            .ok_or(LhdbError::AllocationExhausted { size })?;

        while log > want {
            log -= 1;
            self.levels[log as usize].insert(offset + (1 << log));
        }
        Ok(offset)
    }

    /// Return a block, merging it with free buddies as far up as possible
    pub fn free(&mut self, offset: u64, size: u64) -> Result<()> {
        let mut log = Self::check_size(size).map_err(|_| {
            LhdbError::InvalidArgument(format!("wrong size argument {}", size))
        })?;
        self.check_block(offset, log)?;
        if self.levels[log as usize].contains(offset) {
            return Err(LhdbError::InvalidArgument(format!(
                "block {} of {} bytes is already free",
                offset, size
            )));
        }

        let mut offset = offset;
        while log < MAX_LEVEL {
            let buddy = self.buddy(offset, log);
            if !self.levels[log as usize].remove(buddy) {
                break;
            }
            offset = offset.min(buddy);
            log += 1;
        }
        self.levels[log as usize].insert(offset);
        Ok(())
    }

    /// Mark a region known to be free as used (recovery replay)
    ///
    /// Finds the free block enclosing `[offset, offset + size)` at the
    /// requested level or above, then splits it down, returning every
    /// sibling not on the path to `offset` as free. Fails without mutating
    /// anything when no enclosing free block exists.
    pub fn allocate_explicit(&mut self, offset: u64, size: u64) -> Result<()> {
        let want = Self::check_size(size)?;
        self.check_block(offset, want)?;

        let mut log = want;
        let mut block = offset;
        while !self.levels[log as usize].contains(block) {
            log += 1;
            if log > MAX_LEVEL {
                return Err(LhdbError::Format(format!(
                    "region {}+{} is not free, it overlaps another allocation",
                    offset, size
                )));
            }
            block = self.base + ((block - self.base) & !((1u64 << log) - 1));
        }

        self.levels[log as usize].remove(block);
        while log > want {
            log -= 1;
            let half = 1u64 << log;
            let (keep, spare) = if offset - block >= half {
                (block + half, block)
            } else {
                (block, block + half)
            };
            self.levels[log as usize].insert(spare);
            block = keep;
        }
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// All free blocks as `(log_level, offset)`, ordered by level then offset
    pub fn free_blocks(&self) -> Vec<(u32, u64)> {
        self.levels
            .iter()
            .flat_map(|level| level.offsets().map(move |offset| (level.log_level(), offset)))
            .collect()
    }

    /// Total free bytes across all levels
    pub fn free_bytes(&self) -> u64 {
        self.levels
            .iter()
            .map(|level| level.len() as u64 * level.block_size())
            .sum()
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u32(to_u32(self.base, "allocator base")?);
        for level in &self.levels {
            level.encode(&mut out)?;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes, "allocator");
        let base = dec.read_u32()? as u64;
        let levels = (0..LEVELS as u32)
            .map(|log| BuddyLevel::decode(base, log, &mut dec))
            .collect::<Result<Vec<_>>>()?;
        if !dec.is_empty() {
            return Err(LhdbError::Format(format!(
                "{} trailing bytes after allocator",
                dec.remaining()
            )));
        }
        Ok(Self { base, levels })
    }
}
