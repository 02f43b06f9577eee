//! Linear hashing state and placement

use std::ops::Range;

use crate::format::{Header, BUCKETS_PER_PAGE, INITIAL_BUCKETS, MAX_BUCKETS};

/// Bucket-placement hash: standard IEEE CRC-32 of the raw key bytes
pub fn hash32(key: &[u8]) -> u32 {
    crc32fast::hash(key)
}

/// Bucket for `hash` under modulus `modulus` and split pointer `split`
///
/// Buckets below the split pointer have already been split, so their keys
/// are placed with the doubled modulus, landing in `slot` or `slot + modulus`.
pub fn placement(hash: u32, split: u32, modulus: u32) -> u32 {
    let slot = hash & (modulus - 1);
    if slot < split {
        hash & (2 * modulus - 1)
    } else {
        slot
    }
}

/// The `s, m, n, o` quadruple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearState {
    /// Next bucket to split, `0 <= split < modulus`
    pub split: u32,
    /// Hash modulus, a power of two
    pub modulus: u32,
    /// Allocated buckets, a multiple of the page size
    pub capacity: u32,
    /// Live keys
    pub count: u32,
}

impl Default for LinearState {
    fn default() -> Self {
        Self {
            split: 0,
            modulus: INITIAL_BUCKETS,
            capacity: INITIAL_BUCKETS,
            count: 0,
        }
    }
}

impl LinearState {
    pub fn from_header(header: &Header) -> Self {
        Self {
            split: header.split,
            modulus: header.modulus,
            capacity: header.capacity,
            count: header.count,
        }
    }

    pub fn bucket_for(&self, key: &[u8]) -> u32 {
        placement(hash32(key), self.split, self.modulus)
    }

    /// Growth is due once keys outnumber buckets
    pub fn over_capacity(&self) -> bool {
        self.count > self.capacity
    }

    pub fn at_ceiling(&self) -> bool {
        self.capacity >= MAX_BUCKETS
    }

    /// Buckets rehashed by the next growth step
    pub fn split_range(&self) -> Range<u32> {
        self.split..self.split + BUCKETS_PER_PAGE
    }

    /// Page that the next growth step allocates
    pub fn next_page(&self) -> u32 {
        self.capacity / BUCKETS_PER_PAGE
    }

    /// Account for one growth step: one more page, split pointer forward
    pub fn advance(&mut self) {
        self.capacity += BUCKETS_PER_PAGE;
        self.split += BUCKETS_PER_PAGE;
        if self.split == self.modulus {
            self.modulus *= 2;
            self.split = 0;
        }
    }
}
