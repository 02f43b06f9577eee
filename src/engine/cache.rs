//! Bucket cache
//!
//! Decoded buckets by number in recency order, plus the set of buckets
//! changed since the last flush. Dirty buckets are pinned until flushed.

use std::collections::BTreeSet;

use lru::LruCache;
use tracing::debug;

use crate::bucket::Bucket;
use crate::error::{LhdbError, Result};

pub struct BucketCache {
    buckets: LruCache<u32, Bucket>,
    dirty: BTreeSet<u32>,
    /// Evict once more than this many buckets are cached
    limit: usize,
    /// Evict down to this many
    retain: usize,
}

impl BucketCache {
    pub fn new(limit: usize, retain: usize) -> Self {
        Self {
            buckets: LruCache::unbounded(),
            dirty: BTreeSet::new(),
            limit,
            retain,
        }
    }

    /// Bucket `bucket_no`, decoded by `load` on a miss; marks it most recent
    pub fn get_or_load<F>(&mut self, bucket_no: u32, load: F) -> Result<&mut Bucket>
    where
        F: FnOnce() -> Result<Bucket>,
    {
        if !self.buckets.contains(&bucket_no) {
            let bucket = load()?;
            self.buckets.put(bucket_no, bucket);
        }
        self.buckets.get_mut(&bucket_no).ok_or_else(|| {
            LhdbError::InvalidOperation(format!("bucket {} missing from cache", bucket_no))
        })
    }

    /// Read without touching recency
    pub fn peek(&self, bucket_no: u32) -> Option<&Bucket> {
        self.buckets.peek(&bucket_no)
    }

    pub fn contains(&self, bucket_no: u32) -> bool {
        self.buckets.contains(&bucket_no)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    // =========================================================================
    // Dirty Tracking
    // =========================================================================

    pub fn mark_dirty(&mut self, bucket_no: u32) {
        self.dirty.insert(bucket_no);
    }

    pub fn is_dirty(&self, bucket_no: u32) -> bool {
        self.dirty.contains(&bucket_no)
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Dirty bucket numbers, ascending
    pub fn dirty_buckets(&self) -> Vec<u32> {
        self.dirty.iter().copied().collect()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Drop least recently used clean buckets once the cache is over its limit
    ///
    /// Returns the number of buckets evicted.
    pub fn evict(&mut self) -> usize {
        let cached = self.buckets.len();
        if cached <= self.limit {
            return 0;
        }

        let excess = cached.saturating_sub(self.retain);
        let victims: Vec<u32> = self
            .buckets
            .iter()
            .rev()
            .map(|(&bucket_no, _)| bucket_no)
            .filter(|bucket_no| !self.dirty.contains(bucket_no))
            .take(excess)
            .collect();

        for bucket_no in &victims {
            self.buckets.pop(bucket_no);
        }
        debug!(evicted = victims.len(), cached = self.buckets.len(), "evicted clean buckets");
        victims.len()
    }
}
