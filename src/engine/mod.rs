//! Engine Module
//!
//! The linear-hashing storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Place keys in buckets by linear hashing and grow one page at a time
//! - Cache decoded buckets and batch changed ones until a flush
//! - Spill large values into their own allocator regions
//! - Persist buckets, header and allocator in a crash-detectable order
//! - Rebuild the allocator from the directory after an unclean shutdown
//!
//! ## Flush Ordering
//! ```text
//! 1. allocator-dirty flag := 1          (allocator on disk is now suspect)
//! 2. write each dirty bucket to fresh space, repoint its page entry,
//!    free the old region
//! 3. rewrite header
//! 4. write allocator blob at fsize, truncate after it
//! 5. allocator-dirty flag := 0          (clean shutdown marker)
//! ```

mod cache;
mod cursor;
mod recovery;
mod shared;
mod state;

use std::path::{Path, PathBuf};

use bytes::BufMut;
use tracing::{debug, error, info, warn};

use crate::alloc::BuddyAllocator;
use crate::bucket::{Bucket, StoredValue};
use crate::codec::{to_u32, Decoder};
use crate::config::{Access, Config, OpenMode};
use crate::directory::{BucketDirectory, BucketPointer};
use crate::error::{LhdbError, Result};
use crate::format::{Header, HEADER_SIZE};
use crate::io::{lock_path, DataFile, FileLock, LockKind};

pub use cache::BucketCache;
pub use cursor::{Cursor, Keys};
pub use recovery::{rebuild_allocator, RecoveryReport};
pub use shared::SharedEngine;
pub use state::{hash32, placement, LinearState};

/// Snapshot of engine counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Live keys
    pub count: u64,
    /// Allocated buckets
    pub capacity: u32,
    /// Hash modulus
    pub modulus: u32,
    /// Split pointer
    pub split: u32,
    /// Logical end of managed data
    pub fsize: u64,
    /// Buckets held in memory
    pub cached_buckets: usize,
    /// Buckets changed since the last flush
    pub dirty_buckets: usize,
    /// Free bytes in the allocator (None for read-only handles)
    pub free_bytes: Option<u64>,
}

/// An open store
///
/// ## Concurrency Model
///
/// One handle, one caller at a time: every operation runs to completion,
/// including its disk I/O, before returning. Cross-process coordination is
/// the advisory lock taken at open (shared for `r`, exclusive otherwise).
/// Use [`SharedEngine`] to share a handle between threads.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Data file path
    path: PathBuf,

    /// Mode the handle was opened with
    mode: OpenMode,

    /// Backing file
    file: DataFile,

    /// Held lock on the companion lock file (`l` modifier)
    _lock: Option<FileLock>,

    /// First allocator-managed offset
    base: u64,

    /// Linear hashing state (s, m, n, o)
    state: LinearState,

    /// Free-space allocator; absent on read-only handles
    allocator: Option<BuddyAllocator>,

    /// Page-table directory with page-table and page caches
    directory: BucketDirectory,

    /// Decoded buckets and the dirty set
    cache: BucketCache,

    /// Set once the final flush has run
    closed: bool,
}

impl Engine {
    /// Open with a mode string (`r`, `w`, `c`, `n`, plus `l`/`t` modifiers)
    pub fn open(path: impl AsRef<Path>, mode: &str) -> Result<Self> {
        Self::open_with_config(path, mode.parse()?, Config::default())
    }

    /// Open or create a store
    ///
    /// On startup:
    /// 1. Acquire the advisory lock (data file or `<file>.lck`)
    /// 2. Initialize an empty file, or read header and directory
    /// 3. Load the allocator blob, or rebuild it if the dirty flag is set
    pub fn open_with_config(path: impl AsRef<Path>, mode: OpenMode, config: Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let kind = if mode.access.is_read_only() {
            LockKind::Shared
        } else {
            LockKind::Exclusive
        };

        // Step 1: Lock
        let lock = if mode.lock_file {
            let lck = lock_path(&path, &config.lock_file_suffix);
            Some(FileLock::acquire(&lck, kind, mode.non_blocking)?)
        } else {
            None
        };

        let mut file = DataFile::open(&path, mode.access)?;
        if !mode.lock_file {
            file.lock(kind, mode.non_blocking, &path)?;
        }
        if mode.access == Access::Truncate {
            file.truncate(0)?;
        }

        let cache = BucketCache::new(config.bucket_cache_limit, config.bucket_cache_retain);

        // Step 2: Fresh file
        if file.is_empty() {
            if mode.access.is_read_only() {
                return Err(LhdbError::format(format!(
                    "{} is empty and cannot be opened read-only",
                    path.display()
                )));
            }
            let header = Header::fresh();
            file.set_fsize(header.fsize as u64);
            let directory = BucketDirectory::initialize(&mut file)?;

            let mut engine = Self {
                config,
                path,
                mode,
                file,
                _lock: lock,
                base: header.base as u64,
                state: LinearState::default(),
                allocator: Some(BuddyAllocator::new(header.base as u64)),
                directory,
                cache,
                closed: false,
            };
            engine.write_header()?;
            engine.write_allocator()?;
            info!(path = %engine.path.display(), "created store");
            return Ok(engine);
        }

        // Step 2: Existing file
        let header = Header::decode(&file.read_at(0, HEADER_SIZE as usize)?)?;
        file.set_fsize(header.fsize as u64);
        file.load_allocator_dirty(header.allocator_dirty);
        let directory = BucketDirectory::load(&mut file)?;

        let mut engine = Self {
            config,
            path,
            mode,
            file,
            _lock: lock,
            base: header.base as u64,
            state: LinearState::from_header(&header),
            allocator: None,
            directory,
            cache,
            closed: false,
        };

        // Step 3: Allocator
        if !mode.access.is_read_only() {
            if header.allocator_dirty {
                warn!(path = %engine.path.display(), "allocator marked dirty, rebuilding from directory");
                engine.recover()?;
            } else {
                engine.allocator = Some(engine.read_allocator()?);
            }
        } else if header.allocator_dirty {
            warn!(path = %engine.path.display(), "allocator marked dirty; read-only handle skips recovery");
        }

        info!(
            path = %engine.path.display(),
            mode = %mode,
            keys = engine.state.count,
            buckets = engine.state.capacity,
            "opened store"
        );
        Ok(engine)
    }

    // =========================================================================
    // Key/Value Operations
    // =========================================================================

    /// Insert a new key; returns false (and changes nothing) if it exists
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.check_writable()?;
        if self.exists(key)? {
            return Ok(false);
        }
        self.replace(key, value)?;
        Ok(true)
    }

    /// Insert or overwrite a key
    ///
    /// Steps:
    /// 1. Locate the bucket by placement
    /// 2. Wrap the value (spilling it if large)
    /// 3. Store it, releasing any old spilled region
    /// 4. Grow and flush if keys now outnumber buckets
    pub fn replace(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        let bucket_no = self.state.bucket_for(key);

        // Step 1: Identical inline value is a no-op
        if let Some(StoredValue::Inline(old)) = self.bucket(bucket_no)?.get(key) {
            if !StoredValue::needs_spill(value.len()) && old.as_slice() == value {
                return Ok(());
            }
        }

        // Step 2: Wrap
        let stored = self.store_value(value)?;

        // Step 3: Store
        let previous = self.bucket(bucket_no)?.insert(key.to_vec(), stored);
        self.cache.mark_dirty(bucket_no);

        let mut flush_now = false;
        match previous {
            Some(old) => {
                if let Some((offset, size)) = old.spilled_region() {
                    self.release_region(offset, size)?;
                    // freed space must not be reused before the allocator is persisted
                    flush_now = true;
                }
            }
            None => {
                // Step 4: Grow
                self.state.count += 1;
                if self.state.over_capacity() {
                    self.grow()?;
                    flush_now = true;
                }
            }
        }

        if flush_now || self.cache.dirty_len() >= self.config.dirty_flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Get a value by key
    pub fn fetch(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let bucket_no = self.state.bucket_for(key);
        let stored = self.bucket(bucket_no)?.get(key).cloned();

        let value = match stored {
            None => None,
            Some(StoredValue::Inline(bytes)) => Some(bytes),
            Some(StoredValue::Spilled { offset, size }) => {
                if offset as u64 + size as u64 > self.file.len() {
                    return Err(LhdbError::Format(format!(
                        "spilled value {}+{} runs past end of file",
                        offset, size
                    )));
                }
                Some(self.file.read_at(offset as u64, size as usize)?)
            }
        };
        self.cache.evict();
        Ok(value)
    }

    /// Check whether a key is present
    pub fn exists(&mut self, key: &[u8]) -> Result<bool> {
        let bucket_no = self.state.bucket_for(key);
        let exists = self.bucket(bucket_no)?.contains(key);
        self.cache.evict();
        Ok(exists)
    }

    /// Delete a key; returns false if it was absent
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.check_writable()?;
        let bucket_no = self.state.bucket_for(key);

        let Some(old) = self.bucket(bucket_no)?.remove(key) else {
            return Ok(false);
        };
        self.state.count = self.state.count.saturating_sub(1);
        self.cache.mark_dirty(bucket_no);

        let mut flush_now = false;
        if let Some((offset, size)) = old.spilled_region() {
            self.release_region(offset, size)?;
            flush_now = true;
        }
        if flush_now || self.cache.dirty_len() >= self.config.dirty_flush_threshold {
            self.flush()?;
        }
        Ok(true)
    }

    /// Number of live keys
    pub fn count(&self) -> u64 {
        self.state.count as u64
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Rewind `cursor` and return the first key
    pub fn first_key(&mut self, cursor: &mut Cursor) -> Result<Option<Vec<u8>>> {
        cursor.reset();
        self.next_key(cursor)
    }

    /// Advance `cursor`; `None` once every bucket has been visited
    pub fn next_key(&mut self, cursor: &mut Cursor) -> Result<Option<Vec<u8>>> {
        while cursor.bucket < self.state.capacity {
            let key = self
                .bucket(cursor.bucket)?
                .key_at(cursor.position)
                .map(<[u8]>::to_vec);
            self.cache.evict();

            match key {
                Some(key) => {
                    cursor.position += 1;
                    return Ok(Some(key));
                }
                None => {
                    cursor.bucket += 1;
                    cursor.position = 0;
                }
            }
        }
        Ok(None)
    }

    /// Iterator over all live keys
    pub fn keys(&mut self) -> Keys<'_> {
        Keys::new(self)
    }

    // =========================================================================
    // Growth
    // =========================================================================

    /// One linear-hashing growth step
    ///
    /// Allocates the next page (256 buckets) and splits buckets
    /// `[s, s + 256)`: keys whose placement under the grown state is
    /// `i + m` move there. At most 256 buckets are rehashed per call.
    fn grow(&mut self) -> Result<()> {
        if self.state.at_ceiling() {
            return Ok(());
        }

        let page_no = self.state.next_page();
        let alloc = self.allocator.as_mut().ok_or_else(read_only_error)?;
        self.directory.allocate_page(&mut self.file, alloc, page_no)?;

        let before = self.state;
        self.state.advance();
        let after = self.state;

        let mut moved_keys = 0usize;
        for bucket_no in before.split_range() {
            let moved = self
                .bucket(bucket_no)?
                .split_off(|key| after.bucket_for(key) == bucket_no);
            if moved.is_empty() {
                continue;
            }
            moved_keys += moved.len();

            let mirror = bucket_no + before.modulus;
            let target = self.bucket(mirror)?;
            for (key, value) in moved {
                target.insert(key, value);
            }
            self.cache.mark_dirty(bucket_no);
            self.cache.mark_dirty(mirror);
        }

        debug!(
            capacity = after.capacity,
            modulus = after.modulus,
            split = after.split,
            moved_keys,
            "grew table"
        );
        Ok(())
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Persist dirty buckets, header and allocator
    ///
    /// No-op when nothing is dirty.
    pub fn flush(&mut self) -> Result<()> {
        if self.cache.dirty_len() == 0 {
            return Ok(());
        }
        self.check_writable()?;

        // Step 1: Allocator is suspect from here on
        self.file.set_allocator_dirty()?;

        // Step 2: Buckets
        let dirty = self.cache.dirty_buckets();
        for &bucket_no in &dirty {
            let encoded = self
                .cache
                .peek(bucket_no)
                .ok_or_else(|| {
                    LhdbError::InvalidOperation(format!("dirty bucket {} not cached", bucket_no))
                })?
                .encode()?;

            let alloc = self.allocator.as_mut().ok_or_else(read_only_error)?;
            let pointer = if encoded.is_empty() {
                BucketPointer::EMPTY
            } else {
                let offset = alloc.allocate(encoded.len() as u64)?;
                self.file.write_at(offset, &encoded)?;
                BucketPointer::new(
                    to_u32(offset, "bucket offset")?,
                    to_u32(encoded.len() as u64, "bucket size")?,
                )
            };

            let previous = self
                .directory
                .set_bucket_pointer(&mut self.file, bucket_no, pointer)?;
            if !previous.is_empty() {
                alloc.free(previous.offset as u64, previous.size as u64)?;
            }
        }

        // Step 3-5: Header, allocator, clean marker
        self.write_header()?;
        self.write_allocator()?;
        self.file.clear_allocator_dirty()?;

        self.cache.clear_dirty();
        self.cache.evict();

        debug!(buckets = dirty.len(), fsize = self.file.fsize(), "flushed");
        Ok(())
    }

    /// Flush, sync and release the handle, surfacing any flush error
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.allocator.is_some() {
            self.flush()?;
            self.file.sync()?;
        }
        info!(path = %self.path.display(), keys = self.state.count, "closed store");
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_writable(&self) -> Result<()> {
        if self.closed {
            return Err(LhdbError::InvalidOperation("store is closed".to_string()));
        }
        if self.allocator.is_none() {
            return Err(read_only_error());
        }
        Ok(())
    }

    /// Bucket `bucket_no`, decoded from disk on first touch
    fn bucket(&mut self, bucket_no: u32) -> Result<&mut Bucket> {
        let directory = &mut self.directory;
        let file = &mut self.file;
        self.cache.get_or_load(bucket_no, || {
            let pointer = directory.bucket_pointer(file, bucket_no)?;
            if pointer.is_empty() {
                return Ok(Bucket::new());
            }
            Bucket::decode(&file.read_at(pointer.offset as u64, pointer.size as usize)?)
        })
    }

    /// Wrap a value, writing it to its own region when it is too large to inline
    fn store_value(&mut self, value: &[u8]) -> Result<StoredValue> {
        if !StoredValue::needs_spill(value.len()) {
            return Ok(StoredValue::Inline(value.to_vec()));
        }
        let alloc = self.allocator.as_mut().ok_or_else(read_only_error)?;
        let offset = alloc.allocate(value.len() as u64)?;
        self.file.write_at(offset, value)?;
        Ok(StoredValue::Spilled {
            offset: to_u32(offset, "value offset")?,
            size: to_u32(value.len() as u64, "value size")?,
        })
    }

    fn release_region(&mut self, offset: u64, size: u64) -> Result<()> {
        let alloc = self.allocator.as_mut().ok_or_else(read_only_error)?;
        alloc.free(offset, size)
    }

    fn header(&self) -> Result<Header> {
        Ok(Header {
            allocator_dirty: self.file.is_allocator_dirty(),
            base: to_u32(self.base, "base")?,
            fsize: to_u32(self.file.fsize(), "fsize")?,
            capacity: self.state.capacity,
            modulus: self.state.modulus,
            split: self.state.split,
            count: self.state.count,
        })
    }

    fn write_header(&mut self) -> Result<()> {
        let header = self.header()?;
        self.file.write_raw(0, &header.encode())
    }

    /// Write `[len u32][allocator]` at fsize and cut the file after it
    fn write_allocator(&mut self) -> Result<()> {
        let alloc = self.allocator.as_ref().ok_or_else(read_only_error)?;
        let blob = alloc.encode()?;

        let mut out = Vec::with_capacity(4 + blob.len());
        out.put_u32(to_u32(blob.len() as u64, "allocator size")?);
        out.put_slice(&blob);

        let fsize = self.file.fsize();
        self.file.write_raw(fsize, &out)?;
        self.file.truncate(fsize + out.len() as u64)
    }

    fn read_allocator(&mut self) -> Result<BuddyAllocator> {
        let fsize = self.file.fsize();
        if fsize + 4 > self.file.len() {
            return Err(LhdbError::format(format!(
                "allocator length at {} runs past end of file",
                fsize
            )));
        }
        let raw_len = self.file.read_at(fsize, 4)?;
        let len = Decoder::new(&raw_len, "allocator length").read_u32()? as u64;
        if fsize + 4 + len > self.file.len() {
            return Err(LhdbError::Format(format!(
                "allocator blob of {} bytes at {} runs past end of file",
                len, fsize
            )));
        }

        let alloc = BuddyAllocator::decode(&self.file.read_at(fsize + 4, len as usize)?)?;
        if alloc.base() != self.base {
            return Err(LhdbError::Format(format!(
                "allocator base {} does not match header base {}",
                alloc.base(),
                self.base
            )));
        }
        Ok(alloc)
    }

    /// Rebuild the allocator from the directory and persist it
    fn recover(&mut self) -> Result<RecoveryReport> {
        let (alloc, report) = rebuild_allocator(&mut self.file, &mut self.directory, self.base)?;

        // data written past a stale fsize must not be covered by the new blob
        let fsize = self.file.fsize().max(report.high_water);
        self.file.set_fsize(fsize);
        self.state.count = to_u32(report.keys, "key count")?;
        self.allocator = Some(alloc);

        self.write_header()?;
        self.write_allocator()?;
        self.file.clear_allocator_dirty()?;

        info!(
            page_tables = report.page_tables,
            pages = report.pages,
            buckets = report.buckets,
            spilled_values = report.spilled_values,
            keys = report.keys,
            "rebuilt allocator"
        );
        Ok(report)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Data file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the handle was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Linear hashing state
    pub fn state(&self) -> LinearState {
        self.state
    }

    /// Bucket a key is placed in under the current state
    pub fn bucket_of(&self, key: &[u8]) -> u32 {
        self.state.bucket_for(key)
    }

    /// The allocator (None for read-only handles)
    pub fn allocator(&self) -> Option<&BuddyAllocator> {
        self.allocator.as_ref()
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            count: self.count(),
            capacity: self.state.capacity,
            modulus: self.state.modulus,
            split: self.state.split,
            fsize: self.file.fsize(),
            cached_buckets: self.cache.len(),
            dirty_buckets: self.cache.dirty_len(),
            free_bytes: self.allocator.as_ref().map(BuddyAllocator::free_bytes),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(path = %self.path.display(), error = %e, "final flush failed");
        }
    }
}

fn read_only_error() -> LhdbError {
    LhdbError::InvalidOperation("store is opened read-only".to_string())
}
