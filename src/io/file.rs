//! Data File
//!
//! Positional reads and writes over the single backing file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::config::Access;
use crate::error::Result;
use crate::format::DIRTY_FLAG_OFFSET;

use super::lock::{self, LockKind};

/// The backing file of an open store
///
/// Every write past `fsize` (the logical end of managed data) may overwrite
/// the trailing allocator blob, so such a write first sets the on-disk
/// allocator-dirty flag. Only a completed flush clears it again.
pub struct DataFile {
    file: File,
    /// Logical end of managed data; the allocator blob is stored here
    fsize: u64,
    /// Physical file length
    len: u64,
    /// Mirror of the header's allocator-dirty byte
    allocator_dirty: bool,
}

impl DataFile {
    /// Open the data file according to the access mode
    pub fn open(path: &Path, access: Access) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true);
        match access {
            Access::Read => {}
            Access::Write => {
                options.write(true);
            }
            // truncation for `n` happens once the lock is held
            Access::Create | Access::Truncate => {
                options.write(true).create(true).truncate(false);
            }
        }
        let file = options.open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file,
            fsize: 0,
            len,
            allocator_dirty: false,
        })
    }

    /// Lock the data file itself
    pub fn lock(&self, kind: LockKind, non_blocking: bool, path: &Path) -> Result<()> {
        lock::apply(&self.file, kind, non_blocking, path)
    }

    // =========================================================================
    // Positional I/O
    // =========================================================================

    /// Read exactly `size` bytes at `pos`
    pub fn read_at(&mut self, pos: u64, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write inside the managed region, extending `fsize` when needed
    pub fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let end = pos + data.len() as u64;
        if end > self.fsize {
            self.set_allocator_dirty()?;
            self.fsize = end;
        }
        self.write_raw(pos, data)
    }

    /// Write without touching `fsize` (header, allocator blob)
    pub fn write_raw(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(data)?;
        self.len = self.len.max(pos + data.len() as u64);
        Ok(())
    }

    /// Set the physical file length
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }

    /// Flush OS buffers to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    // =========================================================================
    // Allocator-Dirty Flag
    // =========================================================================

    /// Record the flag value read from the header
    pub fn load_allocator_dirty(&mut self, dirty: bool) {
        self.allocator_dirty = dirty;
    }

    pub fn is_allocator_dirty(&self) -> bool {
        self.allocator_dirty
    }

    /// Persist "allocator is suspect" before any allocation becomes durable
    pub fn set_allocator_dirty(&mut self) -> Result<()> {
        if !self.allocator_dirty {
            self.allocator_dirty = true;
            self.write_raw(DIRTY_FLAG_OFFSET, &[1])?;
        }
        Ok(())
    }

    /// Final step of a flush: the allocator blob now matches the directory
    pub fn clear_allocator_dirty(&mut self) -> Result<()> {
        if self.allocator_dirty {
            self.allocator_dirty = false;
            self.write_raw(DIRTY_FLAG_OFFSET, &[0])?;
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn fsize(&self) -> u64 {
        self.fsize
    }

    pub fn set_fsize(&mut self, fsize: u64) {
        self.fsize = fsize;
    }

    /// Physical length of the file
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
