//! Bucket Directory Module
//!
//! Two-level index from bucket number to the on-disk location of the
//! bucket's encoded contents.
//!
//! ```text
//! bucket b ─► page p = b >> 8 ─► page table t = p >> 9
//!
//! directory[t] ──► page table (512 × u32) ──► page (256 × [offset u32, size u32])
//!                       [p & 511]                   [b & 255] ──► bucket bytes
//! ```
//!
//! Page tables and pages are loaded lazily and kept in owned caches keyed
//! by index; updates write through to disk and to the cached copy.

mod pointer;

use std::collections::HashMap;

use tracing::debug;

use crate::alloc::BuddyAllocator;
use crate::codec::{encode_u32_array, to_u32, Decoder};
use crate::error::{LhdbError, Result};
use crate::format::{
    DIRECTORY_BYTES, DIRECTORY_OFFSET, DIRECTORY_SLOTS, FIRST_PAGE_OFFSET,
    FIRST_PAGE_TABLE_OFFSET, INITIAL_BASE, PAGE_BYTES, PAGE_SLOTS, PAGE_TABLE_BYTES, PAGE_TABLE_SLOTS,
};
use crate::io::DataFile;

pub use pointer::{BucketPointer, Page};

/// Page-table number holding page `page_no`, and the slot inside it
fn page_table_slot(page_no: u32) -> (u32, usize) {
    (page_no >> 9, (page_no & 511) as usize)
}

/// Page number holding bucket `bucket_no`, and the slot inside it
fn page_slot(bucket_no: u32) -> (u32, usize) {
    (bucket_no >> 8, (bucket_no & 255) as usize)
}

/// In-memory view of the page-table directory with its caches
pub struct BucketDirectory {
    /// Page-table offsets, read eagerly at open
    tables: Vec<u32>,
    /// Page tables by number (each 512 page offsets)
    page_tables: HashMap<u32, Vec<u32>>,
    /// Pages by number (each 256 bucket pointers)
    pages: HashMap<u32, Page>,
}

impl BucketDirectory {
    /// Lay out the directory, page table 0 and page 0 of a new file
    pub fn initialize(file: &mut DataFile) -> Result<Self> {
        let mut tables = vec![0u32; DIRECTORY_SLOTS];
        tables[0] = FIRST_PAGE_TABLE_OFFSET as u32;
        file.write_raw(DIRECTORY_OFFSET, &encode_u32_array(&tables))?;

        let mut first_table = vec![0u32; PAGE_TABLE_SLOTS];
        first_table[0] = FIRST_PAGE_OFFSET as u32;
        file.write_raw(FIRST_PAGE_TABLE_OFFSET, &encode_u32_array(&first_table))?;

        let first_page = vec![BucketPointer::EMPTY; PAGE_SLOTS];
        file.write_raw(FIRST_PAGE_OFFSET, &vec![0u8; PAGE_BYTES as usize])?;

        Ok(Self {
            tables,
            page_tables: HashMap::from([(0, first_table)]),
            pages: HashMap::from([(0, first_page)]),
        })
    }

    /// Read the directory of an existing file
    pub fn load(file: &mut DataFile) -> Result<Self> {
        let raw = file.read_at(DIRECTORY_OFFSET, DIRECTORY_BYTES as usize)?;
        let tables = Decoder::new(&raw, "directory").read_u32_array(DIRECTORY_SLOTS)?;
        if tables[0] as u64 != FIRST_PAGE_TABLE_OFFSET {
            return Err(LhdbError::Format(format!(
                "first page table at {}, expected {}",
                tables[0], FIRST_PAGE_TABLE_OFFSET
            )));
        }

        Ok(Self {
            tables,
            page_tables: HashMap::new(),
            pages: HashMap::new(),
        })
    }

    /// Page-table offsets as stored in the directory
    pub fn table_offsets(&self) -> &[u32] {
        &self.tables
    }

    /// Reject pointers that are null, point below `base` (other than at the
    /// fixed structure `fixed`) or run past the end of the file
    fn check_region(file: &DataFile, offset: u32, size: u64, fixed: u64, what: &str) -> Result<()> {
        let offset_ok = offset as u64 >= INITIAL_BASE || (offset != 0 && offset as u64 == fixed);
        if !offset_ok || offset as u64 + size > file.len() {
            return Err(LhdbError::Format(format!(
                "invalid {} pointer {} (+{}), file length {}",
                what,
                offset,
                size,
                file.len()
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Lazy Loading
    // =========================================================================

    /// Page table `table_no`, loaded on first access
    pub fn page_table(&mut self, file: &mut DataFile, table_no: u32) -> Result<&[u32]> {
        if !self.page_tables.contains_key(&table_no) {
            let offset = self
                .tables
                .get(table_no as usize)
                .copied()
                .ok_or_else(|| LhdbError::Format(format!("page table {} out of range", table_no)))?;
            Self::check_region(file, offset, PAGE_TABLE_BYTES, FIRST_PAGE_TABLE_OFFSET, "page table")?;

            let raw = file.read_at(offset as u64, PAGE_TABLE_BYTES as usize)?;
            let table = Decoder::new(&raw, "page table").read_u32_array(PAGE_TABLE_SLOTS)?;
            self.page_tables.insert(table_no, table);
        }
        Ok(&self.page_tables[&table_no])
    }

    /// Page `page_no`, loaded on first access
    pub fn page(&mut self, file: &mut DataFile, page_no: u32) -> Result<&[BucketPointer]> {
        if !self.pages.contains_key(&page_no) {
            let (table_no, slot) = page_table_slot(page_no);
            let offset = self.page_table(file, table_no)?[slot];
            Self::check_region(file, offset, PAGE_BYTES, FIRST_PAGE_OFFSET, "page")?;

            let raw = file.read_at(offset as u64, PAGE_BYTES as usize)?;
            self.pages.insert(page_no, pointer::decode_page(&raw)?);
        }
        Ok(&self.pages[&page_no])
    }

    /// Location of bucket `bucket_no`'s contents
    pub fn bucket_pointer(&mut self, file: &mut DataFile, bucket_no: u32) -> Result<BucketPointer> {
        let (page_no, slot) = page_slot(bucket_no);
        let pointer = self.page(file, page_no)?[slot];
        if !pointer.is_empty() {
            Self::check_region(file, pointer.offset, pointer.size as u64, 0, "bucket")?;
        }
        Ok(pointer)
    }

    /// Point bucket `bucket_no` at new contents, on disk and in cache
    ///
    /// Returns the pointer it replaces.
    pub fn set_bucket_pointer(
        &mut self,
        file: &mut DataFile,
        bucket_no: u32,
        pointer: BucketPointer,
    ) -> Result<BucketPointer> {
        let (page_no, slot) = page_slot(bucket_no);
        let (table_no, table_slot) = page_table_slot(page_no);

        let previous = self.page(file, page_no)?[slot];
        let page_offset = self.page_table(file, table_no)?[table_slot] as u64;
        file.write_at(page_offset + 8 * slot as u64, &pointer.encode())?;

        if let Some(page) = self.pages.get_mut(&page_no) {
            page[slot] = pointer;
        }
        Ok(previous)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate and zero page table `table_no`, then link it into the directory
    pub fn allocate_page_table(
        &mut self,
        file: &mut DataFile,
        alloc: &mut BuddyAllocator,
        table_no: u32,
    ) -> Result<u64> {
        let slot = table_no as usize;
        if slot >= DIRECTORY_SLOTS {
            return Err(LhdbError::InvalidArgument(format!(
                "page table {} beyond directory",
                table_no
            )));
        }

        let offset = alloc.allocate(PAGE_TABLE_BYTES)?;
        file.write_at(offset, &vec![0u8; PAGE_TABLE_BYTES as usize])?;
        self.page_tables.insert(table_no, vec![0u32; PAGE_TABLE_SLOTS]);

        let stored = to_u32(offset, "page table offset")?;
        file.write_at(DIRECTORY_OFFSET + 4 * slot as u64, &stored.to_be_bytes())?;
        self.tables[slot] = stored;

        debug!(table_no, offset, "allocated page table");
        Ok(offset)
    }

    /// Allocate and zero page `page_no`, then link it into its page table
    ///
    /// The page table is allocated first when it does not exist yet. The
    /// parent pointer is on disk before this returns.
    pub fn allocate_page(
        &mut self,
        file: &mut DataFile,
        alloc: &mut BuddyAllocator,
        page_no: u32,
    ) -> Result<u64> {
        let (table_no, slot) = page_table_slot(page_no);
        if self.tables.get(table_no as usize).copied().unwrap_or(0) == 0 {
            self.allocate_page_table(file, alloc, table_no)?;
        }
        // cached copy must exist before it is patched below
        self.page_table(file, table_no)?;

        let offset = alloc.allocate(PAGE_BYTES)?;
        file.write_at(offset, &vec![0u8; PAGE_BYTES as usize])?;
        self.pages.insert(page_no, vec![BucketPointer::EMPTY; PAGE_SLOTS]);

        let stored = to_u32(offset, "page offset")?;
        let table_pos = self.tables[table_no as usize] as u64;
        file.write_at(table_pos + 4 * slot as u64, &stored.to_be_bytes())?;
        if let Some(table) = self.page_tables.get_mut(&table_no) {
            table[slot] = stored;
        }

        debug!(page_no, offset, "allocated page");
        Ok(offset)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn cached_page_tables(&self) -> usize {
        self.page_tables.len()
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }
}
