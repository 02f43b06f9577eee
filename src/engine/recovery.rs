//! Allocator Recovery
//!
//! Rebuilds the buddy allocator after an unclean shutdown.
//!
//! The directory is the only source of truth for what is in use: every
//! page table, page, bucket region and spilled value it references is
//! replayed onto a fresh allocator with `allocate_explicit`; everything
//! else is free. Page table 0 and page 0 sit below `base` and are skipped.

use crate::alloc::BuddyAllocator;
use crate::bucket::Bucket;
use crate::error::{LhdbError, Result};
use crate::directory::BucketDirectory;
use crate::format::{PAGE_BYTES, PAGE_SLOTS, PAGE_TABLE_BYTES, PAGE_TABLE_SLOTS};
use crate::io::DataFile;

/// What a recovery scan found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Page tables replayed (page table 0 excluded)
    pub page_tables: u64,
    /// Pages replayed (page 0 excluded)
    pub pages: u64,
    /// Non-empty bucket regions replayed
    pub buckets: u64,
    /// Spilled value regions replayed
    pub spilled_values: u64,
    /// Live keys seen across all buckets
    pub keys: u64,
    /// End of the highest referenced region
    pub high_water: u64,
}

/// Scan the directory and return an allocator matching it
pub fn rebuild_allocator(
    file: &mut DataFile,
    directory: &mut BucketDirectory,
    base: u64,
) -> Result<(BuddyAllocator, RecoveryReport)> {
    let mut alloc = BuddyAllocator::new(base);
    let mut report = RecoveryReport::default();

    let tables = directory.table_offsets().to_vec();
    for (table_no, &table_offset) in tables.iter().enumerate() {
        if table_offset == 0 {
            break;
        }
        if table_no != 0 {
            claim(&mut alloc, &mut report, table_offset as u64, PAGE_TABLE_BYTES)?;
            report.page_tables += 1;
        }

        let table_no = table_no as u32;
        let pages = directory.page_table(file, table_no)?.to_vec();
        for (slot, &page_offset) in pages.iter().enumerate() {
            if page_offset == 0 {
                break;
            }
            if table_no != 0 || slot != 0 {
                claim(&mut alloc, &mut report, page_offset as u64, PAGE_BYTES)?;
                report.pages += 1;
            }

            let page_no = table_no * PAGE_TABLE_SLOTS as u32 + slot as u32;
            for bucket_slot in 0..PAGE_SLOTS as u32 {
                let bucket_no = page_no * PAGE_SLOTS as u32 + bucket_slot;
                let pointer = directory.bucket_pointer(file, bucket_no)?;
                if pointer.is_empty() {
                    continue;
                }
                claim(&mut alloc, &mut report, pointer.offset as u64, pointer.size as u64)?;
                report.buckets += 1;

                let raw = file.read_at(pointer.offset as u64, pointer.size as usize)?;
                let bucket = Bucket::decode(&raw)?;
                report.keys += bucket.len() as u64;
                for (_, value) in bucket.iter() {
                    if let Some((offset, size)) = value.spilled_region() {
                        if offset + size > file.len() {
                            return Err(LhdbError::Format(format!(
                                "spilled value {}+{} in bucket {} runs past end of file",
                                offset, size, bucket_no
                            )));
                        }
                        claim(&mut alloc, &mut report, offset, size)?;
                        report.spilled_values += 1;
                    }
                }
            }
        }
    }

    Ok((alloc, report))
}

fn claim(
    alloc: &mut BuddyAllocator,
    report: &mut RecoveryReport,
    offset: u64,
    size: u64,
) -> Result<()> {
    report.high_water = report.high_water.max(offset + size);
    alloc.allocate_explicit(offset, size)
}
