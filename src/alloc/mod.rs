//! Buddy Allocator Module
//!
//! Free-space management for the region of the data file above `base`.
//!
//! ## Responsibilities
//! - Hand out power-of-two blocks for page tables, pages, buckets and
//!   spilled values
//! - Coalesce freed blocks with their buddies so free space does not
//!   fragment permanently
//! - Replay known allocations onto a fresh allocator during recovery
//! - Serialize the whole allocator as one blob
//!
//! ## Blob Format
//! ```text
//! ┌──────────┬──────────────────────────────────────────────────┐
//! │ base u32 │ 32 × [ log u8 | count u32 | count × offset u32 ] │
//! └──────────┴──────────────────────────────────────────────────┘
//! ```

mod buddy;
mod level;

pub use buddy::{log_level, BuddyAllocator};
pub use level::BuddyLevel;

/// Number of size classes; level `i` tracks free blocks of `2^i` bytes
pub const LEVELS: usize = 32;

/// Largest size class; one block of this level spans the whole region
pub const MAX_LEVEL: u32 = LEVELS as u32 - 1;

/// Size of the managed region (`2^31` bytes)
pub const REGION_SIZE: u64 = 1 << MAX_LEVEL;
