//! # lhdb
//!
//! A single-file key-value store built on linear hashing:
//! - Buckets grow one page at a time, rehashing at most 256 buckets per step
//! - A buddy allocator manages free space inside the file
//! - Values over 512 bytes are spilled to their own regions
//! - An allocator-dirty flag detects unclean shutdown; the allocator is
//!   then rebuilt from the bucket directory
//! - Advisory file locks give one writer or many readers across processes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │     insert / replace / fetch / exists / delete / keys        │
//! └──────┬───────────────────┬──────────────────────┬───────────┘
//!        │                   │                      │
//!        ▼                   ▼                      ▼
//!  ┌─────────────┐   ┌───────────────┐      ┌──────────────┐
//!  │ BucketCache │   │   Directory   │      │    Buddy     │
//!  │    (LRU)    │   │ tables/pages  │      │  Allocator   │
//!  └──────┬──────┘   └───────┬───────┘      └──────┬───────┘
//!         │                  │                     │
//!         └──────────────────┼─────────────────────┘
//!                            ▼
//!                    ┌───────────────┐
//!                    │   DataFile    │
//!                    │ (locked, I/O) │
//!                    └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod format;
pub mod io;
pub mod alloc;
pub mod bucket;
pub mod directory;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LhdbError, Result};
pub use config::{Access, Config, OpenMode};
pub use engine::{Cursor, Engine, EngineStats, SharedEngine};
pub use alloc::BuddyAllocator;
pub use bucket::{Bucket, StoredValue};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of lhdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
