//! File I/O Module
//!
//! Positional access to the backing file plus advisory locking.
//!
//! ## Responsibilities
//! - Positional read/write/truncate over the data file
//! - Track the logical end of managed data (`fsize`)
//! - Raise the on-disk allocator-dirty flag before any write that could
//!   clobber the trailing allocator blob
//! - Shared/exclusive whole-file advisory locks

mod file;
mod lock;

pub use file::DataFile;
pub use lock::{lock_path, FileLock, LockKind};
