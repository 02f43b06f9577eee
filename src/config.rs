//! Configuration for lhdb
//!
//! Engine tunables with sensible defaults, plus the open-mode grammar.

use std::fmt;
use std::str::FromStr;

use crate::error::{LhdbError, Result};

/// Main configuration for an lhdb handle
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Bucket Cache Configuration
    // -------------------------------------------------------------------------
    /// Eviction starts once more than this many buckets are cached
    pub bucket_cache_limit: usize,

    /// Eviction stops once the cache is down to this many buckets
    pub bucket_cache_retain: usize,

    // -------------------------------------------------------------------------
    // Flush Configuration
    // -------------------------------------------------------------------------
    /// Flush eagerly once this many buckets are dirty
    pub dirty_flush_threshold: usize,

    // -------------------------------------------------------------------------
    // Locking Configuration
    // -------------------------------------------------------------------------
    /// Extension appended to the data file name when a separate lock file is used
    pub lock_file_suffix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket_cache_limit: 1024,
            bucket_cache_retain: 256,
            dirty_flush_threshold: 256,
            lock_file_suffix: "lck".to_string(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the cache size above which clean buckets are evicted
    pub fn bucket_cache_limit(mut self, limit: usize) -> Self {
        self.config.bucket_cache_limit = limit;
        self
    }

    /// Set the cache size eviction shrinks down to
    pub fn bucket_cache_retain(mut self, retain: usize) -> Self {
        self.config.bucket_cache_retain = retain;
        self
    }

    /// Set the number of dirty buckets that forces a flush
    pub fn dirty_flush_threshold(mut self, threshold: usize) -> Self {
        self.config.dirty_flush_threshold = threshold;
        self
    }

    /// Set the lock file extension (without the dot)
    pub fn lock_file_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.lock_file_suffix = suffix.into();
        self
    }

    pub fn build(self) -> Config {
        let mut config = self.config;
        // retain above the limit would evict nothing
        if config.bucket_cache_retain > config.bucket_cache_limit {
            config.bucket_cache_retain = config.bucket_cache_limit;
        }
        config
    }
}

// =============================================================================
// Open Mode
// =============================================================================

/// How the data file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `r`: read-only, shared lock, file must exist
    Read,
    /// `w`: read-write, exclusive lock, file must exist
    Write,
    /// `c`: read-write, exclusive lock, file created if absent
    Create,
    /// `n`: read-write, exclusive lock, file always recreated
    Truncate,
}

impl Access {
    pub fn is_read_only(self) -> bool {
        matches!(self, Access::Read)
    }
}

/// Parsed open mode string, e.g. `"c"`, `"rl"`, `"wlt"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub access: Access,
    /// `l`: lock a separate `<file>.lck` instead of the data file
    pub lock_file: bool,
    /// `t`: fail instead of waiting when the lock is held elsewhere
    pub non_blocking: bool,
}

impl OpenMode {
    pub fn new(access: Access) -> Self {
        Self {
            access,
            lock_file: false,
            non_blocking: false,
        }
    }

    pub fn with_lock_file(mut self) -> Self {
        self.lock_file = true;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }
}

impl FromStr for OpenMode {
    type Err = LhdbError;

    fn from_str(mode: &str) -> Result<Self> {
        let mut chars = mode.chars();
        let access = match chars.next() {
            Some('r') => Access::Read,
            Some('w') => Access::Write,
            Some('c') => Access::Create,
            Some('n') => Access::Truncate,
            _ => {
                return Err(LhdbError::InvalidArgument(format!(
                    "invalid mode {:?}",
                    mode
                )))
            }
        };

        let mut open_mode = OpenMode::new(access);
        for modifier in chars {
            match modifier {
                'l' => open_mode.lock_file = true,
                't' => open_mode.non_blocking = true,
                other => {
                    return Err(LhdbError::InvalidArgument(format!(
                        "invalid mode modifier {:?} in {:?}",
                        other, mode
                    )))
                }
            }
        }
        Ok(open_mode)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = match self.access {
            Access::Read => 'r',
            Access::Write => 'w',
            Access::Create => 'c',
            Access::Truncate => 'n',
        };
        write!(f, "{}", access)?;
        if self.lock_file {
            write!(f, "l")?;
        }
        if self.non_blocking {
            write!(f, "t")?;
        }
        Ok(())
    }
}
