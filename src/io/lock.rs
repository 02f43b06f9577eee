//! Advisory Locking
//!
//! Whole-file `flock`-style locks via `fs2`. A lock is either taken on the
//! data file itself or on a companion `<file>.<suffix>` lock file, so that
//! readers and a writer can coordinate without locking the data file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{LhdbError, Result};

/// Lock strength requested at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Read-only handles; any number may coexist
    Shared,
    /// Write-capable handles; excludes every other lock
    Exclusive,
}

/// Take `kind` on `file`, waiting unless `non_blocking` is set
pub(crate) fn apply(file: &File, kind: LockKind, non_blocking: bool, what: &Path) -> Result<()> {
    // fully qualified: std::fs::File has inherent lock methods with other signatures
    let result = match (kind, non_blocking) {
        (LockKind::Shared, false) => FileExt::lock_shared(file),
        (LockKind::Shared, true) => FileExt::try_lock_shared(file),
        (LockKind::Exclusive, false) => FileExt::lock_exclusive(file),
        (LockKind::Exclusive, true) => FileExt::try_lock_exclusive(file),
    };
    result.map_err(|e| {
        LhdbError::Lock(format!(
            "cannot acquire {:?} lock on {}: {}",
            kind,
            what.display(),
            e
        ))
    })
}

/// Path of the companion lock file: `data.db` → `data.db.lck`
pub fn lock_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// A held lock on a separate lock file, released on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Create (if needed) and lock the file at `path`
    pub fn acquire(path: &Path, kind: LockKind, non_blocking: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LhdbError::Lock(format!("cannot open {}: {}", path.display(), e)))?;

        apply(&file, kind, non_blocking, path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock file");
        }
    }
}
