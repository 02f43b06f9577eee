//! Thread-shareable handle
//!
//! Every operation on [`Engine`] needs `&mut self` (even reads fill the
//! bucket cache), so sharing one handle across threads means serializing
//! callers behind a mutex.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Config, OpenMode};
use crate::error::{LhdbError, Result};

use super::{Engine, EngineStats};

/// Cloneable handle to one engine; all clones see the same store
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn open(path: impl AsRef<Path>, mode: &str) -> Result<Self> {
        Engine::open(path, mode).map(Self::new)
    }

    pub fn open_with_config(path: impl AsRef<Path>, mode: OpenMode, config: Config) -> Result<Self> {
        Engine::open_with_config(path, mode, config).map(Self::new)
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.inner.lock().insert(key, value)
    }

    pub fn replace(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.lock().replace(key, value)
    }

    pub fn fetch(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.lock().fetch(key)
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.inner.lock().exists(key)
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.inner.lock().delete(key)
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().count()
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.lock().flush()
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.lock().stats()
    }

    /// Run `f` with exclusive access, e.g. to iterate keys
    pub fn with<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Close the store; fails while other clones are still alive
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().close(),
            Err(_) => Err(LhdbError::InvalidOperation(
                "store is still shared by other handles".to_string(),
            )),
        }
    }
}
