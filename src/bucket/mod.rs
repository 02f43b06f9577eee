//! Bucket Module
//!
//! One hash bucket: the keys linear hashing maps to a bucket number, with
//! their stored values.
//!
//! ## Encoding
//! ```text
//! empty bucket: zero bytes
//! otherwise:
//! ┌───────────┬──────────────────────────────────────────────────────┐
//! │ count u16 │ count × [KeyLen u32][Key][ValLen u32][StoredValue]   │
//! └───────────┴──────────────────────────────────────────────────────┘
//! ```

mod value;

use std::collections::BTreeMap;

use bytes::BufMut;

use crate::codec::Decoder;
use crate::error::{LhdbError, Result};

pub use value::StoredValue;

/// In-memory dictionary of one bucket
///
/// Keys are kept ordered so a cursor position inside a bucket is stable
/// while the bucket is not mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    entries: BTreeMap<Vec<u8>, StoredValue>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Option<&StoredValue> {
        self.entries.get(key)
    }

    /// Insert or overwrite; returns the previous value
    pub fn insert(&mut self, key: Vec<u8>, value: StoredValue) -> Option<StoredValue> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<StoredValue> {
        self.entries.remove(key)
    }

    /// Key at `position` in bucket order
    pub fn key_at(&self, position: usize) -> Option<&[u8]> {
        self.entries.keys().nth(position).map(|k| k.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.keys().map(|k| k.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &StoredValue)> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v))
    }

    /// Remove and return every entry whose key fails `keep`
    pub fn split_off<F>(&mut self, mut keep: F) -> Vec<(Vec<u8>, StoredValue)>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let moving: Vec<Vec<u8>> = self
            .entries
            .keys()
            .filter(|key| !keep(key.as_slice()))
            .cloned()
            .collect();

        moving
            .into_iter()
            .filter_map(|key| self.entries.remove_entry(&key))
            .collect()
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let count = u16::try_from(self.entries.len()).map_err(|_| {
            LhdbError::Format(format!("bucket holds {} keys, limit is 65535", self.entries.len()))
        })?;

        let size = 2 + self
            .entries
            .iter()
            .map(|(k, v)| 8 + k.len() + v.encoded_len())
            .sum::<usize>();
        let mut out = Vec::with_capacity(size);
        out.put_u16(count);
        for (key, value) in &self.entries {
            out.put_u32(key.len() as u32);
            out.put_slice(key);
            out.put_u32(value.encoded_len() as u32);
            value.encode(&mut out);
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut bucket = Bucket::new();
        if bytes.is_empty() {
            return Ok(bucket);
        }

        let mut dec = Decoder::new(bytes, "bucket");
        let count = dec.read_u16()?;
        for _ in 0..count {
            let key_len = dec.read_u32()? as usize;
            let key = dec.read_bytes(key_len)?.to_vec();
            let value_len = dec.read_u32()? as usize;
            let value = StoredValue::decode(dec.read_bytes(value_len)?)?;
            bucket.entries.insert(key, value);
        }
        if !dec.is_empty() {
            return Err(LhdbError::Format(format!(
                "{} trailing bytes after bucket",
                dec.remaining()
            )));
        }
        Ok(bucket)
    }
}
