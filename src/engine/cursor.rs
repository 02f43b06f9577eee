//! Key iteration
//!
//! A cursor is a bucket number plus a position inside that bucket. Growth
//! moves keys between buckets, so iterating across an insert that triggers
//! a split may skip or repeat keys.

use crate::error::Result;

use super::Engine;

/// Position of a key scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub(super) bucket: u32,
    pub(super) position: usize,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind to the first bucket
    pub fn reset(&mut self) {
        self.bucket = 0;
        self.position = 0;
    }

    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// Borrowing iterator over every live key
pub struct Keys<'a> {
    engine: &'a mut Engine,
    cursor: Cursor,
    done: bool,
}

impl<'a> Keys<'a> {
    pub(super) fn new(engine: &'a mut Engine) -> Self {
        Self {
            engine,
            cursor: Cursor::new(),
            done: false,
        }
    }
}

impl<'a> Iterator for Keys<'a> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.engine.next_key(&mut self.cursor) {
            Ok(Some(key)) => Some(Ok(key)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
