//! Bucket pointers and page encoding

use bytes::BufMut;

use crate::codec::Decoder;
use crate::error::Result;
use crate::format::PAGE_SLOTS;

/// Where a bucket's encoded contents live; `size == 0` means empty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketPointer {
    pub offset: u32,
    pub size: u32,
}

impl BucketPointer {
    pub const EMPTY: BucketPointer = BucketPointer { offset: 0, size: 0 };

    pub fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        let mut buf = &mut out[..];
        buf.put_u32(self.offset);
        buf.put_u32(self.size);
        out
    }
}

/// One page: bucket pointers for 256 consecutive bucket numbers
pub type Page = Vec<BucketPointer>;

pub(crate) fn decode_page(bytes: &[u8]) -> Result<Page> {
    let mut dec = Decoder::new(bytes, "page");
    (0..PAGE_SLOTS)
        .map(|_| -> Result<BucketPointer> {
            let offset = dec.read_u32()?;
            let size = dec.read_u32()?;
            Ok(BucketPointer::new(offset, size))
        })
        .collect()
}
