//! Block metadata table for SST files.
//!
//! One record per data block: its file offset and first/last keys. The
//! table is ordered by offset, which is also first-key order, so the
//! reader can binary-search it to locate the block covering a key.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Metadata describing one data block of an SST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    /// Byte offset of the encoded block within the file.
    pub offset: u32,
    /// First key stored in the block.
    pub first_key: Bytes,
    /// Last key stored in the block.
    pub last_key: Bytes,
}

impl BlockMeta {
    /// Create a new block meta record.
    pub fn new(offset: u32, first_key: Bytes, last_key: Bytes) -> Self {
        Self { offset, first_key, last_key }
    }

    /// Encode a meta array to its on-disk layout.
    ///
    /// Format: `count: u32`, then per record
    /// `offset: u32, first_key_len: u16, first_key, last_key_len: u16,
    /// last_key`, all little-endian.
    pub fn encode_meta(metas: &[BlockMeta]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(metas.len() as u32);
        for meta in metas {
            buf.put_u32_le(meta.offset);
            buf.put_u16_le(meta.first_key.len() as u16);
            buf.put_slice(&meta.first_key);
            buf.put_u16_le(meta.last_key.len() as u16);
            buf.put_slice(&meta.last_key);
        }
        buf.freeze()
    }

    /// Decode a meta array from its on-disk layout.
    pub fn decode_meta(mut data: &[u8]) -> Result<Vec<BlockMeta>> {
        if data.len() < 4 {
            return Err(Error::corrupted_sst("block meta table too short"));
        }
        let count = data.get_u32_le() as usize;

        let mut metas = Vec::with_capacity(count);
        for _ in 0..count {
            if data.remaining() < 4 + 2 {
                return Err(Error::corrupted_sst("block meta record truncated"));
            }
            let offset = data.get_u32_le();

            let first_key_len = data.get_u16_le() as usize;
            if data.remaining() < first_key_len + 2 {
                return Err(Error::corrupted_sst("block meta first key truncated"));
            }
            let first_key = Bytes::copy_from_slice(&data[..first_key_len]);
            data.advance(first_key_len);

            let last_key_len = data.get_u16_le() as usize;
            if data.remaining() < last_key_len {
                return Err(Error::corrupted_sst("block meta last key truncated"));
            }
            let last_key = Bytes::copy_from_slice(&data[..last_key_len]);
            data.advance(last_key_len);

            metas.push(BlockMeta { offset, first_key, last_key });
        }
        if data.has_remaining() {
            return Err(Error::corrupted_sst("trailing bytes after block meta table"));
        }
        Ok(metas)
    }
}
