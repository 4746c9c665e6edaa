//! Record Codec
//!
//! Stores one key/value pair in a contiguous extent of blocks.
//!
//! ## Record Layout
//! ```text
//! ┌─────────────┬─────────────┬─────────┬───────┬─────────┐
//! │ KeyLen (4)  │ ValLen (4)  │ CRC (4) │  Key  │  Value  │
//! └─────────────┴─────────────┴─────────┴───────┴─────────┘
//! ```
//! The CRC covers key and value. A record larger than one block spans the
//! following blocks of its extent; callers only ever see flat bytes.

use bytes::{Buf, BufMut};

use crate::error::{DbmError, Result};
use crate::index::BucketSlot;
use crate::storage::{blocks_for, BlockStore};

/// Fixed record header size
pub const RECORD_HEADER_SIZE: usize = 12;

/// A decoded key/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Encoded size of a record
pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    RECORD_HEADER_SIZE + key_len + value_len
}

/// Blocks a record needs at the given block size
pub fn blocks_needed(key_len: usize, value_len: usize, block_size: usize) -> u32 {
    blocks_for(encoded_len(key_len, value_len), block_size)
}

/// Serialize a record
pub fn encode(key: &[u8], value: &[u8]) -> Result<Vec<u8>> {
    let key_len = u32::try_from(key.len())
        .map_err(|_| DbmError::Serialization("key longer than 4 GiB".to_string()))?;
    let value_len = u32::try_from(value.len())
        .map_err(|_| DbmError::Serialization("value longer than 4 GiB".to_string()))?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);

    let mut buf = Vec::with_capacity(encoded_len(key.len(), value.len()));
    buf.put_u32_le(key_len);
    buf.put_u32_le(value_len);
    buf.put_u32_le(hasher.finalize());
    buf.put_slice(key);
    buf.put_slice(value);
    Ok(buf)
}

/// Parse and verify a record extent
pub fn decode(bytes: &[u8]) -> Result<Record> {
    let (key_len, value_len, crc) = decode_header(bytes)?;

    let key_end = RECORD_HEADER_SIZE + key_len;
    let value_end = key_end + value_len;
    if bytes.len() < value_end {
        return Err(DbmError::Format("record extent truncated".to_string()));
    }

    let key = &bytes[RECORD_HEADER_SIZE..key_end];
    let value = &bytes[key_end..value_end];

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    if hasher.finalize() != crc {
        return Err(DbmError::Format("record checksum mismatch".to_string()));
    }

    Ok(Record {
        key: key.to_vec(),
        value: value.to_vec(),
    })
}

/// Write a record into a newly allocated extent, returning `(addr, blocks)`
pub fn write_new(store: &mut BlockStore, key: &[u8], value: &[u8]) -> Result<(u64, u32)> {
    let bytes = encode(key, value)?;
    let blocks = blocks_for(bytes.len(), store.block_size());
    let addr = store.allocate_blocks(blocks)?;

    if let Err(e) = store.write_blocks(addr, &bytes) {
        store.free_blocks(addr, blocks)?;
        return Err(e);
    }
    Ok((addr, blocks))
}

/// Overwrite a record inside the extent it already owns
pub fn write_in_place(store: &mut BlockStore, slot: &BucketSlot, key: &[u8], value: &[u8]) -> Result<()> {
    let bytes = encode(key, value)?;
    if blocks_for(bytes.len(), store.block_size()) > slot.record_blocks {
        return Err(DbmError::Format(
            "record does not fit its extent".to_string(),
        ));
    }
    store.write_blocks(slot.record_addr, &bytes)
}

/// Read the full record a slot points at
pub fn read(store: &mut BlockStore, slot: &BucketSlot) -> Result<Record> {
    let needed = blocks_needed(slot.key_len as usize, slot.value_len as usize, store.block_size());
    let bytes = store.read_blocks(slot.record_addr, needed.min(slot.record_blocks))?;
    let record = decode(&bytes)?;

    if record.key.len() != slot.key_len as usize || record.value.len() != slot.value_len as usize {
        return Err(DbmError::Format(
            "record lengths disagree with bucket slot".to_string(),
        ));
    }
    Ok(record)
}

/// Read just the key of a record, touching only the blocks it spans
pub fn read_key(store: &mut BlockStore, slot: &BucketSlot) -> Result<Vec<u8>> {
    let key_len = slot.key_len as usize;
    let needed = blocks_for(RECORD_HEADER_SIZE + key_len, store.block_size());
    let bytes = store.read_blocks(slot.record_addr, needed.min(slot.record_blocks))?;

    let (stored_len, _, _) = decode_header(&bytes)?;
    if stored_len != key_len || bytes.len() < RECORD_HEADER_SIZE + key_len {
        return Err(DbmError::Format(
            "record key length disagrees with bucket slot".to_string(),
        ));
    }
    Ok(bytes[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + key_len].to_vec())
}

fn decode_header(bytes: &[u8]) -> Result<(usize, usize, u32)> {
    if bytes.len() < RECORD_HEADER_SIZE {
        return Err(DbmError::Format("record header truncated".to_string()));
    }
    let mut header = &bytes[..RECORD_HEADER_SIZE];
    let key_len = header.get_u32_le() as usize;
    let value_len = header.get_u32_le() as usize;
    let crc = header.get_u32_le();
    Ok((key_len, value_len, crc))
}
