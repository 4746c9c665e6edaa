//! Storage Module
//!
//! Fixed-size block storage over a single database file.
//!
//! ## Responsibilities
//! - Block I/O addressed by block number, never by raw offset
//! - Extent allocation with first-fit reuse of freed space
//! - Double-slot file header used as the single commit point
//! - Advisory writer lock
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Block 0                                                  │
//! │   Header slot A (256) │ Header slot B (256) │ zero fill  │
//! ├──────────────────────────────────────────────────────────┤
//! │ Block 1..N (any order)                                   │
//! │   Directory extent  [Len][CRC][bincode(bits, buckets)]   │
//! │   Bucket blocks     [Depth][Count][CRC][Rsvd][Slot...]   │
//! │   Avail extent      [Len][CRC][bincode(extents)]         │
//! │   Record extents    [KeyLen][ValLen][CRC][Key][Value]    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A header slot holds `[Len][CRC][bincode(FileHeader)]`. The slot with the
//! highest valid generation is the committed state; commits alternate slots.

mod avail;
mod block;
mod header;
mod lock;

use bytes::{Buf, BufMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DbmError, Result};

pub use avail::AvailList;
pub use block::BlockStore;
pub use header::FileHeader;
pub use lock::try_lock_exclusive;

// =============================================================================
// Shared Constants
// =============================================================================

/// Magic bytes identifying an AtlasDBM file
pub const MAGIC: &[u8; 4] = b"ADBM";

/// Current file format version
pub const VERSION: u16 = 1;

/// Size of one header slot inside block 0
pub const HEADER_SLOT_SIZE: usize = 256;

/// Number of alternating header slots
pub const HEADER_SLOTS: usize = 2;

/// Frame prefix: payload length (4) + CRC32 of payload (4)
pub(crate) const FRAME_PREFIX_SIZE: usize = 8;

// =============================================================================
// Framed Metadata Codec
// =============================================================================

/// Serialize a metadata structure as `[len][crc][bincode payload]`
pub(crate) fn encode_framed<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value)?;
    let mut buf = Vec::with_capacity(FRAME_PREFIX_SIZE + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_u32_le(crc32fast::hash(&payload));
    buf.put_slice(&payload);
    Ok(buf)
}

/// Decode a frame written by `encode_framed`, verifying length and CRC
pub(crate) fn decode_framed<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    if bytes.len() < FRAME_PREFIX_SIZE {
        return Err(DbmError::Format(format!("{} frame truncated", what)));
    }

    let mut prefix = &bytes[..FRAME_PREFIX_SIZE];
    let len = prefix.get_u32_le() as usize;
    let crc = prefix.get_u32_le();

    let payload = bytes
        .get(FRAME_PREFIX_SIZE..FRAME_PREFIX_SIZE + len)
        .ok_or_else(|| DbmError::Format(format!("{} frame length {} out of range", what, len)))?;

    if crc32fast::hash(payload) != crc {
        return Err(DbmError::Format(format!("{} checksum mismatch", what)));
    }

    bincode::deserialize(payload).map_err(|e| DbmError::Format(format!("{}: {}", what, e)))
}

/// Number of blocks needed to hold `len` bytes (at least one)
pub fn blocks_for(len: usize, block_size: usize) -> u32 {
    len.div_ceil(block_size).max(1) as u32
}
