//! File Header
//!
//! The header is the commit point of the file. Two copies live in block 0;
//! each commit writes the slot not holding the current generation, so a torn
//! header write always leaves the previous generation readable.

use serde::{Deserialize, Serialize};

use crate::config::{MAX_BLOCK_SIZE, MAX_DIRECTORY_BITS, MIN_BLOCK_SIZE};
use crate::error::{DbmError, Result};
use crate::index::Bucket;

use super::{decode_framed, encode_framed, HEADER_SLOT_SIZE, MAGIC, VERSION};

/// Persisted database header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub version: u16,
    /// Block size in bytes, fixed at creation
    pub block_size: u32,
    /// Slots per bucket, derived from the block size at creation
    pub bucket_capacity: u32,
    /// Incremented by every commit; selects the live header slot
    pub generation: u64,
    /// First block of the directory extent (0 = not yet written)
    pub dir_addr: u64,
    pub dir_blocks: u32,
    pub dir_bits: u32,
    /// First block of the avail extent (0 = not yet written)
    pub avail_addr: u64,
    pub avail_blocks: u32,
    /// First block past the allocated region
    pub next_block: u64,
    /// Number of live records
    pub record_count: u64,
}

impl FileHeader {
    /// Header for a brand-new file (generation 0, nothing committed)
    pub fn new(block_size: usize) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            block_size: block_size as u32,
            bucket_capacity: Bucket::capacity_for(block_size) as u32,
            generation: 0,
            dir_addr: 0,
            dir_blocks: 0,
            dir_bits: 0,
            avail_addr: 0,
            avail_blocks: 0,
            next_block: 1,
            record_count: 0,
        }
    }

    /// Which header slot this generation is written to
    pub fn slot(&self) -> usize {
        (self.generation % 2) as usize
    }

    /// Encode into exactly one header slot
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = encode_framed(self)?;
        if buf.len() > HEADER_SLOT_SIZE {
            return Err(DbmError::Serialization(format!(
                "header encodes to {} bytes, slot holds {}",
                buf.len(),
                HEADER_SLOT_SIZE
            )));
        }
        buf.resize(HEADER_SLOT_SIZE, 0);
        Ok(buf)
    }

    /// Decode and validate one header slot
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header: FileHeader = decode_framed(bytes, "header")?;
        header.validate()?;
        Ok(header)
    }

    /// Pick the newest valid header out of the two slots
    pub fn select(slot_a: &[u8], slot_b: &[u8]) -> Result<Self> {
        let mut best: Option<FileHeader> = None;
        let mut last_error = None;

        for (index, bytes) in [slot_a, slot_b].into_iter().enumerate() {
            match Self::decode(bytes) {
                Ok(header) => {
                    if best.as_ref().map_or(true, |b| header.generation > b.generation) {
                        best = Some(header);
                    }
                }
                Err(e) => {
                    // An all-zero slot is simply unused.
                    if bytes.iter().any(|&b| b != 0) {
                        tracing::warn!("Ignoring damaged header slot {}: {}", index, e);
                    }
                    last_error = Some(e);
                }
            }
        }

        best.ok_or_else(|| match last_error {
            Some(DbmError::Format(msg)) => DbmError::Format(msg),
            _ => DbmError::Format("no valid header".to_string()),
        })
    }

    fn validate(&self) -> Result<()> {
        if &self.magic != MAGIC {
            return Err(DbmError::Format(format!(
                "invalid magic: expected ADBM, got {:?}",
                self.magic
            )));
        }

        if self.version != VERSION {
            return Err(DbmError::Format(format!(
                "unsupported version: {}",
                self.version
            )));
        }

        let block_size = self.block_size as usize;
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
            || block_size % MIN_BLOCK_SIZE != 0
        {
            return Err(DbmError::Format(format!(
                "invalid block size: {}",
                block_size
            )));
        }

        if self.bucket_capacity as usize != Bucket::capacity_for(block_size) {
            return Err(DbmError::Format(format!(
                "bucket capacity {} does not match block size {}",
                self.bucket_capacity, block_size
            )));
        }

        if self.dir_bits > MAX_DIRECTORY_BITS {
            return Err(DbmError::Format(format!(
                "directory depth {} too large",
                self.dir_bits
            )));
        }

        if self.dir_addr == 0 || self.avail_addr == 0 {
            return Err(DbmError::Format("header was never committed".to_string()));
        }

        let extent_end = |addr: u64, blocks: u32| addr + blocks as u64;
        if extent_end(self.dir_addr, self.dir_blocks) > self.next_block
            || extent_end(self.avail_addr, self.avail_blocks) > self.next_block
        {
            return Err(DbmError::Format(
                "metadata extent past end of allocated space".to_string(),
            ));
        }

        Ok(())
    }
}
