//! Bucket
//!
//! A bucket occupies exactly one block.
//!
//! ## Block Layout
//! ```text
//! ┌────────────┬────────────┬──────────┬──────────────┐
//! │ Depth (4)  │ Count (4)  │ CRC (4)  │ Reserved (4) │
//! ├────────────┴────────────┴──────────┴──────────────┤
//! │ Slot × Count (28 bytes each)                      │
//! │   Hash (4) | KeyLen (4) | ValLen (4)              │
//! │   RecordAddr (8) | RecordBlocks (4) | Prefix (4)  │
//! ├───────────────────────────────────────────────────┤
//! │ zero fill to block size                           │
//! └───────────────────────────────────────────────────┘
//! ```
//! The CRC covers depth, count and the slot bytes.

use bytes::{Buf, BufMut};

use crate::config::MAX_DIRECTORY_BITS;
use crate::error::{DbmError, Result};

/// Fixed bucket header size
pub const BUCKET_HEADER_SIZE: usize = 16;

/// Encoded size of one slot
pub const SLOT_SIZE: usize = 28;

/// Location and identity of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSlot {
    /// Full key hash
    pub hash: u32,
    pub key_len: u32,
    pub value_len: u32,
    /// First block of the record extent
    pub record_addr: u64,
    /// Blocks allocated to the record (may exceed what it currently needs)
    pub record_blocks: u32,
    /// First bytes of the key, zero padded; rejects most collisions
    /// without reading the record
    pub key_prefix: [u8; 4],
}

impl BucketSlot {
    pub fn new(hash: u32, key: &[u8], value_len: usize, record_addr: u64, record_blocks: u32) -> Self {
        Self {
            hash,
            key_len: key.len() as u32,
            value_len: value_len as u32,
            record_addr,
            record_blocks,
            key_prefix: Self::prefix_of(key),
        }
    }

    /// Cheap pre-check before comparing the stored key
    pub fn may_hold(&self, hash: u32, key: &[u8]) -> bool {
        self.hash == hash
            && self.key_len as usize == key.len()
            && self.key_prefix == Self::prefix_of(key)
    }

    fn prefix_of(key: &[u8]) -> [u8; 4] {
        let mut prefix = [0u8; 4];
        let n = key.len().min(4);
        prefix[..n].copy_from_slice(&key[..n]);
        prefix
    }
}

/// Fixed-capacity hash bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Local depth: number of low hash bits shared by every entry
    depth: u32,
    slots: Vec<BucketSlot>,
}

impl Bucket {
    /// Empty bucket at the given local depth
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            slots: Vec::new(),
        }
    }

    /// Slots that fit in one block of `block_size` bytes
    pub fn capacity_for(block_size: usize) -> usize {
        (block_size - BUCKET_HEADER_SIZE) / SLOT_SIZE
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[BucketSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&BucketSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut BucketSlot> {
        self.slots.get_mut(index)
    }

    /// Indices of slots that may hold `key`
    pub fn candidates(&self, hash: u32, key: &[u8]) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.may_hold(hash, key))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn push(&mut self, slot: BucketSlot) {
        self.slots.push(slot);
    }

    /// Remove a slot, keeping the order of the others
    pub fn remove(&mut self, index: usize) -> Option<BucketSlot> {
        (index < self.slots.len()).then(|| self.slots.remove(index))
    }

    /// Split on hash bit `depth`
    ///
    /// Raises this bucket's depth by one and returns the sibling holding the
    /// entries whose bit is set. Either half may end up empty.
    pub fn split(&mut self) -> Bucket {
        let bit = self.depth;
        let (high, low): (Vec<_>, Vec<_>) = std::mem::take(&mut self.slots)
            .into_iter()
            .partition(|s| (s.hash >> bit) & 1 == 1);

        self.depth += 1;
        self.slots = low;

        Bucket {
            depth: self.depth,
            slots: high,
        }
    }

    /// Encode into one block
    pub fn encode(&self, block_size: usize) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.slots.len() * SLOT_SIZE);
        for slot in &self.slots {
            body.put_u32_le(slot.hash);
            body.put_u32_le(slot.key_len);
            body.put_u32_le(slot.value_len);
            body.put_u64_le(slot.record_addr);
            body.put_u32_le(slot.record_blocks);
            body.put_slice(&slot.key_prefix);
        }

        let mut buf = Vec::with_capacity(block_size);
        buf.put_u32_le(self.depth);
        buf.put_u32_le(self.slots.len() as u32);
        let crc = Self::checksum(&buf, &body);
        buf.put_u32_le(crc);
        buf.put_u32_le(0);
        buf.put_slice(&body);
        buf.resize(block_size, 0);
        buf
    }

    /// Decode a bucket block holding at most `capacity` slots
    pub fn decode(bytes: &[u8], capacity: usize) -> Result<Self> {
        if bytes.len() < BUCKET_HEADER_SIZE {
            return Err(DbmError::Format("bucket block truncated".to_string()));
        }

        let mut header = &bytes[..BUCKET_HEADER_SIZE];
        let depth = header.get_u32_le();
        let count = header.get_u32_le() as usize;
        let crc = header.get_u32_le();

        if count > capacity {
            return Err(DbmError::Format(format!(
                "bucket holds {} slots, capacity is {}",
                count, capacity
            )));
        }

        let body_end = BUCKET_HEADER_SIZE + count * SLOT_SIZE;
        let body = bytes
            .get(BUCKET_HEADER_SIZE..body_end)
            .ok_or_else(|| DbmError::Format("bucket slots truncated".to_string()))?;

        if Self::checksum(&bytes[..8], body) != crc {
            return Err(DbmError::Format("bucket checksum mismatch".to_string()));
        }

        if depth > MAX_DIRECTORY_BITS {
            return Err(DbmError::Format(format!("bucket depth {} too large", depth)));
        }

        let mut cursor = body;
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let hash = cursor.get_u32_le();
            let key_len = cursor.get_u32_le();
            let value_len = cursor.get_u32_le();
            let record_addr = cursor.get_u64_le();
            let record_blocks = cursor.get_u32_le();
            let mut key_prefix = [0u8; 4];
            cursor.copy_to_slice(&mut key_prefix);

            slots.push(BucketSlot {
                hash,
                key_len,
                value_len,
                record_addr,
                record_blocks,
                key_prefix,
            });
        }

        Ok(Self { depth, slots })
    }

    /// CRC over depth, count and slot bytes
    fn checksum(depth_and_count: &[u8], body: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(depth_and_count);
        hasher.update(body);
        hasher.finalize()
    }
}
