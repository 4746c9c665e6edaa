//! Directory
//!
//! Table of `2^bits` bucket addresses indexed by the low bits of a hash.

use serde::{Deserialize, Serialize};

use crate::config::MAX_DIRECTORY_BITS;
use crate::error::{DbmError, Result};
use crate::storage::{decode_framed, encode_framed};

use super::low_mask;

/// Extensible hash directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    /// Global depth; the table has `2^bits` slots
    bits: u32,
    /// Bucket block address per slot
    buckets: Vec<u64>,
}

impl Directory {
    /// A depth-0 directory routing everything to one bucket
    pub fn new(bucket: u64) -> Self {
        Self {
            bits: 0,
            buckets: vec![bucket],
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Slot index a hash routes to
    pub fn slot_for(&self, hash: u32) -> usize {
        (hash as u64 & low_mask(self.bits)) as usize
    }

    /// Bucket address a hash routes to
    pub fn bucket_for(&self, hash: u32) -> u64 {
        self.buckets[self.slot_for(hash)]
    }

    /// Bucket address stored in a slot
    pub fn bucket_at(&self, slot: usize) -> Option<u64> {
        self.buckets.get(slot).copied()
    }

    /// Double the table; slot `i + old_len` starts as a copy of slot `i`
    pub fn double(&mut self) -> Result<()> {
        if self.bits >= MAX_DIRECTORY_BITS {
            return Err(DbmError::BucketOverflow { depth: self.bits });
        }
        self.buckets.extend_from_within(..);
        self.bits += 1;
        Ok(())
    }

    /// Point every slot of the family `(hash, depth)` that references `old`
    /// at `new` instead
    pub fn relocate(&mut self, hash: u32, depth: u32, old: u64, new: u64) {
        for slot in self.family(hash, depth) {
            if self.buckets[slot] == old {
                self.buckets[slot] = new;
            }
        }
    }

    /// Re-route the family of a bucket that just split from `depth` to
    /// `depth + 1`: slots with bit `depth` set go to `high`, the rest to `low`
    pub fn split(&mut self, hash: u32, depth: u32, low: u64, high: u64) {
        for slot in self.family(hash, depth) {
            self.buckets[slot] = if (slot >> depth) & 1 == 1 { high } else { low };
        }
    }

    /// Distinct bucket addresses in first-seen slot order
    pub fn distinct_buckets(&self) -> Vec<u64> {
        let mut seen = std::collections::HashSet::new();
        self.buckets
            .iter()
            .copied()
            .filter(|addr| seen.insert(*addr))
            .collect()
    }

    /// Serialized form stored in the directory extent
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_framed(self)
    }

    /// Decode and sanity-check a directory extent
    pub fn decode(bytes: &[u8], next_block: u64) -> Result<Self> {
        let dir: Directory = decode_framed(bytes, "directory")?;

        if dir.bits > MAX_DIRECTORY_BITS || dir.buckets.len() as u64 != 1u64 << dir.bits {
            return Err(DbmError::Format(format!(
                "directory of depth {} has {} slots",
                dir.bits,
                dir.buckets.len()
            )));
        }

        if let Some(bad) = dir.buckets.iter().find(|&&a| a == 0 || a >= next_block) {
            return Err(DbmError::Format(format!(
                "directory points at invalid bucket block {}",
                bad
            )));
        }

        Ok(dir)
    }

    /// Slots whose low `depth` bits equal those of `hash`
    fn family(&self, hash: u32, depth: u32) -> impl Iterator<Item = usize> {
        let base = (hash as u64 & low_mask(depth)) as usize;
        let step = 1usize << depth;
        (base..self.buckets.len()).step_by(step)
    }
}
