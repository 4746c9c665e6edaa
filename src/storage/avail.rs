//! Avail List
//!
//! Free-extent registry. Extents are kept ordered by block address so that
//! neighbours coalesce on release and allocation is first-fit in address
//! order.

use std::collections::BTreeMap;

use crate::error::{DbmError, Result};

/// Ordered set of free extents `(first block, block count)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailList {
    extents: BTreeMap<u64, u32>,
}

impl AvailList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a list from persisted extents, rejecting overlaps
    pub fn from_extents(extents: &[(u64, u32)]) -> Result<Self> {
        let mut list = Self::new();
        for &(addr, count) in extents {
            list.release(addr, count)?;
        }
        Ok(list)
    }

    /// Take `count` contiguous blocks from the first extent large enough
    pub fn allocate(&mut self, count: u32) -> Option<u64> {
        let (&addr, &len) = self.extents.iter().find(|(_, &len)| len >= count)?;

        self.extents.remove(&addr);
        if len > count {
            self.extents.insert(addr + count as u64, len - count);
        }
        Some(addr)
    }

    /// Return an extent, merging it with adjacent free extents
    ///
    /// Fails with `Format` if the extent overlaps one already tracked, which
    /// would mean the same blocks were freed twice.
    pub fn release(&mut self, addr: u64, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        let end = addr + count as u64;
        let mut start = addr;
        let mut len = count;

        if let Some((&prev_addr, &prev_len)) = self.extents.range(..=addr).next_back() {
            let prev_end = prev_addr + prev_len as u64;
            if prev_end > addr {
                return Err(Self::overlap(addr, count));
            }
            if prev_end == addr {
                self.extents.remove(&prev_addr);
                start = prev_addr;
                len += prev_len;
            }
        }

        if let Some((&next_addr, &next_len)) = self.extents.range(addr + 1..).next() {
            if next_addr < end {
                return Err(Self::overlap(addr, count));
            }
            if next_addr == end {
                self.extents.remove(&next_addr);
                len += next_len;
            }
        }

        self.extents.insert(start, len);
        Ok(())
    }

    /// Move every extent of `other` into this list
    pub fn absorb(&mut self, other: &mut AvailList) -> Result<()> {
        for (addr, count) in std::mem::take(&mut other.extents) {
            self.release(addr, count)?;
        }
        Ok(())
    }

    /// Whether the block at `addr` lies inside a free extent
    pub fn contains(&self, addr: u64) -> bool {
        self.extents
            .range(..=addr)
            .next_back()
            .map(|(&start, &len)| addr < start + len as u64)
            .unwrap_or(false)
    }

    /// Snapshot of all extents in address order
    pub fn extents(&self) -> Vec<(u64, u32)> {
        self.extents.iter().map(|(&a, &n)| (a, n)).collect()
    }

    /// Number of distinct extents
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Total number of free blocks
    pub fn total_blocks(&self) -> u64 {
        self.extents.values().map(|&n| n as u64).sum()
    }

    fn overlap(addr: u64, count: u32) -> DbmError {
        DbmError::Format(format!(
            "extent {}+{} overlaps free space (double free)",
            addr, count
        ))
    }
}
