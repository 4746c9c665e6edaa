//! Block Store
//!
//! Raw block I/O over the database file plus extent allocation.
//!
//! ## Allocation epochs
//! Blocks referenced by the last committed header must never be overwritten.
//! The store therefore tracks three things between commits:
//! - `avail`: free space usable right now
//! - `pending`: extents released since the last commit; still referenced by
//!   the committed header, so they only become usable after the next commit
//! - `fresh`: extents handed out since the last commit; these are invisible
//!   to the committed header and may be rewritten or freed immediately

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{DbmError, Result};

use super::{AvailList, FileHeader, HEADER_SLOTS, HEADER_SLOT_SIZE};

/// Fixed-size block storage over a single file
pub struct BlockStore {
    /// Database file handle
    file: File,
    /// Block size in bytes
    block_size: usize,
    /// First block past the allocated region
    next_block: u64,
    /// Free extents usable now
    avail: AvailList,
    /// Extents released since the last commit
    pending: AvailList,
    /// Extents allocated since the last commit: first block → block count
    fresh: HashMap<u64, u32>,
}

impl BlockStore {
    /// Start a new, empty store (the file is expected to be truncated)
    pub fn create(file: File, block_size: usize) -> Result<Self> {
        // Block 0 holds the header slots; make it exist as zeroes.
        file.set_len(block_size as u64)?;

        Ok(Self {
            file,
            block_size,
            next_block: 1,
            avail: AvailList::new(),
            pending: AvailList::new(),
            fresh: HashMap::new(),
        })
    }

    /// Attach to an existing file described by `header`
    ///
    /// The avail list is loaded separately with `set_avail` because it lives
    /// in blocks this store has to read first.
    pub fn open(file: File, header: &FileHeader) -> Result<Self> {
        let block_size = header.block_size as usize;
        let file_len = file.metadata()?.len();
        let needed = header.next_block * block_size as u64;

        if file_len < needed {
            return Err(DbmError::Format(format!(
                "file is {} bytes, header expects at least {}",
                file_len, needed
            )));
        }

        Ok(Self {
            file,
            block_size,
            next_block: header.next_block,
            avail: AvailList::new(),
            pending: AvailList::new(),
            fresh: HashMap::new(),
        })
    }

    /// Read both header slots from block 0
    pub fn read_header_slots(file: &mut File) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut buf = vec![0u8; HEADER_SLOT_SIZE * HEADER_SLOTS];
        file.seek(SeekFrom::Start(0))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        if filled < buf.len() {
            return Err(DbmError::Format(format!(
                "file too short for a header ({} bytes)",
                filled
            )));
        }

        let slot_b = buf.split_off(HEADER_SLOT_SIZE);
        Ok((buf, slot_b))
    }

    /// Re-read header slots through this store's handle
    pub fn reload_header(&mut self) -> Result<FileHeader> {
        let (a, b) = Self::read_header_slots(&mut self.file)?;
        FileHeader::select(&a, &b)
    }

    /// Write an encoded header into its slot
    pub fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        let bytes = header.encode()?;
        let offset = (header.slot() * HEADER_SLOT_SIZE) as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    // =========================================================================
    // Block I/O
    // =========================================================================

    /// Read a single block
    pub fn read_block(&mut self, addr: u64) -> Result<Vec<u8>> {
        self.read_blocks(addr, 1)
    }

    /// Read `count` contiguous blocks starting at `addr`
    pub fn read_blocks(&mut self, addr: u64, count: u32) -> Result<Vec<u8>> {
        self.check_range(addr, count)?;

        let mut buf = vec![0u8; count as usize * self.block_size];
        self.file.seek(SeekFrom::Start(self.offset(addr)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write a single block; shorter data is zero padded
    pub fn write_block(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        if data.len() > self.block_size {
            return Err(DbmError::Format(format!(
                "{} bytes do not fit in one {}-byte block",
                data.len(),
                self.block_size
            )));
        }
        self.write_blocks(addr, data)
    }

    /// Write data across as many blocks as it needs, zero padding the last
    pub fn write_blocks(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let count = super::blocks_for(data.len(), self.block_size);
        self.check_range(addr, count)?;

        let mut buf = data.to_vec();
        buf.resize(count as usize * self.block_size, 0);

        self.file.seek(SeekFrom::Start(self.offset(addr)))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate `count` contiguous blocks, reusing free space first
    pub fn allocate_blocks(&mut self, count: u32) -> Result<u64> {
        if count == 0 {
            return Err(DbmError::Format("zero-block allocation".to_string()));
        }

        let addr = match self.avail.allocate(count) {
            Some(addr) => addr,
            None => {
                let addr = self.next_block;
                self.next_block += count as u64;
                addr
            }
        };

        self.fresh.insert(addr, count);
        Ok(addr)
    }

    /// Release an extent previously returned by `allocate_blocks`
    ///
    /// Extents allocated since the last commit are reusable immediately;
    /// committed extents wait in `pending` until the next commit lands.
    pub fn free_blocks(&mut self, addr: u64, count: u32) -> Result<()> {
        match self.fresh.remove(&addr) {
            Some(_) => self.avail.release(addr, count),
            None => self.pending.release(addr, count),
        }
    }

    /// Whether `addr` starts an extent allocated since the last commit
    pub fn is_fresh(&self, addr: u64) -> bool {
        self.fresh.contains_key(&addr)
    }

    /// Free space the next commit will record: usable plus pending, plus
    /// any extra extents the commit itself is about to retire
    pub fn committed_free_list(&self, retiring: &[(u64, u32)]) -> Result<Vec<(u64, u32)>> {
        let mut list = self.avail.clone();
        list.absorb(&mut self.pending.clone())?;
        for &(addr, count) in retiring {
            list.release(addr, count)?;
        }
        Ok(list.extents())
    }

    /// Close the allocation epoch after a header landed on disk
    pub fn finish_commit(&mut self) -> Result<()> {
        self.avail.absorb(&mut self.pending)?;
        self.fresh.clear();
        Ok(())
    }

    /// Treat everything allocated since the last commit as committed
    ///
    /// Used when a header write was issued but not confirmed: that header
    /// may be live, so none of its blocks can be rewritten. `reserved`
    /// extents are referenced only by that header; they are released once a
    /// later commit lands in the same slot.
    pub fn seal_unconfirmed(&mut self, reserved: &[(u64, u32)]) -> Result<()> {
        for &(addr, count) in reserved {
            self.fresh.remove(&addr);
            self.pending.release(addr, count)?;
        }
        self.fresh.clear();
        Ok(())
    }

    /// Install a persisted avail list (open path)
    pub fn set_avail(&mut self, avail: AvailList) {
        self.avail = avail;
    }

    /// Follow a newer committed header (read-only handles)
    pub fn set_next_block(&mut self, next_block: u64) {
        self.next_block = next_block;
    }

    // =========================================================================
    // Durability & Accessors
    // =========================================================================

    /// Make the file cover the whole allocated region, including blocks
    /// that were allocated but never written
    pub fn extend_to_end(&mut self) -> Result<()> {
        let needed = self.next_block * self.block_size as u64;
        if self.file.metadata()?.len() < needed {
            self.file.set_len(needed)?;
        }
        Ok(())
    }

    /// Force written blocks to durable storage
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Free space usable right now
    pub fn avail(&self) -> &AvailList {
        &self.avail
    }

    /// Space released since the last commit
    pub fn pending(&self) -> &AvailList {
        &self.pending
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn offset(&self, addr: u64) -> u64 {
        addr * self.block_size as u64
    }

    fn check_range(&self, addr: u64, count: u32) -> Result<()> {
        if addr == 0 {
            return Err(DbmError::Format(
                "block 0 is reserved for the header".to_string(),
            ));
        }
        if addr + count as u64 > self.next_block {
            return Err(DbmError::Format(format!(
                "blocks {}+{} past end of allocated space ({})",
                addr, count, self.next_block
            )));
        }
        Ok(())
    }
}
