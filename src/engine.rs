//! Engine Module
//!
//! The single-handle storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Open, create or recreate the database file
//! - Route keys through the directory to buckets and records
//! - Split buckets and grow the directory
//! - Commit modified state with shadow writes and a double-slot header
//! - Rebuild the file on reorganize
//!
//! ## Commit Protocol
//! Nothing referenced by the committed header is ever overwritten:
//! 1. Records are written to fresh extents as operations run
//! 2. A modified bucket moves to a fresh block (copy-on-write) the first
//!    time it changes after a commit
//! 3. `commit()` writes dirty buckets, a new directory extent and a new
//!    avail extent, fsyncs, then writes the header into the other slot and
//!    fsyncs again
//!
//! A crash at any point leaves the previous header and everything it points
//! at intact.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::config::{CommitStrategy, Config, OpenMode};
use crate::error::{DbmError, Result};
use crate::index::{hash_key, low_mask, Bucket, BucketCache, BucketSlot, Directory};
use crate::record;
use crate::storage::{
    blocks_for, decode_framed, encode_framed, try_lock_exclusive, AvailList, BlockStore,
    FileHeader,
};

/// Where a key lives
struct Location {
    hash: u32,
    /// Bucket block holding the slot
    bucket: u64,
    /// Slot index inside the bucket
    index: usize,
    slot: BucketSlot,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub block_size: usize,
    pub bucket_capacity: usize,
    pub directory_bits: u32,
    pub bucket_count: usize,
    pub record_count: u64,
    /// Blocks in the allocated region, header block included
    pub allocated_blocks: u64,
    /// Free blocks, whether reusable now or after the next commit
    pub free_blocks: u64,
    /// Generation of the last committed header
    pub generation: u64,
    pub cached_buckets: usize,
    pub dirty_buckets: usize,
}

/// The storage engine behind a `Database` handle
pub(crate) struct Engine {
    path: PathBuf,
    mode: OpenMode,
    config: Config,

    /// Block I/O and allocation
    store: BlockStore,

    /// Last committed header
    header: FileHeader,

    /// In-memory directory (written at commit when `dir_dirty`)
    directory: Directory,
    dir_dirty: bool,

    /// Decoded buckets; dirty ones are pinned until commit
    cache: BucketCache,

    record_count: u64,

    /// Anything changed since the last commit
    dirty: bool,
    writes_since_commit: usize,
}

impl Engine {
    /// Suffix of the scratch file used while reorganizing
    const REORG_SUFFIX: &'static str = ".reorg";

    /// Open a database file in the given mode
    ///
    /// On startup:
    /// 1. Open the file with the access the mode needs
    /// 2. Take the writer lock (writer modes only)
    /// 3. Initialize a new file, or load header, directory and avail list
    pub fn open(path: &Path, mode: OpenMode, config: Config) -> Result<Self> {
        config.validate()?;

        let file = Self::open_file(path, mode, &config)?;

        if mode.is_writer() && config.locking {
            try_lock_exclusive(&file)?;
        }

        let recreate = match mode {
            OpenMode::AlwaysRecreate => true,
            OpenMode::CreateIfMissing => file.metadata()?.len() == 0,
            OpenMode::ReadOnly | OpenMode::ReadWrite => false,
        };

        if recreate {
            file.set_len(0)?;
            Self::create(path, mode, config, file)
        } else {
            Self::load(path, mode, config, file)
        }
    }

    fn open_file(path: &Path, mode: OpenMode, config: &Config) -> Result<File> {
        let mut options = OpenOptions::new();
        options.read(true);

        match mode {
            OpenMode::ReadOnly => {}
            OpenMode::ReadWrite => {
                options.write(true);
            }
            OpenMode::CreateIfMissing | OpenMode::AlwaysRecreate => {
                options.write(true).create(true);
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(config.permissions);
        }
        #[cfg(not(unix))]
        let _ = config;

        Ok(options.open(path)?)
    }

    /// Lay out a brand-new file: one empty bucket behind a depth-0 directory
    fn create(path: &Path, mode: OpenMode, config: Config, file: File) -> Result<Self> {
        let block_size = config.effective_block_size();
        let mut store = BlockStore::create(file, block_size)?;

        let bucket_addr = store.allocate_blocks(1)?;
        let mut cache = BucketCache::new(config.cache_size);
        cache.insert_dirty(bucket_addr, Bucket::new(0));

        let mut engine = Self {
            path: path.to_path_buf(),
            mode,
            config,
            store,
            header: FileHeader::new(block_size),
            directory: Directory::new(bucket_addr),
            dir_dirty: true,
            cache,
            record_count: 0,
            dirty: true,
            writes_since_commit: 0,
        };
        engine.commit()?;

        tracing::info!(
            "Created database {} (block size {}, {} slots per bucket)",
            path.display(),
            block_size,
            engine.header.bucket_capacity
        );
        Ok(engine)
    }

    /// Attach to an existing file
    fn load(path: &Path, mode: OpenMode, config: Config, mut file: File) -> Result<Self> {
        let (slot_a, slot_b) = BlockStore::read_header_slots(&mut file)?;
        let header = FileHeader::select(&slot_a, &slot_b)?;

        let mut store = BlockStore::open(file, &header)?;
        let directory = Self::read_directory(&mut store, &header)?;

        // Readers never allocate, so only writers need the free space map.
        if mode.is_writer() {
            let avail = Self::read_avail(&mut store, &header)?;
            store.set_avail(avail);
        }

        tracing::info!(
            "Opened database {} ({:?}, generation {}, {} records)",
            path.display(),
            mode,
            header.generation,
            header.record_count
        );

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            cache: BucketCache::new(config.cache_size),
            config,
            store,
            record_count: header.record_count,
            header,
            directory,
            dir_dirty: false,
            dirty: false,
            writes_since_commit: 0,
        })
    }

    fn read_directory(store: &mut BlockStore, header: &FileHeader) -> Result<Directory> {
        let bytes = store.read_blocks(header.dir_addr, header.dir_blocks)?;
        let directory = Directory::decode(&bytes, header.next_block)?;

        if directory.bits() != header.dir_bits {
            return Err(DbmError::Format(format!(
                "directory depth {} disagrees with header depth {}",
                directory.bits(),
                header.dir_bits
            )));
        }
        Ok(directory)
    }

    fn read_avail(store: &mut BlockStore, header: &FileHeader) -> Result<AvailList> {
        let bytes = store.read_blocks(header.avail_addr, header.avail_blocks)?;
        let extents: Vec<(u64, u32)> = decode_framed(&bytes, "avail list")?;

        if let Some(bad) = extents
            .iter()
            .find(|&&(addr, count)| addr == 0 || addr + count as u64 > header.next_block)
        {
            return Err(DbmError::Format(format!(
                "avail extent {}+{} outside the file",
                bad.0, bad.1
            )));
        }
        AvailList::from_extents(&extents)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Fetch the value stored under `key`
    pub fn fetch(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        self.refresh()?;
        let loc = self.locate(key)?.ok_or(DbmError::NotFound)?;
        Ok(record::read(&mut self.store, &loc.slot)?.value)
    }

    /// Whether `key` is present
    pub fn exists(&mut self, key: &[u8]) -> Result<bool> {
        self.refresh()?;
        Ok(self.locate(key)?.is_some())
    }

    /// First key in traversal order
    pub fn first_key(&mut self) -> Result<Vec<u8>> {
        self.refresh()?;
        self.scan_from(0)?.ok_or(DbmError::Empty)
    }

    /// Key following `key` in traversal order
    ///
    /// Traversal walks directory slots in order, visiting each bucket once
    /// from its lowest slot, then the bucket's slots in order. Inserts,
    /// deletes and splits between calls may cause keys to be skipped or
    /// visited twice.
    pub fn next_key(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        self.refresh()?;
        let loc = self.locate(key)?.ok_or(DbmError::NotFound)?;

        let (following, depth) = {
            let bucket = self.bucket(loc.bucket)?;
            (bucket.slot(loc.index + 1).cloned(), bucket.depth())
        };

        if let Some(slot) = following {
            return record::read_key(&mut self.store, &slot);
        }

        let home = (loc.hash as u64 & low_mask(depth)) as usize;
        self.scan_from(home + 1)?.ok_or(DbmError::NoMoreKeys)
    }

    /// First key of the first non-empty bucket whose lowest slot is at or
    /// after `start`
    fn scan_from(&mut self, start: usize) -> Result<Option<Vec<u8>>> {
        for slot_index in start..self.directory.len() {
            let addr = self.bucket_addr_at(slot_index)?;

            let first = {
                let bucket = self.bucket(addr)?;
                // Buckets shared by several slots are visited from the lowest.
                if slot_index as u64 > low_mask(bucket.depth()) {
                    continue;
                }
                bucket.slot(0).cloned()
            };

            if let Some(slot) = first {
                return record::read_key(&mut self.store, &slot).map(Some);
            }
        }
        Ok(None)
    }

    fn locate(&mut self, key: &[u8]) -> Result<Option<Location>> {
        let hash = hash_key(key);
        let addr = self.directory.bucket_for(hash);

        let candidates: Vec<(usize, BucketSlot)> = {
            let bucket = self.bucket(addr)?;
            bucket
                .candidates(hash, key)
                .into_iter()
                .filter_map(|i| bucket.slot(i).cloned().map(|s| (i, s)))
                .collect()
        };

        for (index, slot) in candidates {
            if record::read_key(&mut self.store, &slot)? == key {
                return Ok(Some(Location {
                    hash,
                    bucket: addr,
                    index,
                    slot,
                }));
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Store a pair; `overwrite` selects replace (upsert) over insert
    pub fn put(&mut self, key: &[u8], value: &[u8], overwrite: bool) -> Result<()> {
        self.check_writable()?;

        match self.locate(key)? {
            Some(_) if !overwrite => return Err(DbmError::DuplicateKey),
            Some(loc) => self.overwrite(loc, key, value)?,
            None => self.add(hash_key(key), key, value)?,
        }

        self.note_write()
    }

    /// Remove a key and release its record
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        let loc = self.locate(key)?.ok_or(DbmError::NotFound)?;

        let addr = self.make_writable(loc.bucket, loc.hash)?;
        self.bucket_mut(addr)?.remove(loc.index);
        self.store
            .free_blocks(loc.slot.record_addr, loc.slot.record_blocks)?;
        self.record_count = self.record_count.saturating_sub(1);

        self.note_write()
    }

    fn add(&mut self, hash: u32, key: &[u8], value: &[u8]) -> Result<()> {
        let (addr, blocks) = record::write_new(&mut self.store, key, value)?;
        let slot = BucketSlot::new(hash, key, value.len(), addr, blocks);

        if let Err(e) = self.place(hash, slot) {
            self.store.free_blocks(addr, blocks)?;
            return Err(e);
        }

        self.record_count += 1;
        Ok(())
    }

    fn overwrite(&mut self, loc: Location, key: &[u8], value: &[u8]) -> Result<()> {
        let block_size = self.store.block_size();
        let needed = record::blocks_needed(key.len(), value.len(), block_size);
        let old = &loc.slot;

        // Committed extents are never overwritten; only an extent written
        // since the last commit is reused in place.
        let (addr, blocks) = if needed <= old.record_blocks && self.store.is_fresh(old.record_addr) {
            record::write_in_place(&mut self.store, old, key, value)?;
            (old.record_addr, old.record_blocks)
        } else {
            let extent = record::write_new(&mut self.store, key, value)?;
            self.store.free_blocks(old.record_addr, old.record_blocks)?;
            extent
        };

        let bucket_addr = self.make_writable(loc.bucket, loc.hash)?;
        let slot = self
            .bucket_mut(bucket_addr)?
            .slot_mut(loc.index)
            .ok_or_else(|| DbmError::Format("bucket slot vanished".to_string()))?;

        slot.value_len = value.len() as u32;
        slot.record_addr = addr;
        slot.record_blocks = blocks;
        Ok(())
    }

    /// Put a slot into the bucket its hash routes to, splitting as needed
    ///
    /// Every pass either inserts, fails, or deepens the target bucket by one
    /// bit, so the loop is bounded by `max_directory_bits`.
    fn place(&mut self, hash: u32, slot: BucketSlot) -> Result<()> {
        let capacity = self.header.bucket_capacity as usize;

        loop {
            let addr = self.directory.bucket_for(hash);
            let (len, depth) = {
                let bucket = self.bucket(addr)?;
                (bucket.len(), bucket.depth())
            };

            if len < capacity {
                let addr = self.make_writable(addr, hash)?;
                self.bucket_mut(addr)?.push(slot);
                return Ok(());
            }

            if depth >= self.config.max_directory_bits {
                tracing::warn!(
                    "Bucket at depth {} is full of colliding hashes; rejecting insert",
                    depth
                );
                return Err(DbmError::BucketOverflow { depth });
            }

            if depth == self.directory.bits() {
                self.directory.double()?;
                self.dir_dirty = true;
                self.dirty = true;
                tracing::debug!("Directory doubled to {} slots", self.directory.len());
            }

            self.split(addr, hash)?;
        }
    }

    /// Split the bucket at `addr` on its next hash bit
    fn split(&mut self, addr: u64, hash: u32) -> Result<()> {
        let addr = self.make_writable(addr, hash)?;

        let (depth, sibling) = {
            let bucket = self.bucket_mut(addr)?;
            let depth = bucket.depth();
            (depth, bucket.split())
        };

        let sibling_addr = self.store.allocate_blocks(1)?;
        tracing::debug!(
            "Split bucket {} at depth {}: {} entries moved to bucket {}",
            addr,
            depth,
            sibling.len(),
            sibling_addr
        );

        self.cache.insert_dirty(sibling_addr, sibling);
        self.directory.split(hash, depth, addr, sibling_addr);
        self.dir_dirty = true;
        Ok(())
    }

    /// Make the bucket at `addr` safe to modify and return its address
    ///
    /// Buckets written since the last commit are modified where they are.
    /// A committed bucket is copied to a fresh block and the directory
    /// re-pointed; the old block is released for reuse after the next commit.
    fn make_writable(&mut self, addr: u64, hash: u32) -> Result<u64> {
        self.dirty = true;

        if self.store.is_fresh(addr) {
            self.bucket(addr)?;
            if !self.cache.mark_dirty(addr) {
                return Err(DbmError::Format(format!("bucket {} not cached", addr)));
            }
            return Ok(addr);
        }

        self.bucket(addr)?;
        let bucket = self
            .cache
            .remove(addr)
            .ok_or_else(|| DbmError::Format(format!("bucket {} not cached", addr)))?;

        let new_addr = self.store.allocate_blocks(1)?;
        self.store.free_blocks(addr, 1)?;
        self.directory.relocate(hash, bucket.depth(), addr, new_addr);
        self.cache.insert_dirty(new_addr, bucket);
        self.dir_dirty = true;

        Ok(new_addr)
    }

    fn note_write(&mut self) -> Result<()> {
        self.dirty = true;
        self.writes_since_commit += 1;

        match self.config.commit_strategy {
            CommitStrategy::Manual => Ok(()),
            CommitStrategy::EveryWrite => self.commit(),
            CommitStrategy::EveryNWrites { count } if self.writes_since_commit >= count => {
                self.commit()
            }
            CommitStrategy::EveryNWrites { .. } => Ok(()),
        }
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Durably commit everything changed since the last commit
    ///
    /// A no-op when nothing changed. Read-only handles never get dirty.
    pub fn commit(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut allocated = Vec::new();
        let mut header_issued = false;
        let (header, retiring) = match self.write_commit(&mut allocated, &mut header_issued) {
            Ok(done) => done,
            Err(e) => {
                self.abandon_commit(allocated, header_issued);
                return Err(e);
            }
        };

        for (addr, count) in retiring {
            self.store.free_blocks(addr, count)?;
        }
        self.store.finish_commit()?;
        self.cache.mark_all_clean();

        tracing::debug!(
            "Committed generation {} ({} records, {} writes, {} blocks)",
            header.generation,
            header.record_count,
            self.writes_since_commit,
            header.next_block
        );

        self.header = header;
        self.dir_dirty = false;
        self.dirty = false;
        self.writes_since_commit = 0;
        Ok(())
    }

    /// Recover from a failed commit
    ///
    /// Before the header write the previous header is the only live one and
    /// the attempt's extents are simply returned. After it, the new header
    /// may be on disk: the blocks it references stay put and the next
    /// commit, which targets the same slot, supersedes it.
    fn abandon_commit(&mut self, allocated: Vec<(u64, u32)>, header_issued: bool) {
        if header_issued {
            tracing::warn!(
                "Commit of generation {} failed after its header write",
                self.header.generation + 1
            );
            if let Err(e) = self.store.seal_unconfirmed(&allocated) {
                tracing::warn!("Could not reserve metadata of failed commit: {}", e);
            }
            // Bucket blocks were synced before the header write.
            self.cache.mark_all_clean();
            self.dir_dirty = true;
            return;
        }

        for (addr, count) in allocated {
            if let Err(e) = self.store.free_blocks(addr, count) {
                tracing::warn!(
                    "Could not release extent {}+{} of failed commit: {}",
                    addr,
                    count,
                    e
                );
            }
        }
    }

    /// Write every block the next header needs, then the header itself.
    /// Returns the new header and the metadata extents it retired.
    fn write_commit(
        &mut self,
        allocated: &mut Vec<(u64, u32)>,
        header_issued: &mut bool,
    ) -> Result<(FileHeader, Vec<(u64, u32)>)> {
        let block_size = self.store.block_size();

        // Step 1: dirty buckets already sit on fresh blocks
        let dirty: Vec<(u64, Vec<u8>)> = self
            .cache
            .dirty()
            .map(|(addr, bucket)| (addr, bucket.encode(block_size)))
            .collect();
        for (addr, bytes) in &dirty {
            self.store.write_block(*addr, bytes)?;
        }

        let mut header = self.header.clone();
        let mut retiring = Vec::new();

        // Step 2: directory into a fresh extent
        if self.dir_dirty || header.dir_addr == 0 {
            let bytes = self.directory.encode()?;
            let blocks = blocks_for(bytes.len(), block_size);
            let addr = self.store.allocate_blocks(blocks)?;
            allocated.push((addr, blocks));
            self.store.write_blocks(addr, &bytes)?;

            if header.dir_addr != 0 {
                retiring.push((header.dir_addr, header.dir_blocks));
            }
            header.dir_addr = addr;
            header.dir_blocks = blocks;
        }
        header.dir_bits = self.directory.bits();

        // Step 3: avail list into a fresh extent
        if header.avail_addr != 0 {
            retiring.push((header.avail_addr, header.avail_blocks));
        }
        let (avail_addr, avail_blocks) = self.write_avail(&retiring, allocated)?;
        header.avail_addr = avail_addr;
        header.avail_blocks = avail_blocks;

        header.next_block = self.store.next_block();
        header.record_count = self.record_count;
        header.generation += 1;

        // Step 4: everything the header points at must be durable first
        self.store.extend_to_end()?;
        self.store.sync()?;

        // Step 5: flip to the other header slot
        *header_issued = true;
        self.store.write_header(&header)?;
        self.store.sync()?;

        Ok((header, retiring))
    }

    /// Persist the free space map of the state being committed
    ///
    /// Allocating the extent changes the map it has to hold, so allocation
    /// repeats until the extent is large enough for the map computed after it.
    fn write_avail(
        &mut self,
        retiring: &[(u64, u32)],
        allocated: &mut Vec<(u64, u32)>,
    ) -> Result<(u64, u32)> {
        let block_size = self.store.block_size();
        let mut extent: Option<(u64, u32)> = None;

        loop {
            let free = self.store.committed_free_list(retiring)?;
            let bytes = encode_framed(&free)?;
            let needed = blocks_for(bytes.len(), block_size);

            if let Some((addr, blocks)) = extent {
                if blocks >= needed {
                    self.store.write_blocks(addr, &bytes)?;
                    return Ok((addr, blocks));
                }
                allocated.retain(|&e| e != (addr, blocks));
                self.store.free_blocks(addr, blocks)?;
            }

            // One spare block absorbs the entry this allocation may split off.
            let blocks = needed + 1;
            let addr = self.store.allocate_blocks(blocks)?;
            allocated.push((addr, blocks));
            extent = Some((addr, blocks));
        }
    }

    // =========================================================================
    // Reorganize
    // =========================================================================

    /// Rebuild the file with only live records, compacting free space
    ///
    /// The rebuilt file is fully committed under a scratch name and renamed
    /// over the original, so a crash leaves either the old or the new file.
    pub fn reorganize(&mut self) -> Result<()> {
        self.check_writable()?;
        self.commit()?;

        let scratch = Self::scratch_path(&self.path);
        let before = self.store.next_block();

        let mut rebuilt = match self.copy_into(&scratch) {
            Ok(rebuilt) => rebuilt,
            Err(e) => {
                let _ = fs::remove_file(&scratch);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&scratch, &self.path) {
            let _ = fs::remove_file(&scratch);
            return Err(e.into());
        }
        Self::sync_parent_dir(&self.path);

        rebuilt.path = self.path.clone();
        rebuilt.mode = self.mode;
        rebuilt.config = self.config.clone();

        tracing::info!(
            "Reorganized {}: {} -> {} blocks, {} records",
            self.path.display(),
            before,
            rebuilt.store.next_block(),
            rebuilt.record_count
        );

        // The old engine is clean, dropping it closes the old file.
        *self = rebuilt;
        Ok(())
    }

    fn copy_into(&mut self, scratch: &Path) -> Result<Engine> {
        let mut config = self.config.clone();
        config.block_size = self.store.block_size();
        config.commit_strategy = CommitStrategy::Manual;

        let mut rebuilt = Engine::open(scratch, OpenMode::AlwaysRecreate, config)?;

        for addr in self.directory.distinct_buckets() {
            let slots = self.bucket(addr)?.slots().to_vec();
            for slot in slots {
                let rec = record::read(&mut self.store, &slot)?;
                rebuilt.add(slot.hash, &rec.key, &rec.value)?;
            }
        }
        rebuilt.dirty = true;
        rebuilt.commit()?;
        Ok(rebuilt)
    }

    fn scratch_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(Self::REORG_SUFFIX);
        PathBuf::from(name)
    }

    fn sync_parent_dir(path: &Path) {
        #[cfg(unix)]
        {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
                    tracing::warn!("Could not sync directory {}: {}", parent.display(), e);
                }
            }
        }
        #[cfg(not(unix))]
        let _ = path;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Commit pending changes (writers) and release the file
    pub fn close(mut self) -> Result<()> {
        if self.mode.is_writer() {
            self.commit()?;
        }
        tracing::info!("Closed database {}", self.path.display());
        Ok(())
    }

    /// Flush modified state; a no-op for readers and clean writers
    pub fn sync(&mut self) -> Result<()> {
        if self.mode.is_writer() {
            self.commit()?;
        }
        Ok(())
    }

    /// Pick up commits made by a writer since this reader last looked
    fn refresh(&mut self) -> Result<()> {
        if self.mode.is_writer() {
            return Ok(());
        }

        let header = self.store.reload_header()?;
        if header.generation == self.header.generation {
            return Ok(());
        }

        self.store.set_next_block(header.next_block);
        self.directory = Self::read_directory(&mut self.store, &header)?;
        self.cache.clear();
        self.record_count = header.record_count;

        tracing::debug!(
            "Reader moved from generation {} to {}",
            self.header.generation,
            header.generation
        );
        self.header = header;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn len(&mut self) -> Result<u64> {
        self.refresh()?;
        Ok(self.record_count)
    }

    pub fn stats(&mut self) -> Result<Stats> {
        self.refresh()?;
        Ok(Stats {
            block_size: self.store.block_size(),
            bucket_capacity: self.header.bucket_capacity as usize,
            directory_bits: self.directory.bits(),
            bucket_count: self.directory.distinct_buckets().len(),
            record_count: self.record_count,
            allocated_blocks: self.store.next_block(),
            free_blocks: self.store.avail().total_blocks() + self.store.pending().total_blocks(),
            generation: self.header.generation,
            cached_buckets: self.cache.len(),
            dirty_buckets: self.cache.dirty_count(),
        })
    }

    pub fn set_commit_strategy(&mut self, strategy: CommitStrategy) -> Result<()> {
        let mut config = self.config.clone();
        config.commit_strategy = strategy;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_writable(&self) -> Result<()> {
        if self.mode.is_writer() {
            Ok(())
        } else {
            Err(DbmError::ReadOnly)
        }
    }

    fn bucket_addr_at(&self, slot: usize) -> Result<u64> {
        self.directory
            .bucket_at(slot)
            .ok_or_else(|| DbmError::Format(format!("directory slot {} out of range", slot)))
    }

    /// Decoded bucket at `addr`, reading it on a cache miss
    fn bucket(&mut self, addr: u64) -> Result<&Bucket> {
        if !self.cache.contains(addr) {
            let bytes = self.store.read_block(addr)?;
            let bucket = Bucket::decode(&bytes, self.header.bucket_capacity as usize)?;
            if bucket.depth() > self.directory.bits() {
                return Err(DbmError::Format(format!(
                    "bucket {} has depth {}, directory depth is {}",
                    addr,
                    bucket.depth(),
                    self.directory.bits()
                )));
            }
            self.cache.insert_clean(addr, bucket);
        }
        self.cache
            .get(addr)
            .ok_or_else(|| DbmError::Format(format!("bucket {} not cached", addr)))
    }

    /// Mutable bucket; only valid after `make_writable`
    fn bucket_mut(&mut self, addr: u64) -> Result<&mut Bucket> {
        self.cache
            .get_mut(addr)
            .ok_or_else(|| DbmError::Format(format!("bucket {} not cached", addr)))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.dirty {
            tracing::warn!(
                "Database {} dropped without close(); discarding uncommitted changes",
                self.path.display()
            );
        }
    }
}
