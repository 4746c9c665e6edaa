//! Bucket Cache
//!
//! Keeps decoded buckets keyed by block address. Dirty buckets are pinned
//! until the next commit writes them; clean ones are evicted least recently
//! used first once the clean count exceeds the configured size.

use std::collections::HashMap;

use super::Bucket;

struct CachedBucket {
    bucket: Bucket,
    dirty: bool,
    last_used: u64,
}

/// In-memory bucket cache
pub struct BucketCache {
    /// Maximum number of clean buckets retained
    capacity: usize,
    entries: HashMap<u64, CachedBucket>,
    /// Logical clock for LRU ordering
    clock: u64,
}

impl BucketCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            clock: 0,
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.entries.contains_key(&addr)
    }

    /// Look up a bucket and mark it recently used
    pub fn get(&mut self, addr: u64) -> Option<&Bucket> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(&addr).map(|e| {
            e.last_used = clock;
            &e.bucket
        })
    }

    /// Mutable access; the caller must already have marked the entry dirty
    pub fn get_mut(&mut self, addr: u64) -> Option<&mut Bucket> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(&addr).map(|e| {
            e.last_used = clock;
            &mut e.bucket
        })
    }

    /// Cache a bucket just read from disk
    pub fn insert_clean(&mut self, addr: u64, bucket: Bucket) {
        self.evict();
        self.insert(addr, bucket, false);
    }

    /// Cache a bucket that must be written by the next commit
    pub fn insert_dirty(&mut self, addr: u64, bucket: Bucket) {
        self.insert(addr, bucket, true);
    }

    /// Flag a cached bucket as modified; returns false if not cached
    pub fn mark_dirty(&mut self, addr: u64) -> bool {
        match self.entries.get_mut(&addr) {
            Some(e) => {
                e.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, addr: u64) -> Option<Bucket> {
        self.entries.remove(&addr).map(|e| e.bucket)
    }

    /// Buckets awaiting a commit
    pub fn dirty(&self) -> impl Iterator<Item = (u64, &Bucket)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(&addr, e)| (addr, &e.bucket))
    }

    pub fn dirty_count(&self) -> usize {
        self.entries.values().filter(|e| e.dirty).count()
    }

    /// After a commit every cached bucket matches its block
    pub fn mark_all_clean(&mut self) {
        for e in self.entries.values_mut() {
            e.dirty = false;
        }
        self.evict();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn insert(&mut self, addr: u64, bucket: Bucket, dirty: bool) {
        self.clock += 1;
        self.entries.insert(
            addr,
            CachedBucket {
                bucket,
                dirty,
                last_used: self.clock,
            },
        );
    }

    /// Drop least recently used clean buckets until there is room for one
    /// more clean entry
    fn evict(&mut self) {
        let mut clean: Vec<(u64, u64)> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.dirty)
            .map(|(&addr, e)| (e.last_used, addr))
            .collect();

        if clean.len() < self.capacity.max(1) {
            return;
        }

        clean.sort_unstable();
        let excess = clean.len() + 1 - self.capacity.max(1);
        for (_, addr) in clean.into_iter().take(excess) {
            self.entries.remove(&addr);
        }
    }
}
