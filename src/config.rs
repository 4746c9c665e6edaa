//! Configuration for AtlasDBM
//!
//! Centralized configuration with sensible defaults.

use std::str::FromStr;

use crate::error::{DbmError, Result};

/// Block size used when the caller passes 0
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Smallest accepted block size; block sizes must be a multiple of this
pub const MIN_BLOCK_SIZE: usize = 512;

/// Largest accepted block size
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Hard ceiling for the directory bit-depth (hashes are 32 bits wide)
pub const MAX_DIRECTORY_BITS: u32 = 31;

/// How a database file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read access only; mutating operations fail with `ReadOnly`
    ReadOnly,

    /// Read/write access to an existing file
    ReadWrite,

    /// Read/write access, creating the file if it is absent
    CreateIfMissing,

    /// Read/write access to a freshly truncated file
    AlwaysRecreate,
}

impl OpenMode {
    /// Whether this mode allows mutation (and takes the writer lock)
    pub fn is_writer(self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

impl FromStr for OpenMode {
    type Err = DbmError;

    /// Parse the classic DBM mode flags: `r`, `w`, `c`, `n`
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(OpenMode::ReadOnly),
            "w" => Ok(OpenMode::ReadWrite),
            "c" => Ok(OpenMode::CreateIfMissing),
            "n" => Ok(OpenMode::AlwaysRecreate),
            other => Err(DbmError::Config(format!("unknown open mode {:?}", other))),
        }
    }
}

/// When modified state is committed to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStrategy {
    /// Only on `sync()` / `close()`
    Manual,

    /// After every mutating operation (safest, slowest)
    EveryWrite,

    /// After N mutating operations (balanced durability/performance)
    EveryNWrites { count: usize },
}

/// Main configuration for an AtlasDBM handle
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // File Layout (only used when a file is created)
    // -------------------------------------------------------------------------
    /// Block size in bytes; 0 selects `DEFAULT_BLOCK_SIZE`
    pub block_size: usize,

    /// Unix permission bits for a newly created file
    pub permissions: u32,

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------
    pub commit_strategy: CommitStrategy,

    // -------------------------------------------------------------------------
    // Index
    // -------------------------------------------------------------------------
    /// Split depth ceiling; an insert that would need a deeper bucket fails
    /// with `BucketOverflow`
    pub max_directory_bits: u32,

    /// Number of clean buckets kept in memory
    pub cache_size: usize,

    // -------------------------------------------------------------------------
    // Concurrency
    // -------------------------------------------------------------------------
    /// Take an exclusive advisory lock for writer handles
    pub locking: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 0,
            permissions: 0o666,
            commit_strategy: CommitStrategy::EveryNWrites { count: 100 },
            max_directory_bits: 24,
            cache_size: 64,
            locking: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Block size actually used for a new file
    pub fn effective_block_size(&self) -> usize {
        if self.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.block_size
        }
    }

    /// Reject settings the storage layer cannot honor
    pub fn validate(&self) -> Result<()> {
        let block_size = self.effective_block_size();
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
            || block_size % MIN_BLOCK_SIZE != 0
        {
            return Err(DbmError::Config(format!(
                "block size {} must be a multiple of {} between {} and {}",
                block_size, MIN_BLOCK_SIZE, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }

        if self.max_directory_bits == 0 || self.max_directory_bits > MAX_DIRECTORY_BITS {
            return Err(DbmError::Config(format!(
                "max_directory_bits must be in 1..={}",
                MAX_DIRECTORY_BITS
            )));
        }

        if let CommitStrategy::EveryNWrites { count: 0 } = self.commit_strategy {
            return Err(DbmError::Config(
                "EveryNWrites count must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the block size for newly created files (0 = default)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the permission bits for newly created files
    pub fn permissions(mut self, mode: u32) -> Self {
        self.config.permissions = mode;
        self
    }

    /// Set the commit strategy
    pub fn commit_strategy(mut self, strategy: CommitStrategy) -> Self {
        self.config.commit_strategy = strategy;
        self
    }

    /// Set the split depth ceiling
    pub fn max_directory_bits(mut self, bits: u32) -> Self {
        self.config.max_directory_bits = bits;
        self
    }

    /// Set the number of clean buckets cached in memory
    pub fn cache_size(mut self, buckets: usize) -> Self {
        self.config.cache_size = buckets;
        self
    }

    /// Enable or disable the writer lock
    pub fn locking(mut self, enabled: bool) -> Self {
        self.config.locking = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
