//! Database Handle
//!
//! The public operation set over one database file.
//!
//! ## Concurrency Model
//! - At most one writer handle per file: writer modes take an exclusive
//!   advisory lock at open and fail with `LockHeld` if another handle owns it
//! - Any number of read-only handles; they see the last committed state
//! - Within a process a handle may be shared between threads; every
//!   operation runs under the handle's mutex, one at a time

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::{CommitStrategy, Config, OpenMode};
use crate::engine::{Engine, Stats};
use crate::error::{DbmError, Result};

/// An open database file
///
/// Keys and values are arbitrary byte strings; the handle returns owned
/// copies and never hands out references into its storage.
pub struct Database {
    /// Path the database was opened with
    path: PathBuf,

    /// Access mode requested at open
    mode: OpenMode,

    /// `None` once `close()` has run
    engine: Mutex<Option<Engine>>,
}

impl Database {
    /// Open a database file
    ///
    /// - `ReadOnly` / `ReadWrite`: the file must exist with a valid header
    /// - `CreateIfMissing`: creates the file when absent or empty
    /// - `AlwaysRecreate`: takes the lock, then truncates and reinitializes
    ///
    /// `config.block_size` and `config.permissions` only matter when a file
    /// is created; an existing file keeps the block size it was made with.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let engine = Engine::open(path, mode, config)?;

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            engine: Mutex::new(Some(engine)),
        })
    }

    /// Open with the default config (default block size, permissions 0666)
    pub fn open_path(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        Self::open(path, mode, Config::default())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Store a new pair; fails with `DuplicateKey` if `key` is present
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_engine(|e| e.put(key, value, false))
    }

    /// Store a pair, overwriting any existing value
    pub fn replace(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_engine(|e| e.put(key, value, true))
    }

    /// Value stored under `key`, or `NotFound`
    pub fn fetch(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.with_engine(|e| e.fetch(key))
    }

    /// Whether `key` is present
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.with_engine(|e| e.exists(key))
    }

    /// Remove `key`, or fail with `NotFound`
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.with_engine(|e| e.delete(key))
    }

    /// First key in traversal order, or `Empty`
    ///
    /// Traversal order follows the hash index, not insertion or lexical
    /// order, and is only meaningful while nothing is modified: a key added
    /// or removed mid-traversal may be skipped or visited twice.
    pub fn first_key(&self) -> Result<Vec<u8>> {
        self.with_engine(|e| e.first_key())
    }

    /// Key after `key` in traversal order, or `NoMoreKeys`
    ///
    /// Fails with `NotFound` if `key` is not present.
    pub fn next_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.with_engine(|e| e.next_key(key))
    }

    /// Iterate over all keys via `first_key` / `next_key`
    pub fn keys(&self) -> Keys<'_> {
        Keys {
            db: self,
            last: None,
            done: false,
        }
    }

    /// Rewrite the file without free space
    ///
    /// Needs a writer handle. Other handles on the same file keep reading the
    /// old file until they reopen.
    pub fn reorganize(&self) -> Result<()> {
        self.with_engine(|e| e.reorganize())
    }

    /// Commit all modified state durably; a no-op if nothing changed
    pub fn sync(&self) -> Result<()> {
        self.with_engine(|e| e.sync())
    }

    /// Commit and release the file and lock
    ///
    /// Every later call on this handle fails with `ClosedHandle`. Dropping a
    /// handle without closing it releases the file without committing.
    ///
    /// If the final commit fails the handle stays open, so the caller can
    /// retry `close()` or keep using it.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.engine.lock();
        guard.as_mut().ok_or(DbmError::ClosedHandle)?.sync()?;

        let engine = guard.take().ok_or(DbmError::ClosedHandle)?;
        engine.close()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of live records
    pub fn len(&self) -> Result<u64> {
        self.with_engine(|e| e.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Index and allocation statistics
    pub fn stats(&self) -> Result<Stats> {
        self.with_engine(|e| e.stats())
    }

    /// Change when writes are committed
    pub fn set_commit_strategy(&self, strategy: CommitStrategy) -> Result<()> {
        self.with_engine(|e| e.set_commit_strategy(strategy))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.engine.lock().is_none()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn with_engine<T>(&self, f: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
        let mut guard = self.engine.lock();
        let engine = guard.as_mut().ok_or(DbmError::ClosedHandle)?;
        f(engine)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Key iterator returned by `Database::keys`
///
/// Yields `Err` once and stops if the underlying traversal fails.
pub struct Keys<'a> {
    db: &'a Database,
    last: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for Keys<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = match &self.last {
            None => self.db.first_key(),
            Some(key) => self.db.next_key(key),
        };

        match result {
            Ok(key) => {
                self.last = Some(key.clone());
                Some(Ok(key))
            }
            Err(DbmError::Empty) | Err(DbmError::NoMoreKeys) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
