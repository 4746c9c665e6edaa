//! # AtlasDBM
//!
//! An embedded, single-file key-value store with:
//! - Extensible hashing (doubling directory, splitting buckets)
//! - Arbitrary byte-string keys and values
//! - Crash-safe commits (shadow writes + double-slot header)
//! - Single-writer/multi-reader access with an advisory writer lock
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Database handle                         │
//! │     insert / replace / fetch / exists / delete / keys        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  (Mutex: one operation at a time)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Engine                                │
//! │          hash → directory → bucket → record                  │
//! └──────┬──────────────────┬───────────────────┬───────────────┘
//!        │                  │                   │
//!        ▼                  ▼                   ▼
//!   ┌──────────┐     ┌─────────────┐     ┌─────────────┐
//!   │Directory │     │   Buckets   │     │   Records   │
//!   │ (index)  │     │  (+ cache)  │     │   (codec)   │
//!   └────┬─────┘     └──────┬──────┘     └──────┬──────┘
//!        └──────────────────┼───────────────────┘
//!                           ▼
//!                   ┌───────────────┐
//!                   │  Block store  │
//!                   │ (avail list,  │
//!                   │  header, lock)│
//!                   └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use atlasdbm::{Database, OpenMode};
//!
//! let db = Database::open_path("data.db", OpenMode::CreateIfMissing)?;
//! db.insert(b"foo", b"bar")?;
//! assert_eq!(db.fetch(b"foo")?, b"bar");
//! db.close()?;
//! # Ok::<(), atlasdbm::DbmError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod storage;
pub mod index;
pub mod record;
mod engine;
pub mod db;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DbmError, Result};
pub use config::{CommitStrategy, Config, OpenMode};
pub use db::{Database, Keys};
pub use engine::Stats;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasDBM
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
