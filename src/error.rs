//! Error types for AtlasDBM
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using DbmError
pub type Result<T> = std::result::Result<T, DbmError>;

/// Unified error type for AtlasDBM operations
#[derive(Debug, Error)]
pub enum DbmError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // File Format Errors
    // -------------------------------------------------------------------------
    #[error("Bad database file format: {0}")]
    Format(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Policy Errors (handle stays usable)
    // -------------------------------------------------------------------------
    #[error("Database opened read-only")]
    ReadOnly,

    #[error("Database is locked by another writer")]
    LockHeld,

    // -------------------------------------------------------------------------
    // Lookup Outcomes
    // -------------------------------------------------------------------------
    #[error("Key already exists")]
    DuplicateKey,

    #[error("Key not found")]
    NotFound,

    #[error("No more keys")]
    NoMoreKeys,

    #[error("Database is empty")]
    Empty,

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Bucket overflow: split depth ceiling {depth} reached")]
    BucketOverflow { depth: u32 },

    // -------------------------------------------------------------------------
    // Handle Lifecycle
    // -------------------------------------------------------------------------
    #[error("Database handle is closed")]
    ClosedHandle,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for DbmError {
    fn from(err: bincode::Error) -> Self {
        DbmError::Serialization(err.to_string())
    }
}
