//! Index Module
//!
//! Extensible hashing over bucket blocks.
//!
//! ## Responsibilities
//! - Hash keys to a stable 32-bit value
//! - Route a hash to its bucket through the directory
//! - Keep fixed-capacity buckets and split them by local depth
//! - Cache recently used buckets in memory
//!
//! ## Routing
//! ```text
//! hash(key) = 0b...1011
//!                   ││└┴─ low `bits` select the directory slot
//!                   │
//! directory[slot] ──┴──► bucket block (local depth d <= bits)
//! ```
//! A bucket of depth `d` is referenced by every slot whose low `d` bits
//! match; splitting it moves the entries with bit `d` set to a sibling.

mod bucket;
mod cache;
mod directory;

pub use bucket::{Bucket, BucketSlot, BUCKET_HEADER_SIZE, SLOT_SIZE};
pub use cache::BucketCache;
pub use directory::Directory;

/// Stable hash of a key
///
/// The value is persisted in bucket slots and drives directory routing, so
/// it must never change between releases.
pub fn hash_key(key: &[u8]) -> u32 {
    crc32fast::hash(key)
}

/// Mask selecting the low `bits` bits of a hash
pub(crate) fn low_mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}
