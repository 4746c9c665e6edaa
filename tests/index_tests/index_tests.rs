//! Tests for the hash index
//!
//! These tests verify:
//! - Directory doubling, splitting and relocation
//! - Directory decoding rejects inconsistent tables
//! - Bucket split by hash bit and block encoding
//! - Bucket cache eviction never drops dirty buckets

use atlasdbm::index::{hash_key, Bucket, BucketCache, BucketSlot, Directory, BUCKET_HEADER_SIZE, SLOT_SIZE};
use atlasdbm::DbmError;

// =============================================================================
// Helper Functions
// =============================================================================

fn slot_with_hash(hash: u32, record_addr: u64) -> BucketSlot {
    let key = hash.to_be_bytes();
    BucketSlot::new(hash, &key, 1, record_addr, 1)
}

// =============================================================================
// Hash Tests
// =============================================================================

#[test]
fn test_hash_is_stable() {
    assert_eq!(hash_key(b"foo"), hash_key(b"foo"));
    assert_ne!(hash_key(b"foo"), hash_key(b"bar"));
    // Persisted in bucket slots, so the function must not drift
    assert_eq!(hash_key(b"123456789"), 0xCBF4_3926);
}

// =============================================================================
// Directory Tests
// =============================================================================

#[test]
fn test_directory_starts_with_one_slot() {
    let dir = Directory::new(7);

    assert_eq!(dir.bits(), 0);
    assert_eq!(dir.len(), 1);
    assert_eq!(dir.bucket_for(0xDEAD_BEEF), 7);
}

#[test]
fn test_directory_double_copies_slots() {
    let mut dir = Directory::new(7);
    dir.double().unwrap();
    dir.split(0, 0, 7, 8);
    dir.double().unwrap();

    assert_eq!(dir.bits(), 2);
    assert_eq!(dir.len(), 4);
    // Slot i + 2 mirrors slot i
    assert_eq!(dir.bucket_at(0), Some(7));
    assert_eq!(dir.bucket_at(1), Some(8));
    assert_eq!(dir.bucket_at(2), Some(7));
    assert_eq!(dir.bucket_at(3), Some(8));
    assert_eq!(dir.bucket_at(4), None);
}

#[test]
fn test_directory_split_family() {
    let mut dir = Directory::new(1);
    dir.double().unwrap();
    dir.double().unwrap();

    // Depth-0 bucket 1 shared by all four slots splits on bit 0
    dir.split(0b10, 0, 1, 2);
    assert_eq!(dir.distinct_buckets(), vec![1, 2]);
    assert_eq!(dir.bucket_for(0b01), 2);
    assert_eq!(dir.bucket_for(0b11), 2);

    // Bucket 2 (slots 1 and 3) splits on bit 1
    dir.split(0b11, 1, 2, 3);
    assert_eq!(dir.bucket_at(1), Some(2));
    assert_eq!(dir.bucket_at(3), Some(3));
    assert_eq!(dir.bucket_at(0), Some(1));
    assert_eq!(dir.bucket_at(2), Some(1));
}

#[test]
fn test_directory_relocate() {
    let mut dir = Directory::new(1);
    dir.double().unwrap();
    dir.double().unwrap();
    dir.split(0, 0, 1, 2);

    dir.relocate(0b01, 1, 2, 9);

    assert_eq!(dir.bucket_at(1), Some(9));
    assert_eq!(dir.bucket_at(3), Some(9));
    assert_eq!(dir.bucket_at(0), Some(1));
}

#[test]
fn test_directory_decode_validates_addresses() {
    let mut dir = Directory::new(5);
    dir.double().unwrap();
    dir.split(0, 0, 5, 6);
    let bytes = dir.encode().unwrap();

    assert_eq!(Directory::decode(&bytes, 7).unwrap(), dir);
    assert!(matches!(
        Directory::decode(&bytes, 6),
        Err(DbmError::Format(_))
    ));
}

#[test]
fn test_directory_decode_rejects_corruption() {
    let mut bytes = Directory::new(1).encode().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    assert!(matches!(
        Directory::decode(&bytes, 10),
        Err(DbmError::Format(_))
    ));
}

// =============================================================================
// Bucket Tests
// =============================================================================

#[test]
fn test_bucket_capacity() {
    assert_eq!(Bucket::capacity_for(512), (512 - BUCKET_HEADER_SIZE) / SLOT_SIZE);
    assert_eq!(Bucket::capacity_for(512), 17);
    assert_eq!(Bucket::capacity_for(4096), 145);
}

#[test]
fn test_bucket_split_by_bit() {
    let mut bucket = Bucket::new(1);
    for (i, hash) in [0b000u32, 0b010, 0b100, 0b110, 0b001].into_iter().enumerate() {
        bucket.push(slot_with_hash(hash, i as u64 + 1));
    }

    let sibling = bucket.split();

    assert_eq!(bucket.depth(), 2);
    assert_eq!(sibling.depth(), 2);
    let low: Vec<u32> = bucket.slots().iter().map(|s| s.hash).collect();
    let high: Vec<u32> = sibling.slots().iter().map(|s| s.hash).collect();
    assert_eq!(low, vec![0b000, 0b100, 0b001]);
    assert_eq!(high, vec![0b010, 0b110]);
}

#[test]
fn test_bucket_candidates_and_remove() {
    let mut bucket = Bucket::new(0);
    bucket.push(BucketSlot::new(42, b"alpha", 3, 1, 1));
    bucket.push(BucketSlot::new(42, b"alpine", 3, 2, 1));
    bucket.push(BucketSlot::new(7, b"beta", 3, 3, 1));

    assert_eq!(bucket.candidates(42, b"alpha"), vec![0]);
    assert!(bucket.candidates(7, b"alpha").is_empty());

    let removed = bucket.remove(0).unwrap();
    assert_eq!(removed.record_addr, 1);
    assert_eq!(bucket.slot(0).unwrap().record_addr, 2);
    assert!(bucket.remove(5).is_none());
}

#[test]
fn test_bucket_encode_decode() {
    let mut bucket = Bucket::new(3);
    bucket.push(BucketSlot::new(0xABCD, b"key", 100, 12, 1));
    bucket.push(BucketSlot::new(0x1234, b"another key", 5000, 20, 10));

    let bytes = bucket.encode(512);
    assert_eq!(bytes.len(), 512);

    let decoded = Bucket::decode(&bytes, Bucket::capacity_for(512)).unwrap();
    assert_eq!(decoded, bucket);
}

#[test]
fn test_bucket_decode_rejects_corruption() {
    let mut bucket = Bucket::new(0);
    bucket.push(BucketSlot::new(1, b"k", 1, 5, 1));
    let mut bytes = bucket.encode(512);

    bytes[BUCKET_HEADER_SIZE] ^= 0xFF;
    assert!(matches!(
        Bucket::decode(&bytes, 17),
        Err(DbmError::Format(_))
    ));

    let bytes = bucket.encode(512);
    assert!(matches!(Bucket::decode(&bytes, 0), Err(DbmError::Format(_))));
}

#[test]
fn test_bucket_checksum_covers_depth_and_count() {
    let mut bucket = Bucket::new(2);
    bucket.push(BucketSlot::new(6, b"k", 1, 5, 1));

    let mut bytes = bucket.encode(512);
    bytes[0..4].copy_from_slice(&7u32.to_le_bytes());
    assert!(matches!(
        Bucket::decode(&bytes, 17),
        Err(DbmError::Format(_))
    ));

    let mut bytes = bucket.encode(512);
    bytes[4..8].copy_from_slice(&0u32.to_le_bytes());
    assert!(matches!(
        Bucket::decode(&bytes, 17),
        Err(DbmError::Format(_))
    ));
}

#[test]
fn test_bucket_decode_rejects_impossible_depth() {
    let bytes = Bucket::new(40).encode(512);

    assert!(matches!(
        Bucket::decode(&bytes, 17),
        Err(DbmError::Format(_))
    ));
}

// =============================================================================
// Bucket Cache Tests
// =============================================================================

#[test]
fn test_cache_evicts_least_recently_used() {
    let mut cache = BucketCache::new(2);

    cache.insert_clean(1, Bucket::new(0));
    cache.insert_clean(2, Bucket::new(0));
    cache.get(1);
    cache.insert_clean(3, Bucket::new(0));

    assert_eq!(cache.len(), 2);
    assert!(cache.contains(1));
    assert!(!cache.contains(2));
    assert!(cache.contains(3));
}

#[test]
fn test_cache_pins_dirty_buckets() {
    let mut cache = BucketCache::new(1);

    cache.insert_dirty(1, Bucket::new(0));
    cache.insert_dirty(2, Bucket::new(0));
    cache.insert_clean(3, Bucket::new(0));
    cache.insert_clean(4, Bucket::new(0));

    assert!(cache.contains(1));
    assert!(cache.contains(2));
    assert!(!cache.contains(3));
    assert!(cache.contains(4));
    assert_eq!(cache.dirty_count(), 2);

    let mut dirty: Vec<u64> = cache.dirty().map(|(addr, _)| addr).collect();
    dirty.sort_unstable();
    assert_eq!(dirty, vec![1, 2]);

    cache.mark_all_clean();
    assert_eq!(cache.dirty_count(), 0);
    assert!(cache.len() <= 1);
}

#[test]
fn test_cache_mark_dirty_and_remove() {
    let mut cache = BucketCache::new(4);
    cache.insert_clean(1, Bucket::new(2));

    assert!(cache.mark_dirty(1));
    assert!(!cache.mark_dirty(99));
    assert_eq!(cache.dirty_count(), 1);

    cache.get_mut(1).unwrap().push(slot_with_hash(3, 7));
    let bucket = cache.remove(1).unwrap();
    assert_eq!(bucket.depth(), 2);
    assert_eq!(bucket.len(), 1);
    assert!(cache.is_empty());
}
