//! Tests for Database
//!
//! These tests verify:
//! - Insert / replace / fetch / exists / delete semantics
//! - Key traversal (first_key / next_key / keys)
//! - Index growth through bucket splits and directory doubling
//! - Open modes, read-only enforcement and the writer lock
//! - Handle lifecycle (close / ClosedHandle)

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use atlasdbm::{CommitStrategy, Config, Database, DbmError, OpenMode};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");
    let db = Database::open_path(&path, OpenMode::CreateIfMissing).unwrap();
    (temp_dir, db)
}

/// Small blocks so buckets hold few slots and split early
fn setup_temp_db_with_small_blocks() -> (TempDir, PathBuf, Database) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("small.db");
    let config = Config::builder()
        .block_size(512)
        .commit_strategy(CommitStrategy::Manual)
        .build();
    let db = Database::open(&path, OpenMode::CreateIfMissing, config).unwrap();
    (temp_dir, path, db)
}

fn collect_keys(db: &Database) -> HashSet<Vec<u8>> {
    db.keys().map(|k| k.unwrap()).collect()
}

fn key_set(keys: &[&[u8]]) -> HashSet<Vec<u8>> {
    keys.iter().map(|k| k.to_vec()).collect()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_insert_fetch() {
    let (_temp, db) = setup_temp_db();

    db.insert(b"hello", b"world").unwrap();

    assert_eq!(db.fetch(b"hello").unwrap(), b"world");
    assert!(db.exists(b"hello").unwrap());
}

#[test]
fn test_fetch_missing_key() {
    let (_temp, db) = setup_temp_db();

    assert!(matches!(db.fetch(b"nope"), Err(DbmError::NotFound)));
    assert!(!db.exists(b"nope").unwrap());
}

#[test]
fn test_insert_duplicate_keeps_value() {
    let (_temp, db) = setup_temp_db();

    db.insert(b"key", b"first").unwrap();
    let result = db.insert(b"key", b"second");

    assert!(matches!(result, Err(DbmError::DuplicateKey)));
    assert_eq!(db.fetch(b"key").unwrap(), b"first");
    assert_eq!(db.len().unwrap(), 1);
}

#[test]
fn test_replace_inserts_and_overwrites() {
    let (_temp, db) = setup_temp_db();

    db.replace(b"key", b"one").unwrap();
    assert_eq!(db.fetch(b"key").unwrap(), b"one");

    db.replace(b"key", b"two").unwrap();
    assert_eq!(db.fetch(b"key").unwrap(), b"two");
    assert_eq!(db.len().unwrap(), 1);
}

#[test]
fn test_delete() {
    let (_temp, db) = setup_temp_db();

    db.insert(b"key", b"value").unwrap();
    db.delete(b"key").unwrap();

    assert!(!db.exists(b"key").unwrap());
    assert!(matches!(db.fetch(b"key"), Err(DbmError::NotFound)));
    assert!(matches!(db.delete(b"key"), Err(DbmError::NotFound)));
    assert!(db.is_empty().unwrap());
}

#[test]
fn test_empty_key_and_value() {
    let (_temp, db) = setup_temp_db();

    db.insert(b"", b"empty key").unwrap();
    db.insert(b"empty value", b"").unwrap();

    assert_eq!(db.fetch(b"").unwrap(), b"empty key");
    assert_eq!(db.fetch(b"empty value").unwrap(), b"");
}

#[test]
fn test_binary_keys_and_values() {
    let (_temp, db) = setup_temp_db();

    let key = [0u8, 255, 0, 1, 2, 0];
    let value: Vec<u8> = (0..=255).collect();
    db.insert(&key, &value).unwrap();

    assert_eq!(db.fetch(&key).unwrap(), value);
    // Same prefix, different length
    assert!(!db.exists(&key[..4]).unwrap());
}

#[test]
fn test_foo_baz_biff_scenario() {
    let (_temp, db) = setup_temp_db();

    db.insert(b"foo", b"bar").unwrap();
    db.insert(b"baz", b"bax").unwrap();
    db.insert(b"biff", b"bixx").unwrap();
    assert_eq!(collect_keys(&db), key_set(&[b"foo", b"baz", b"biff"]));

    db.replace(b"foo", b"biz").unwrap();
    assert_eq!(db.fetch(b"foo").unwrap(), b"biz");

    db.delete(b"baz").unwrap();
    assert!(!db.exists(b"baz").unwrap());
    assert_eq!(collect_keys(&db), key_set(&[b"foo", b"biff"]));
}

// =============================================================================
// Large Value Tests
// =============================================================================

#[test]
fn test_multi_block_values() {
    let (_temp, _path, db) = setup_temp_db_with_small_blocks();

    let big: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    db.insert(b"big", &big).unwrap();
    assert_eq!(db.fetch(b"big").unwrap(), big);

    // Shrink, then grow past the original extent
    db.replace(b"big", b"small").unwrap();
    assert_eq!(db.fetch(b"big").unwrap(), b"small");

    let bigger = vec![7u8; 150_000];
    db.replace(b"big", &bigger).unwrap();
    assert_eq!(db.fetch(b"big").unwrap(), bigger);
}

#[test]
fn test_replace_after_sync_keeps_value() {
    let (_temp, _path, db) = setup_temp_db_with_small_blocks();

    db.insert(b"key", &vec![1u8; 2000]).unwrap();
    db.sync().unwrap();

    db.replace(b"key", &vec![2u8; 1000]).unwrap();
    assert_eq!(db.fetch(b"key").unwrap(), vec![2u8; 1000]);

    db.sync().unwrap();
    assert_eq!(db.fetch(b"key").unwrap(), vec![2u8; 1000]);
}

// =============================================================================
// Index Growth Tests
// =============================================================================

#[test]
fn test_many_keys_force_splits() {
    let (_temp, _path, db) = setup_temp_db_with_small_blocks();

    for i in 0..2000u32 {
        let key = format!("key_{:05}", i);
        let value = format!("value_{}", i);
        db.insert(key.as_bytes(), value.as_bytes()).unwrap();
    }

    let stats = db.stats().unwrap();
    assert!(stats.directory_bits > 0);
    assert!(stats.bucket_count > 1);
    assert_eq!(stats.record_count, 2000);

    for i in 0..2000u32 {
        let key = format!("key_{:05}", i);
        let value = format!("value_{}", i);
        assert_eq!(db.fetch(key.as_bytes()).unwrap(), value.as_bytes());
    }
}

#[test]
fn test_splits_survive_reopen() {
    let (_temp, path, db) = setup_temp_db_with_small_blocks();

    for i in 0..500u32 {
        db.insert(format!("k{}", i).as_bytes(), &i.to_le_bytes()).unwrap();
    }
    db.close().unwrap();

    let db = Database::open_path(&path, OpenMode::ReadWrite).unwrap();
    assert_eq!(db.len().unwrap(), 500);
    for i in 0..500u32 {
        assert_eq!(db.fetch(format!("k{}", i).as_bytes()).unwrap(), i.to_le_bytes());
    }
}

// =============================================================================
// Traversal Tests
// =============================================================================

#[test]
fn test_first_key_empty() {
    let (_temp, db) = setup_temp_db();

    assert!(matches!(db.first_key(), Err(DbmError::Empty)));
    assert_eq!(db.keys().count(), 0);
}

#[test]
fn test_next_key_single_entry() {
    let (_temp, db) = setup_temp_db();

    db.insert(b"only", b"one").unwrap();

    assert_eq!(db.first_key().unwrap(), b"only");
    assert!(matches!(db.next_key(b"only"), Err(DbmError::NoMoreKeys)));
}

#[test]
fn test_next_key_absent_key() {
    let (_temp, db) = setup_temp_db();

    db.insert(b"present", b"1").unwrap();

    assert!(matches!(db.next_key(b"absent"), Err(DbmError::NotFound)));
}

#[test]
fn test_traversal_visits_every_key_once() {
    let (_temp, _path, db) = setup_temp_db_with_small_blocks();

    let expected: HashSet<Vec<u8>> = (0..1000u32)
        .map(|i| format!("traverse_{}", i).into_bytes())
        .collect();
    for key in &expected {
        db.insert(key, b"v").unwrap();
    }

    let mut seen = HashSet::new();
    let mut current = db.first_key().unwrap();
    loop {
        assert!(seen.insert(current.clone()), "key visited twice");
        match db.next_key(&current) {
            Ok(next) => current = next,
            Err(DbmError::NoMoreKeys) => break,
            Err(e) => panic!("traversal failed: {}", e),
        }
    }

    assert_eq!(seen, expected);
}

#[test]
fn test_traversal_after_deletes() {
    let (_temp, _path, db) = setup_temp_db_with_small_blocks();

    for i in 0..300u32 {
        db.insert(format!("k{}", i).as_bytes(), b"v").unwrap();
    }
    for i in (0..300u32).filter(|i| i % 3 == 0) {
        db.delete(format!("k{}", i).as_bytes()).unwrap();
    }

    let expected: HashSet<Vec<u8>> = (0..300u32)
        .filter(|i| i % 3 != 0)
        .map(|i| format!("k{}", i).into_bytes())
        .collect();
    assert_eq!(collect_keys(&db), expected);
    assert_eq!(db.len().unwrap(), 200);
}

// =============================================================================
// Open Mode Tests
// =============================================================================

#[test]
fn test_open_mode_from_str() {
    assert_eq!("r".parse::<OpenMode>().unwrap(), OpenMode::ReadOnly);
    assert_eq!("w".parse::<OpenMode>().unwrap(), OpenMode::ReadWrite);
    assert_eq!("c".parse::<OpenMode>().unwrap(), OpenMode::CreateIfMissing);
    assert_eq!("n".parse::<OpenMode>().unwrap(), OpenMode::AlwaysRecreate);
    assert!(matches!("x".parse::<OpenMode>(), Err(DbmError::Config(_))));
}

#[test]
fn test_open_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing.db");

    assert!(matches!(
        Database::open_path(&path, OpenMode::ReadOnly),
        Err(DbmError::Io(_))
    ));
    assert!(matches!(
        Database::open_path(&path, OpenMode::ReadWrite),
        Err(DbmError::Io(_))
    ));
    assert!(!path.exists());
}

#[test]
fn test_read_only_rejects_mutation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ro.db");

    let db = Database::open_path(&path, OpenMode::CreateIfMissing).unwrap();
    db.insert(b"key", b"value").unwrap();
    db.close().unwrap();
    let before = std::fs::read(&path).unwrap();

    let db = Database::open_path(&path, OpenMode::ReadOnly).unwrap();
    assert!(matches!(db.insert(b"new", b"v"), Err(DbmError::ReadOnly)));
    assert!(matches!(db.replace(b"key", b"v"), Err(DbmError::ReadOnly)));
    assert!(matches!(db.delete(b"key"), Err(DbmError::ReadOnly)));
    assert!(matches!(db.reorganize(), Err(DbmError::ReadOnly)));

    // Reads still work and the handle stays usable
    assert_eq!(db.fetch(b"key").unwrap(), b"value");
    db.sync().unwrap();
    db.close().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn test_second_writer_gets_lock_held() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("locked.db");

    let writer = Database::open_path(&path, OpenMode::CreateIfMissing).unwrap();

    assert!(matches!(
        Database::open_path(&path, OpenMode::ReadWrite),
        Err(DbmError::LockHeld)
    ));
    assert!(matches!(
        Database::open_path(&path, OpenMode::AlwaysRecreate),
        Err(DbmError::LockHeld)
    ));

    // Readers do not take the lock
    let reader = Database::open_path(&path, OpenMode::ReadOnly).unwrap();
    reader.close().unwrap();

    writer.close().unwrap();
    let writer = Database::open_path(&path, OpenMode::ReadWrite).unwrap();
    writer.close().unwrap();
}

#[test]
fn test_invalid_block_size_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.db");
    let config = Config::builder().block_size(1000).build();

    assert!(matches!(
        Database::open(&path, OpenMode::CreateIfMissing, config),
        Err(DbmError::Config(_))
    ));
}

#[test]
fn test_existing_file_keeps_block_size() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bs.db");

    let config = Config::builder().block_size(1024).build();
    let db = Database::open(&path, OpenMode::CreateIfMissing, config).unwrap();
    db.close().unwrap();

    let config = Config::builder().block_size(8192).build();
    let db = Database::open(&path, OpenMode::ReadWrite, config).unwrap();
    assert_eq!(db.stats().unwrap().block_size, 1024);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_operations_after_close() {
    let (_temp, db) = setup_temp_db();

    db.insert(b"key", b"value").unwrap();
    db.close().unwrap();

    assert!(db.is_closed());
    assert!(matches!(db.fetch(b"key"), Err(DbmError::ClosedHandle)));
    assert!(matches!(db.insert(b"k", b"v"), Err(DbmError::ClosedHandle)));
    assert!(matches!(db.first_key(), Err(DbmError::ClosedHandle)));
    assert!(matches!(db.sync(), Err(DbmError::ClosedHandle)));
    assert!(matches!(db.close(), Err(DbmError::ClosedHandle)));
}

#[test]
fn test_keys_iterator_reports_closed_handle() {
    let (_temp, db) = setup_temp_db();
    db.close().unwrap();

    let mut keys = db.keys();
    assert!(matches!(keys.next(), Some(Err(DbmError::ClosedHandle))));
    assert!(keys.next().is_none());
}

#[test]
fn test_set_commit_strategy_validates() {
    let (_temp, db) = setup_temp_db();

    db.set_commit_strategy(CommitStrategy::EveryWrite).unwrap();
    assert!(matches!(
        db.set_commit_strategy(CommitStrategy::EveryNWrites { count: 0 }),
        Err(DbmError::Config(_))
    ));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_shared_handle_across_threads() {
    let (_temp, db) = setup_temp_db();
    let db = Arc::new(db);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("t{}_k{}", t, i);
                    db.insert(key.as_bytes(), key.as_bytes()).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.len().unwrap(), 400);
    assert_eq!(db.fetch(b"t3_k99").unwrap(), b"t3_k99");
}
