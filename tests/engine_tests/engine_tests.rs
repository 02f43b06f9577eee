//! Tests for Engine
//!
//! These tests verify:
//! - Basic insert/replace/fetch/exists/delete operations
//! - Spilled (large) values
//! - Persistence across close and reopen
//! - Key iteration with cursors
//! - Read-only handles and open modes
//! - Shared handles across threads

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::thread;

use lhdb::{Cursor, Engine, LhdbError, SharedEngine};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_engine() -> (TempDir, PathBuf, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.lhdb");
    let engine = Engine::open(&path, "c").unwrap();
    (temp_dir, path, engine)
}

fn large_value(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_file() {
    let (_temp, path, engine) = setup_temp_engine();

    assert!(path.exists());
    assert_eq!(engine.count(), 0);

    let stats = engine.stats();
    assert_eq!(stats.capacity, 256);
    assert_eq!(stats.modulus, 256);
    assert_eq!(stats.split, 0);
    assert_eq!(stats.fsize, 5376);
}

#[test]
fn test_engine_header_on_disk() {
    let (_temp, path, engine) = setup_temp_engine();
    engine.close().unwrap();

    let raw = fs::read(&path).unwrap();
    assert_eq!(&raw[0..4], b"LHDB");
    assert_eq!(&raw[4..8], &1u32.to_be_bytes());
    assert_eq!(raw[8], 0);
    assert_eq!(&raw[9..13], &5376u32.to_be_bytes());
}

#[test]
fn test_engine_insert_fetch() {
    let (_temp, _path, mut engine) = setup_temp_engine();

    assert!(engine.insert(b"hello", b"world").unwrap());

    assert_eq!(engine.fetch(b"hello").unwrap(), Some(b"world".to_vec()));
    assert!(engine.exists(b"hello").unwrap());
    assert_eq!(engine.count(), 1);
}

#[test]
fn test_engine_fetch_nonexistent_key() {
    let (_temp, _path, mut engine) = setup_temp_engine();

    assert_eq!(engine.fetch(b"nonexistent").unwrap(), None);
    assert!(!engine.exists(b"nonexistent").unwrap());
}

#[test]
fn test_engine_insert_existing_key_is_rejected() {
    let (_temp, _path, mut engine) = setup_temp_engine();

    assert!(engine.insert(b"key", b"first").unwrap());
    assert!(!engine.insert(b"key", b"second").unwrap());

    assert_eq!(engine.fetch(b"key").unwrap(), Some(b"first".to_vec()));
    assert_eq!(engine.count(), 1);
}

#[test]
fn test_engine_replace_overwrites() {
    let (_temp, _path, mut engine) = setup_temp_engine();

    engine.replace(b"key", b"v1").unwrap();
    engine.replace(b"key", b"v2").unwrap();

    assert_eq!(engine.fetch(b"key").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(engine.count(), 1);
}

#[test]
fn test_engine_replace_same_value_is_idempotent() {
    let (_temp, _path, mut engine) = setup_temp_engine();
    engine.replace(b"key", b"value").unwrap();
    engine.flush().unwrap();

    engine.replace(b"key", b"value").unwrap();

    assert_eq!(engine.stats().dirty_buckets, 0);
    assert_eq!(engine.count(), 1);
}

#[test]
fn test_engine_delete() {
    let (_temp, _path, mut engine) = setup_temp_engine();
    engine.insert(b"key", b"value").unwrap();

    assert!(engine.delete(b"key").unwrap());
    assert!(!engine.delete(b"key").unwrap());

    assert_eq!(engine.fetch(b"key").unwrap(), None);
    assert_eq!(engine.count(), 0);
}

#[test]
fn test_engine_empty_key_and_value() {
    let (_temp, _path, mut engine) = setup_temp_engine();

    engine.insert(b"", b"empty key").unwrap();
    engine.insert(b"empty value", b"").unwrap();

    assert_eq!(engine.fetch(b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(engine.fetch(b"empty value").unwrap(), Some(Vec::new()));
}

#[test]
fn test_engine_binary_keys() {
    let (_temp, _path, mut engine) = setup_temp_engine();
    let key = [0u8, 255, 0, 1, 2];

    engine.insert(&key, &[9, 9, 9]).unwrap();

    assert_eq!(engine.fetch(&key).unwrap(), Some(vec![9, 9, 9]));
    assert_eq!(engine.fetch(&key[..4]).unwrap(), None);
}

// =============================================================================
// Spilled Value Tests
// =============================================================================

#[test]
fn test_engine_large_value_round_trip() {
    let (_temp, _path, mut engine) = setup_temp_engine();
    let value = large_value(2000, 7);

    engine.insert(b"large", &value).unwrap();

    assert_eq!(engine.fetch(b"large").unwrap(), Some(value));
}

#[test]
fn test_engine_boundary_value_sizes() {
    let (_temp, _path, mut engine) = setup_temp_engine();

    for len in [511usize, 512, 513, 1024, 4097] {
        let key = format!("len_{}", len);
        engine.replace(key.as_bytes(), &large_value(len, len as u8)).unwrap();
    }
    for len in [511usize, 512, 513, 1024, 4097] {
        let key = format!("len_{}", len);
        assert_eq!(
            engine.fetch(key.as_bytes()).unwrap(),
            Some(large_value(len, len as u8)),
            "len {}",
            len
        );
    }
}

#[test]
fn test_engine_replacing_spilled_value_frees_space() {
    let (_temp, _path, mut engine) = setup_temp_engine();
    engine.insert(b"big", &large_value(2000, 1)).unwrap();
    engine.flush().unwrap();
    let before = engine.stats().free_bytes.unwrap();

    engine.replace(b"big", b"small now").unwrap();

    let after = engine.stats().free_bytes.unwrap();
    assert_eq!(after, before + 2048);
    assert_eq!(engine.fetch(b"big").unwrap(), Some(b"small now".to_vec()));
}

#[test]
fn test_engine_replacing_spilled_with_spilled() {
    let (_temp, _path, mut engine) = setup_temp_engine();

    engine.replace(b"big", &large_value(3000, 1)).unwrap();
    engine.replace(b"big", &large_value(600, 2)).unwrap();

    assert_eq!(engine.fetch(b"big").unwrap(), Some(large_value(600, 2)));
}

#[test]
fn test_engine_deleting_spilled_value_frees_space() {
    let (_temp, _path, mut engine) = setup_temp_engine();
    engine.insert(b"anchor", b"x").unwrap();
    engine.flush().unwrap();
    let baseline = engine.stats().free_bytes.unwrap();

    engine.insert(b"big", &large_value(5000, 3)).unwrap();
    engine.delete(b"big").unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.stats().free_bytes.unwrap(), baseline);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_engine_reopen_preserves_data() {
    let (_temp, path, mut engine) = setup_temp_engine();
    for i in 0..100 {
        let key = format!("key{}", i);
        let value = format!("value{}", i);
        engine.insert(key.as_bytes(), value.as_bytes()).unwrap();
    }
    engine.insert(b"large", &large_value(2000, 9)).unwrap();
    engine.close().unwrap();

    let mut engine = Engine::open(&path, "w").unwrap();

    assert_eq!(engine.count(), 101);
    for i in 0..100 {
        let key = format!("key{}", i);
        let value = format!("value{}", i);
        assert_eq!(engine.fetch(key.as_bytes()).unwrap(), Some(value.into_bytes()));
    }
    assert_eq!(engine.fetch(b"large").unwrap(), Some(large_value(2000, 9)));
}

#[test]
fn test_engine_drop_flushes() {
    let (_temp, path, mut engine) = setup_temp_engine();
    engine.insert(b"key", b"value").unwrap();
    drop(engine);

    let raw = fs::read(&path).unwrap();
    assert_eq!(raw[8], 0);

    let mut engine = Engine::open(&path, "r").unwrap();
    assert_eq!(engine.fetch(b"key").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn test_engine_deletes_persist() {
    let (_temp, path, mut engine) = setup_temp_engine();
    engine.insert(b"keep", b"1").unwrap();
    engine.insert(b"drop", b"2").unwrap();
    engine.close().unwrap();

    let mut engine = Engine::open(&path, "w").unwrap();
    engine.delete(b"drop").unwrap();
    engine.close().unwrap();

    let mut engine = Engine::open(&path, "r").unwrap();
    assert_eq!(engine.count(), 1);
    assert!(engine.exists(b"keep").unwrap());
    assert!(!engine.exists(b"drop").unwrap());
}

#[test]
fn test_engine_allocator_survives_reopen() {
    let (_temp, path, mut engine) = setup_temp_engine();
    for i in 0..50 {
        engine.insert(format!("k{}", i).as_bytes(), &large_value(700, i)).unwrap();
    }
    engine.flush().unwrap();
    let blocks = engine.allocator().unwrap().free_blocks();
    engine.close().unwrap();

    let engine = Engine::open(&path, "w").unwrap();

    assert_eq!(engine.allocator().unwrap().free_blocks(), blocks);
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[test]
fn test_engine_keys_visits_every_key_once() {
    let (_temp, _path, mut engine) = setup_temp_engine();
    let expected: BTreeSet<Vec<u8>> = (0..300).map(|i| format!("key{}", i).into_bytes()).collect();
    for key in &expected {
        engine.insert(key, b"v").unwrap();
    }

    let keys: Vec<Vec<u8>> = engine.keys().collect::<Result<_, _>>().unwrap();

    assert_eq!(keys.len(), expected.len());
    assert_eq!(keys.into_iter().collect::<BTreeSet<_>>(), expected);
}

#[test]
fn test_engine_cursor_iteration() {
    let (_temp, _path, mut engine) = setup_temp_engine();
    engine.insert(b"a", b"1").unwrap();
    engine.insert(b"b", b"2").unwrap();
    engine.insert(b"c", b"3").unwrap();

    let mut cursor = Cursor::new();
    let mut seen = BTreeSet::new();
    let mut next = engine.first_key(&mut cursor).unwrap();
    while let Some(key) = next {
        seen.insert(key);
        next = engine.next_key(&mut cursor).unwrap();
    }

    let expected: BTreeSet<Vec<u8>> = [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()].into();
    assert_eq!(seen, expected);
    assert_eq!(engine.next_key(&mut cursor).unwrap(), None);
}

#[test]
fn test_engine_keys_on_empty_store() {
    let (_temp, _path, mut engine) = setup_temp_engine();

    let mut cursor = Cursor::new();
    assert_eq!(engine.first_key(&mut cursor).unwrap(), None);
    assert_eq!(engine.keys().count(), 0);
}

// =============================================================================
// Read-Only Tests
// =============================================================================

#[test]
fn test_engine_read_only_rejects_writes() {
    let (_temp, path, mut engine) = setup_temp_engine();
    engine.insert(b"key", b"value").unwrap();
    engine.close().unwrap();

    let mut engine = Engine::open(&path, "r").unwrap();

    assert_eq!(engine.fetch(b"key").unwrap(), Some(b"value".to_vec()));
    assert!(engine.allocator().is_none());
    assert!(matches!(engine.insert(b"k", b"v"), Err(LhdbError::InvalidOperation(_))));
    assert!(matches!(engine.replace(b"k", b"v"), Err(LhdbError::InvalidOperation(_))));
    assert!(matches!(engine.delete(b"key"), Err(LhdbError::InvalidOperation(_))));
    engine.close().unwrap();
}

#[test]
fn test_engine_read_only_empty_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("empty.lhdb");
    fs::File::create(&path).unwrap();

    let result = Engine::open(&path, "r");

    assert!(matches!(result, Err(LhdbError::Format(_))));
}

#[test]
fn test_engine_bad_magic_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("junk.lhdb");
    fs::write(&path, vec![0xAAu8; 6000]).unwrap();

    assert!(matches!(Engine::open(&path, "w"), Err(LhdbError::Format(_))));
}

#[test]
fn test_engine_truncate_mode_starts_empty() {
    let (_temp, path, mut engine) = setup_temp_engine();
    engine.insert(b"key", b"value").unwrap();
    engine.close().unwrap();

    let mut engine = Engine::open(&path, "n").unwrap();

    assert_eq!(engine.count(), 0);
    assert_eq!(engine.fetch(b"key").unwrap(), None);
}

#[test]
fn test_engine_write_mode_requires_existing_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing.lhdb");

    assert!(matches!(Engine::open(&path, "w"), Err(LhdbError::Io(_))));
    assert!(!path.exists());
}

#[test]
fn test_engine_invalid_mode() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.lhdb");

    assert!(matches!(Engine::open(&path, "x"), Err(LhdbError::InvalidArgument(_))));
    assert!(matches!(Engine::open(&path, "cz"), Err(LhdbError::InvalidArgument(_))));
    assert!(matches!(Engine::open(&path, ""), Err(LhdbError::InvalidArgument(_))));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_shared_engine_concurrent_writers() {
    let temp_dir = TempDir::new().unwrap();
    let shared = SharedEngine::open(temp_dir.path().join("shared.lhdb"), "c").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    let key = format!("t{}_k{}", t, i);
                    assert!(shared.insert(key.as_bytes(), b"v").unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(shared.count(), 1000);
    assert_eq!(shared.fetch(b"t3_k249").unwrap(), Some(b"v".to_vec()));
    assert_eq!(shared.with(|engine| engine.keys().count()), 1000);
    shared.close().unwrap();
}

#[test]
fn test_shared_engine_close_with_live_clones_fails() {
    let temp_dir = TempDir::new().unwrap();
    let shared = SharedEngine::open(temp_dir.path().join("shared.lhdb"), "c").unwrap();
    let other = shared.clone();

    assert!(matches!(shared.close(), Err(LhdbError::InvalidOperation(_))));
    other.close().unwrap();
}
