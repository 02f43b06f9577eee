//! Tests for Linear Hashing Growth
//!
//! These tests verify:
//! - Placement function and hash compatibility
//! - Growth trigger and state transitions (n, m, s)
//! - Keys stay reachable across splits and reopens
//! - A split only moves keys from bucket i to bucket i + m
//! - Small cache limits force eviction without losing data

use std::collections::HashMap;
use std::path::PathBuf;

use lhdb::config::{Access, Config, OpenMode};
use lhdb::engine::{hash32, placement, LinearState};
use lhdb::{Cursor, Engine};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_path() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("growth.lhdb");
    (temp_dir, path)
}

fn key(i: u32) -> Vec<u8> {
    format!("key_{:06}", i).into_bytes()
}

fn value(i: u32) -> Vec<u8> {
    format!("value_{}", i).into_bytes()
}

fn small_cache_config() -> Config {
    Config::builder()
        .bucket_cache_limit(64)
        .bucket_cache_retain(16)
        .dirty_flush_threshold(32)
        .build()
}

/// Bucket each key is physically stored in, found by scanning
fn stored_buckets(engine: &mut Engine) -> HashMap<Vec<u8>, u32> {
    let mut cursor = Cursor::new();
    let mut buckets = HashMap::new();
    let mut next = engine.first_key(&mut cursor).unwrap();
    while let Some(k) = next {
        buckets.insert(k, cursor.bucket());
        next = engine.next_key(&mut cursor).unwrap();
    }
    buckets
}

/// Insert `trigger` (which must cause one growth step) and check where
/// every previously stored key ended up
fn assert_split_moves(engine: &mut Engine, trigger: u32) {
    let before = stored_buckets(engine);
    let old = engine.state();
    for (k, &bucket) in &before {
        assert_eq!(engine.bucket_of(k), bucket);
    }

    engine.insert(&key(trigger), &value(trigger)).unwrap();
    assert_eq!(engine.state().capacity, old.capacity + 256);

    let after = stored_buckets(engine);
    assert_eq!(after.len(), before.len() + 1);

    let mut moved = 0;
    for (k, &old_bucket) in &before {
        let new_bucket = after[k];
        assert_eq!(engine.bucket_of(k), new_bucket);
        if (old.split..old.split + 256).contains(&old_bucket) {
            assert!(
                new_bucket == old_bucket || new_bucket == old_bucket + old.modulus,
                "{:?} went from {} to {}",
                String::from_utf8_lossy(k),
                old_bucket,
                new_bucket
            );
            if new_bucket != old_bucket {
                moved += 1;
            }
        } else {
            assert_eq!(new_bucket, old_bucket, "{:?} left an unsplit bucket", String::from_utf8_lossy(k));
        }
    }
    assert!(moved > 0);
}

// =============================================================================
// Placement Tests
// =============================================================================

#[test]
fn test_hash_is_ieee_crc32() {
    assert_eq!(hash32(b"123456789"), 0xCBF4_3926);
    assert_eq!(hash32(b""), 0);
}

#[test]
fn test_placement_before_split_pointer_uses_doubled_modulus() {
    // low byte 0x05 is below split 16, so bit 8 decides the bucket
    assert_eq!(placement(0x0105, 16, 256), 0x105);
    assert_eq!(placement(0x0005, 16, 256), 0x005);
}

#[test]
fn test_placement_at_or_after_split_pointer() {
    assert_eq!(placement(0x0110, 16, 256), 0x10);
    assert_eq!(placement(0xFFFF_FFFF, 0, 256), 0xFF);
}

#[test]
fn test_placement_always_below_capacity() {
    let state = LinearState {
        split: 256,
        modulus: 512,
        capacity: 768,
        count: 0,
    };
    for i in 0..10_000 {
        assert!(state.bucket_for(&key(i)) < state.capacity);
    }
}

#[test]
fn test_state_advance() {
    let mut state = LinearState::default();
    assert_eq!((state.capacity, state.modulus, state.split), (256, 256, 0));

    state.advance();
    assert_eq!((state.capacity, state.modulus, state.split), (512, 512, 0));

    state.advance();
    assert_eq!((state.capacity, state.modulus, state.split), (768, 512, 256));

    state.advance();
    assert_eq!((state.capacity, state.modulus, state.split), (1024, 1024, 0));
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_growth_after_capacity_exceeded() {
    let (_temp, path) = setup_temp_path();
    let mut engine = Engine::open(&path, "c").unwrap();

    for i in 0..256 {
        engine.insert(&key(i), &value(i)).unwrap();
    }
    assert_eq!(engine.stats().capacity, 256);

    engine.insert(&key(256), &value(256)).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.capacity, 512);
    assert_eq!(stats.modulus, 512);
    assert_eq!(stats.split, 0);
    assert_eq!(stats.dirty_buckets, 0);
}

#[test]
fn test_second_growth_moves_split_pointer() {
    let (_temp, path) = setup_temp_path();
    let mut engine = Engine::open(&path, "c").unwrap();

    for i in 0..513 {
        engine.insert(&key(i), &value(i)).unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.capacity, 768);
    assert_eq!(stats.modulus, 512);
    assert_eq!(stats.split, 256);
}

#[test]
fn test_split_moves_keys_only_to_mirror_bucket() {
    let (_temp, path) = setup_temp_path();
    let mut engine = Engine::open(&path, "c").unwrap();

    for i in 0..256 {
        engine.insert(&key(i), &value(i)).unwrap();
    }
    // 256 -> 512 buckets, every bucket splits
    assert_split_moves(&mut engine, 256);

    for i in 257..512 {
        engine.insert(&key(i), &value(i)).unwrap();
    }
    // 512 -> 768 buckets, only buckets 0..256 split
    assert_split_moves(&mut engine, 512);

    for i in 0..513 {
        assert_eq!(engine.fetch(&key(i)).unwrap(), Some(value(i)), "key {}", i);
    }
}

#[test]
fn test_keys_reachable_after_growth() {
    let (_temp, path) = setup_temp_path();
    let mut engine = Engine::open(&path, "c").unwrap();

    for i in 0..2000 {
        engine.insert(&key(i), &value(i)).unwrap();
    }

    assert_eq!(engine.count(), 2000);
    assert!(engine.stats().capacity >= 2000);
    for i in 0..2000 {
        assert_eq!(engine.fetch(&key(i)).unwrap(), Some(value(i)), "key {}", i);
    }
}

#[test]
fn test_growth_survives_reopen() {
    let (_temp, path) = setup_temp_path();
    let mut engine = Engine::open(&path, "c").unwrap();
    for i in 0..1500 {
        engine.insert(&key(i), &value(i)).unwrap();
    }
    let stats = engine.stats();
    engine.close().unwrap();

    let mut engine = Engine::open(&path, "w").unwrap();

    let reopened = engine.stats();
    assert_eq!(reopened.capacity, stats.capacity);
    assert_eq!(reopened.modulus, stats.modulus);
    assert_eq!(reopened.split, stats.split);
    assert_eq!(engine.count(), 1500);
    for i in (0..1500).step_by(7) {
        assert_eq!(engine.fetch(&key(i)).unwrap(), Some(value(i)));
    }
}

#[test]
fn test_growth_beyond_first_page_table() {
    // 512 pages fill page table 0; the next page needs page table 1
    let (_temp, path) = setup_temp_path();
    let mut engine =
        Engine::open_with_config(&path, OpenMode::new(Access::Create), small_cache_config()).unwrap();

    let n = 512 * 256 + 1;
    for i in 0..n {
        engine.insert(&key(i), b"").unwrap();
    }

    assert_eq!(engine.stats().capacity, 512 * 256 + 256);
    engine.close().unwrap();

    let mut engine = Engine::open(&path, "r").unwrap();
    assert_eq!(engine.count(), n as u64);
    assert!(engine.exists(&key(0)).unwrap());
    assert!(engine.exists(&key(n - 1)).unwrap());
}

#[test]
fn test_growth_with_spilled_values() {
    let (_temp, path) = setup_temp_path();
    let mut engine = Engine::open(&path, "c").unwrap();
    let big = vec![0x5Au8; 1500];

    for i in 0..600 {
        if i % 10 == 0 {
            engine.insert(&key(i), &big).unwrap();
        } else {
            engine.insert(&key(i), &value(i)).unwrap();
        }
    }

    for i in 0..600 {
        let expected = if i % 10 == 0 { big.clone() } else { value(i) };
        assert_eq!(engine.fetch(&key(i)).unwrap(), Some(expected));
    }
}

// =============================================================================
// Cache Pressure Tests
// =============================================================================

#[test]
fn test_small_cache_keeps_all_data() {
    let (_temp, path) = setup_temp_path();
    let mut engine =
        Engine::open_with_config(&path, OpenMode::new(Access::Create), small_cache_config()).unwrap();

    for i in 0..3000 {
        engine.insert(&key(i), &value(i)).unwrap();
    }
    for i in (0..3000).step_by(2) {
        assert!(engine.delete(&key(i)).unwrap());
    }

    for i in 0..3000 {
        let expected = if i % 2 == 0 { None } else { Some(value(i)) };
        assert_eq!(engine.fetch(&key(i)).unwrap(), expected, "key {}", i);
    }
    assert!(engine.stats().cached_buckets <= 64);
    engine.close().unwrap();

    let mut engine = Engine::open(&path, "r").unwrap();
    assert_eq!(engine.count(), 1500);
    assert_eq!(engine.keys().count(), 1500);
}

#[test]
fn test_retain_above_limit_does_not_underflow() {
    // struct literal skips the builder clamp
    let config = Config {
        bucket_cache_limit: 4,
        bucket_cache_retain: 100,
        ..Config::default()
    };
    let (_temp, path) = setup_temp_path();
    let mut engine = Engine::open_with_config(&path, OpenMode::new(Access::Create), config).unwrap();

    for i in 0..300 {
        engine.insert(&key(i), &value(i)).unwrap();
    }
    engine.flush().unwrap();
    for i in 0..300 {
        assert_eq!(engine.fetch(&key(i)).unwrap(), Some(value(i)));
    }

    assert!(engine.stats().cached_buckets <= 100);
}
