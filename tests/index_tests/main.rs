//! Tests for KeyIndex
//!
//! These tests verify:
//! - Basic put/get/delete operations
//! - Compaction patches only move entries that still match
//! - Concurrent readers with a single writer

use std::sync::Arc;
use std::thread;

use emberkv::index::{IndexEntry, KeyIndex};

fn entry(segment_id: u64, offset: u64, seq: u64) -> IndexEntry {
    IndexEntry {
        segment_id,
        offset,
        len: 32,
        seq,
    }
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_put_get() {
    let index = KeyIndex::new();
    index.put(b"a".to_vec(), entry(0, 0, 1));

    assert_eq!(index.get(b"a"), Some(entry(0, 0, 1)));
    assert!(index.contains(b"a"));
    assert_eq!(index.get(b"b"), None);
    assert_eq!(index.len(), 1);
}

#[test]
fn test_put_overwrites() {
    let index = KeyIndex::new();
    index.put(b"a".to_vec(), entry(0, 0, 1));
    index.put(b"a".to_vec(), entry(0, 32, 2));

    assert_eq!(index.get(b"a"), Some(entry(0, 32, 2)));
    assert_eq!(index.len(), 1);
}

#[test]
fn test_delete_returns_previous() {
    let index = KeyIndex::new();
    index.put(b"a".to_vec(), entry(0, 0, 1));

    assert_eq!(index.delete(b"a"), Some(entry(0, 0, 1)));
    assert_eq!(index.delete(b"a"), None);
    assert!(index.is_empty());
}

// =============================================================================
// Patch Tests
// =============================================================================

#[test]
fn test_patch_moves_matching_entry() {
    let index = KeyIndex::new();
    index.put(b"a".to_vec(), entry(0, 64, 5));

    assert_eq!(index.patch_many(vec![(&b"a"[..], 5, 9, 0)]), 1);

    let moved = index.get(b"a").unwrap();
    assert_eq!(moved.segment_id, 9);
    assert_eq!(moved.offset, 0);
    assert_eq!(moved.seq, 5);
    assert_eq!(moved.len, 32);
}

#[test]
fn test_patch_skips_superseded_entry() {
    let index = KeyIndex::new();
    index.put(b"a".to_vec(), entry(3, 0, 8));

    // Compaction copied seq 5, but seq 8 was written meanwhile
    assert_eq!(index.patch_many(vec![(&b"a"[..], 5, 9, 0)]), 0);
    assert_eq!(index.get(b"a"), Some(entry(3, 0, 8)));

    // Deleted meanwhile
    assert_eq!(index.patch_many(vec![(&b"gone"[..], 2, 9, 0)]), 0);
    assert!(!index.contains(b"gone"));
}

#[test]
fn test_patch_many_counts_applied_moves() {
    let index = KeyIndex::new();
    index.put(b"a".to_vec(), entry(0, 0, 1));
    index.put(b"b".to_vec(), entry(0, 32, 2));
    index.put(b"c".to_vec(), entry(2, 0, 7));

    let moves = vec![
        (&b"a"[..], 1, 5, 0),
        (&b"b"[..], 2, 5, 32),
        (&b"c"[..], 3, 5, 64),
    ];
    let patched = index.patch_many(moves);

    assert_eq!(patched, 2);
    assert_eq!(index.get(b"a").unwrap().segment_id, 5);
    assert_eq!(index.get(b"b"), Some(entry(5, 32, 2)));
    assert_eq!(index.get(b"c").unwrap().segment_id, 2);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_readers_never_see_mixed_entries() {
    let index = Arc::new(KeyIndex::new());
    index.put(b"k".to_vec(), entry(0, 0, 0));

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for seq in 1..=2_000u64 {
                // segment, offset and seq always move together
                index.put(b"k".to_vec(), entry(seq, seq, seq));
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let e = index.get(b"k").unwrap();
                    assert_eq!(e.segment_id, e.seq);
                    assert_eq!(e.offset, e.seq);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(index.get(b"k").unwrap().seq, 2_000);
}
