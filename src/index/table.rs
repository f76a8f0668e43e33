//! Key index implementation
//!
//! HashMap-based index with RwLock for concurrency.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::segment::SegmentId;

use super::IndexEntry;

/// In-memory key → location map
pub struct KeyIndex {
    entries: RwLock<HashMap<Vec<u8>, IndexEntry>>,
}

impl KeyIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Point `key` at a new location, unconditionally
    ///
    /// The caller holds the writer lock, so entries arrive in sequence order.
    pub fn put(&self, key: Vec<u8>, entry: IndexEntry) {
        self.entries.write().insert(key, entry);
    }

    /// Stop exposing `key`; returns the entry it had
    pub fn delete(&self, key: &[u8]) -> Option<IndexEntry> {
        self.entries.write().remove(key)
    }

    /// Current location of `key`
    pub fn get(&self, key: &[u8]) -> Option<IndexEntry> {
        self.entries.read().get(key).copied()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Move compacted keys to their new locations under one write lock
    ///
    /// Each move is `(key, seq, new_segment, new_offset)` and applies only if
    /// the key still refers to record `seq`; a newer write or a delete made
    /// while compaction was copying wins. Returns how many entries moved.
    pub fn patch_many<'a, I>(&self, moves: I) -> usize
    where
        I: IntoIterator<Item = (&'a [u8], u64, SegmentId, u64)>,
    {
        let mut entries = self.entries.write();
        let mut patched = 0;
        for (key, seq, segment_id, offset) in moves {
            if let Some(entry) = entries.get_mut(key) {
                if entry.seq == seq {
                    entry.segment_id = segment_id;
                    entry.offset = offset;
                    patched += 1;
                }
            }
        }
        patched
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for KeyIndex {
    fn default() -> Self {
        Self::new()
    }
}
