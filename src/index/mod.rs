//! Index Module
//!
//! In-memory map from key to the location of its newest record.
//!
//! ## Responsibilities
//! - The only structure consulted on reads
//! - Rebuilt from segments at startup, never persisted
//! - Maintained under the engine's writer lock; read under a shared lock
//!
//! ## Data Structure Choice
//! HashMap wrapped in RwLock:
//! - Point lookups only (no range scans)
//! - Entries are small `Copy` values, so readers clone out and drop the lock
//!   before any file I/O

mod table;

pub use table::KeyIndex;

use crate::segment::SegmentId;

/// Where the newest record for a key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub segment_id: SegmentId,
    /// Start of the frame in the segment file
    pub offset: u64,
    /// Whole frame length
    pub len: u32,
    /// Sequence number of the record the entry points at
    pub seq: u64,
}
