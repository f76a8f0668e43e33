//! Record Module
//!
//! A record is one immutable log entry: a key plus either a value or a
//! tombstone, stamped with a sequence number.
//!
//! ## Frame Format
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ Header (16 bytes)                                              │
//! │ ┌─────────────┬─────────────┬──────────────┐                   │
//! │ │ KeyLen (4)  │ ValLen (4)  │   Seq (8)    │                   │
//! │ └─────────────┴─────────────┴──────────────┘                   │
//! ├────────────────────────────────────────────────────────────────┤
//! │ Key (KeyLen) │ Value (ValLen, absent for tombstones)           │
//! ├────────────────────────────────────────────────────────────────┤
//! │ CRC32 (4) over header + key + value                            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little endian. `ValLen = u32::MAX` marks a tombstone.

mod codec;

pub use codec::{
    checked_frame_len, decode, encode, RecordHeader, CRC_SIZE, HEADER_SIZE, MAX_FRAME_SIZE,
    TOMBSTONE_MARKER,
};
pub(crate) use codec::locate;

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Global write order; strictly increasing across the store
    pub seq: u64,

    pub key: Vec<u8>,

    /// `None` is a tombstone
    pub value: Option<Vec<u8>>,
}

impl Record {
    /// A record carrying a value
    pub fn put(seq: u64, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A deletion marker for `key`
    pub fn tombstone(seq: u64, key: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            key: key.into(),
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Size of this record once framed
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.as_ref().map_or(0, Vec::len) + CRC_SIZE
    }
}
