//! Record codec
//!
//! Pure encode/decode functions for record frames. No I/O, no state.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{EmberError, Result};
use super::Record;

/// Header size: KeyLen (4) + ValLen (4) + Seq (8) = 16 bytes
pub const HEADER_SIZE: usize = 16;

/// Trailing checksum size
pub const CRC_SIZE: usize = 4;

/// Sentinel value length indicating a tombstone
pub const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Parsed fixed-size prefix of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key_len: u32,
    /// `TOMBSTONE_MARKER` for tombstones
    pub val_len: u32,
    pub seq: u64,
}

impl RecordHeader {
    /// Parse the first `HEADER_SIZE` bytes of a frame
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        let key_len = buf.get_u32_le();
        let val_len = buf.get_u32_le();
        let seq = buf.get_u64_le();
        Self { key_len, val_len, seq }
    }

    pub fn is_tombstone(&self) -> bool {
        self.val_len == TOMBSTONE_MARKER
    }

    /// Length of the whole frame this header announces
    pub fn frame_len(&self) -> u64 {
        let value_len = if self.is_tombstone() { 0 } else { self.val_len as u64 };
        HEADER_SIZE as u64 + self.key_len as u64 + value_len + CRC_SIZE as u64
    }
}

/// Largest frame a segment can index; frame lengths are stored as `u32`
pub const MAX_FRAME_SIZE: u64 = u32::MAX as u64;

/// Frame length for a key and optional value, if it fits `MAX_FRAME_SIZE`
pub fn checked_frame_len(key_len: usize, value_len: Option<usize>) -> Result<u64> {
    let frame_len = HEADER_SIZE as u64
        + key_len as u64
        + value_len.unwrap_or(0) as u64
        + CRC_SIZE as u64;
    if frame_len > MAX_FRAME_SIZE {
        return Err(EmberError::InvalidArgument(format!(
            "record frame of {} bytes exceeds the {} byte limit",
            frame_len, MAX_FRAME_SIZE
        )));
    }
    Ok(frame_len)
}

/// Encode a record into a self-checking frame
pub fn encode(record: &Record) -> Result<Bytes> {
    let frame_len = checked_frame_len(record.key.len(), record.value.as_ref().map(Vec::len))?;

    // Fits in u32 and stays below TOMBSTONE_MARKER once the frame is checked
    let val_len = match &record.value {
        Some(v) => v.len() as u32,
        None => TOMBSTONE_MARKER,
    };

    let mut buf = BytesMut::with_capacity(frame_len as usize);
    buf.put_u32_le(record.key.len() as u32);
    buf.put_u32_le(val_len);
    buf.put_u64_le(record.seq);
    buf.put_slice(&record.key);
    if let Some(value) = &record.value {
        buf.put_slice(value);
    }

    let crc = crc32fast::hash(&buf);
    buf.put_u32_le(crc);

    Ok(buf.freeze())
}

/// Decode the frame at the start of `bytes`
///
/// Returns the record and the number of bytes it occupied. An incomplete
/// frame yields `TruncatedRecord`, a checksum mismatch `CorruptRecord`; both
/// carry segment 0 / offset 0 and are re-addressed by the caller.
pub fn decode(bytes: &[u8]) -> Result<(Record, usize)> {
    if bytes.len() < HEADER_SIZE {
        return Err(EmberError::TruncatedRecord { segment: 0, offset: 0 });
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&bytes[..HEADER_SIZE]);
    let header = RecordHeader::parse(&header_bytes);

    let frame_len = header.frame_len();
    if (bytes.len() as u64) < frame_len {
        return Err(EmberError::TruncatedRecord { segment: 0, offset: 0 });
    }
    let frame_len = frame_len as usize;

    let body_end = frame_len - CRC_SIZE;
    let mut crc_bytes = &bytes[body_end..frame_len];
    let stored_crc = crc_bytes.get_u32_le();
    let computed_crc = crc32fast::hash(&bytes[..body_end]);
    if stored_crc != computed_crc {
        return Err(EmberError::CorruptRecord {
            segment: 0,
            offset: 0,
            reason: format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, computed_crc
            ),
        });
    }

    let key_end = HEADER_SIZE + header.key_len as usize;
    let key = bytes[HEADER_SIZE..key_end].to_vec();
    let value = if header.is_tombstone() {
        None
    } else {
        Some(bytes[key_end..body_end].to_vec())
    };

    Ok((
        Record {
            seq: header.seq,
            key,
            value,
        },
        frame_len,
    ))
}

/// Point a codec error at a concrete place on disk
pub(crate) fn locate(err: EmberError, segment: u64, offset: u64) -> EmberError {
    match err {
        EmberError::TruncatedRecord { .. } => EmberError::TruncatedRecord { segment, offset },
        EmberError::CorruptRecord { reason, .. } => EmberError::CorruptRecord {
            segment,
            offset,
            reason,
        },
        other => other,
    }
}
