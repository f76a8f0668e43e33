//! Segment Iterator
//!
//! Sequential iteration over every frame in a segment.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::error::{EmberError, Result};
use crate::record::{self, Record, RecordHeader, HEADER_SIZE};

use super::SegmentId;

/// One decoded frame and where it lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    pub offset: u64,
    /// Whole frame length
    pub len: u32,
    pub record: Record,
}

/// Iterator over segment frames in file order
///
/// Yields `Err(TruncatedRecord)` or `Err(CorruptRecord)` for the first bad
/// frame and then stops; `valid_len()` is the boundary after the last good
/// frame.
pub struct SegmentIterator {
    id: SegmentId,
    file: BufReader<File>,
    /// Start of the next frame
    offset: u64,
    /// File length when the scan started
    end: u64,
    done: bool,
}

impl SegmentIterator {
    pub(super) fn new(mut file: File, id: SegmentId) -> Result<Self> {
        let end = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            id,
            file: BufReader::new(file),
            offset: 0,
            end,
            done: false,
        })
    }

    /// Offset just past the last frame yielded successfully
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// File length seen by this scan
    pub fn file_len(&self) -> u64 {
        self.end
    }

    fn truncated(&self) -> EmberError {
        EmberError::TruncatedRecord {
            segment: self.id,
            offset: self.offset,
        }
    }

    fn read_entry(&mut self) -> Result<SegmentEntry> {
        let remaining = self.end - self.offset;
        if remaining < HEADER_SIZE as u64 {
            return Err(self.truncated());
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        self.file
            .read_exact(&mut header_bytes)
            .map_err(|e| self.eof_as_truncation(e))?;
        let header = RecordHeader::parse(&header_bytes);

        // A garbage length must not turn into a huge allocation
        let frame_len = header.frame_len();
        if frame_len > remaining || frame_len > u32::MAX as u64 {
            return Err(self.truncated());
        }

        let mut frame = vec![0u8; frame_len as usize];
        frame[..HEADER_SIZE].copy_from_slice(&header_bytes);
        self.file
            .read_exact(&mut frame[HEADER_SIZE..])
            .map_err(|e| self.eof_as_truncation(e))?;

        let (record, _) =
            record::decode(&frame).map_err(|e| record::locate(e, self.id, self.offset))?;

        Ok(SegmentEntry {
            offset: self.offset,
            len: frame_len as u32,
            record,
        })
    }

    fn eof_as_truncation(&self, e: std::io::Error) -> EmberError {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            self.truncated()
        } else {
            EmberError::Io(e)
        }
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<SegmentEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.end {
            return None;
        }

        match self.read_entry() {
            Ok(entry) => {
                self.offset += entry.len as u64;
                Some(Ok(entry))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
