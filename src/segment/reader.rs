//! Segment Reader
//!
//! Shared read-only handle for one segment file. Point lookups use positional
//! reads, so any number of threads can read the same segment at once.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{EmberError, Result};
use crate::record::{self, Record};

use super::iterator::SegmentIterator;
use super::{read_exact_at, SegmentId};

/// Read handle for a segment
///
/// Handles live in the store's arena behind `Arc`. Compaction marks retired
/// handles obsolete; the file is deleted when the last reference drops, so a
/// reader that already holds the handle can finish its lookup.
#[derive(Debug)]
pub struct SegmentReader {
    id: SegmentId,
    path: PathBuf,
    file: File,
    obsolete: AtomicBool,
}

impl SegmentReader {
    /// Open a segment for reading
    pub fn open(path: &Path, id: SegmentId) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Read `len` raw bytes at `offset`
    pub fn read_frame(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        read_exact_at(&self.file, &mut buf, offset).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                EmberError::TruncatedRecord {
                    segment: self.id,
                    offset,
                }
            } else {
                EmberError::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// Read and verify the record framed at `offset`
    pub fn read_record(&self, offset: u64, len: u32) -> Result<Record> {
        let frame = self.read_frame(offset, len)?;
        let (record, consumed) =
            record::decode(&frame).map_err(|e| record::locate(e, self.id, offset))?;
        if consumed != frame.len() {
            return Err(EmberError::CorruptRecord {
                segment: self.id,
                offset,
                reason: format!("frame is {} bytes, index expected {}", consumed, len),
            });
        }
        Ok(record)
    }

    /// Sequential scan from the start of the segment
    ///
    /// Opens its own handle; a cloned descriptor would share the cursor with
    /// other scans.
    pub fn iter(&self) -> Result<SegmentIterator> {
        SegmentIterator::new(File::open(&self.path)?, self.id)
    }

    /// Current file length
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schedule the file for deletion once every handle is gone
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed retired segment {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove retired segment {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
