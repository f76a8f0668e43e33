//! Segment Writer
//!
//! Append handle for the active segment and for compaction output.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::FsyncPolicy;
use crate::error::Result;

use super::SegmentId;

/// Appends whole frames to one segment file
///
/// `size` only counts frames whose append returned `Ok`, so it is the
/// boundary to truncate back to after a failed write.
pub struct SegmentWriter {
    id: SegmentId,
    path: PathBuf,
    file: File,
    /// Bytes of acknowledged frames
    size: u64,
    /// Prefix known to be on stable storage
    synced_size: u64,
    policy: FsyncPolicy,
    /// Writes since the last fsync
    unsynced_writes: usize,
    last_sync: Instant,
}

impl SegmentWriter {
    /// Create a new, empty segment file
    ///
    /// Fails if the file already exists; segment ids are never reused.
    pub fn create(path: &Path, id: SegmentId, policy: FsyncPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)?;
        file.sync_all()?;
        Ok(Self::with_file(file, path, id, 0, policy))
    }

    /// Reopen an existing segment for appending at its current end
    pub fn open(path: &Path, id: SegmentId, policy: FsyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self::with_file(file, path, id, size, policy))
    }

    fn with_file(file: File, path: &Path, id: SegmentId, size: u64, policy: FsyncPolicy) -> Self {
        Self {
            id,
            path: path.to_path_buf(),
            file,
            size,
            synced_size: size,
            policy,
            unsynced_writes: 0,
            last_sync: Instant::now(),
        }
    }

    /// Append one encoded frame, returning the offset it starts at
    ///
    /// The frame goes out in a single `write_all`; the fsync policy is applied
    /// before the size is advanced.
    pub fn append(&mut self, frame: &[u8]) -> Result<u64> {
        let offset = self.size;
        let end = offset + frame.len() as u64;
        self.file.write_all(frame)?;
        self.unsynced_writes += 1;

        if self.sync_due() {
            self.file.sync_data()?;
            self.mark_synced(end);
        }

        self.size = end;
        Ok(offset)
    }

    fn sync_due(&self) -> bool {
        match self.policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryNWrites { count } => self.unsynced_writes >= count,
            FsyncPolicy::Interval { millis } => {
                self.last_sync.elapsed() >= Duration::from_millis(millis)
            }
        }
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.mark_synced(self.size);
        Ok(())
    }

    fn mark_synced(&mut self, len: u64) {
        self.synced_size = len;
        self.unsynced_writes = 0;
        self.last_sync = Instant::now();
    }

    /// Cut the file back to `len` bytes and make that durable
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.size = len;
        self.mark_synced(len);
        Ok(())
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of acknowledged frames
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether appends are waiting for an fsync
    pub fn has_unsynced_writes(&self) -> bool {
        self.unsynced_writes > 0
    }

    /// Acknowledged bytes a crash could still lose
    pub fn unsynced_bytes(&self) -> u64 {
        self.size.saturating_sub(self.synced_size)
    }
}
