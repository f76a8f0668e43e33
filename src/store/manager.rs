//! Segment Store
//!
//! Owns the set of segments and the manifest that names them.
//!
//! ## Responsibilities
//! - Arena of segment read handles keyed by id
//! - Append records to the active segment
//! - Rotate the active segment at the size threshold
//! - Persist manifest changes atomically (rotation, compaction swap)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{Config, FsyncPolicy};
use crate::error::Result;
use crate::record::{self, Record};
use crate::segment::{segment_path, sync_dir, SegmentId, SegmentReader, SegmentWriter};

use super::Manifest;

/// Arena plus the manifest value describing it
struct SegmentSet {
    manifest: Manifest,
    readers: HashMap<SegmentId, Arc<SegmentReader>>,
}

/// Manages the segment files of one tablespace
///
/// ## Concurrency:
/// - `segments`: RwLock; readers clone an `Arc<SegmentReader>` and release
///   the lock before touching the file
/// - `next_segment_id`: atomic counter shared by rotation and compaction
/// - Manifest changes are made by callers holding the engine's writer lock
pub struct SegmentStore {
    dir: PathBuf,
    tablespace: String,
    threshold: u64,
    fsync_policy: FsyncPolicy,
    segments: RwLock<SegmentSet>,
    next_segment_id: AtomicU64,
}

impl SegmentStore {
    /// Build a store over an already validated manifest, opening every segment
    pub fn from_manifest(config: &Config, manifest: Manifest) -> Result<Self> {
        let mut readers = HashMap::new();
        for id in manifest.segment_ids() {
            let path = segment_path(&config.data_dir, &config.tablespace, id);
            readers.insert(id, Arc::new(SegmentReader::open(&path, id)?));
        }

        let next_id = manifest.next_segment_id;
        Ok(Self {
            dir: config.data_dir.clone(),
            tablespace: config.tablespace.clone(),
            threshold: config.segment_size_threshold,
            fsync_policy: config.fsync_policy,
            segments: RwLock::new(SegmentSet { manifest, readers }),
            next_segment_id: AtomicU64::new(next_id),
        })
    }

    /// Create a brand new store with one empty active segment
    pub fn initialize(config: &Config, first_id: SegmentId) -> Result<Self> {
        let path = segment_path(&config.data_dir, &config.tablespace, first_id);
        SegmentWriter::create(&path, first_id, config.fsync_policy)?;
        sync_dir(&config.data_dir)?;

        let manifest = Manifest::new(first_id);
        manifest.store(&config.data_dir)?;
        tracing::info!("Initialized empty store with active segment {}", first_id);

        Self::from_manifest(config, manifest)
    }

    /// Open the append handle for the active segment
    pub fn open_active_writer(&self) -> Result<SegmentWriter> {
        let id = self.active_id();
        SegmentWriter::open(&self.segment_path(id), id, self.fsync_policy)
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Encode and append a record to the active segment
    ///
    /// Returns `(offset, frame_len)` of the record.
    pub fn append(&self, writer: &mut SegmentWriter, record: &Record) -> Result<(u64, u32)> {
        let frame = record::encode(record)?;
        let offset = writer.append(&frame)?;
        Ok((offset, frame.len() as u32))
    }

    /// Close the active segment and open the next one once it is full
    ///
    /// Ordering: fsync old active → create + fsync new file → publish manifest
    /// → swap the writer → fsync the directory. A failure before the publish
    /// removes the new file. Once the manifest is published the rotation is
    /// kept in memory too, and only the error is reported.
    pub fn rotate_if_needed(&self, writer: &mut SegmentWriter) -> Result<bool> {
        if writer.size() < self.threshold {
            return Ok(false);
        }

        writer.sync()?;

        let new_id = self.allocate_segment_id();
        let new_path = self.segment_path(new_id);
        let new_writer = SegmentWriter::create(&new_path, new_id, self.fsync_policy)?;

        let rotated = self
            .manifest()
            .rotated(new_id, self.next_segment_id.load(Ordering::SeqCst));
        let prepared = sync_dir(&self.dir)
            .and_then(|()| SegmentReader::open(&new_path, new_id))
            .and_then(|reader| rotated.publish(&self.dir).map(|()| reader));
        let reader = match prepared {
            Ok(reader) => Arc::new(reader),
            Err(e) => {
                drop(new_writer);
                if let Err(rm) = fs::remove_file(&new_path) {
                    tracing::warn!("Failed to remove unused segment {}: {}", new_id, rm);
                }
                return Err(e);
            }
        };

        {
            let mut segments = self.segments.write();
            segments.manifest = rotated;
            segments.readers.insert(new_id, reader);
        }

        tracing::debug!(
            "Rotated segment {} ({} bytes) → new active segment {}",
            writer.id(),
            writer.size(),
            new_id
        );
        *writer = new_writer;

        sync_dir(&self.dir)?;
        Ok(true)
    }

    // =========================================================================
    // Compaction Support
    // =========================================================================

    /// Create an output segment for compaction
    ///
    /// Output is fsynced once at the end, so no per-write policy applies.
    pub fn create_output_segment(&self) -> Result<SegmentWriter> {
        let id = self.allocate_segment_id();
        SegmentWriter::create(
            &self.segment_path(id),
            id,
            FsyncPolicy::EveryNWrites { count: usize::MAX },
        )
    }

    /// Swap compaction output in for its inputs in the manifest
    ///
    /// On error the old manifest is still live and the outputs are deleted.
    /// On success the new manifest is published and adopted; the caller
    /// fsyncs the directory. Inputs stay in the arena until `retire` so
    /// lookups racing the index patch still resolve.
    pub fn install_compaction(&self, inputs: &[SegmentId], outputs: &[SegmentId]) -> Result<()> {
        let (compacted, opened) = match self.publish_compaction(inputs, outputs) {
            Ok(published) => published,
            Err(e) => {
                for &id in outputs {
                    if let Err(rm) = fs::remove_file(self.segment_path(id)) {
                        tracing::warn!("Failed to remove compaction output {}: {}", id, rm);
                    }
                }
                return Err(e);
            }
        };

        let mut segments = self.segments.write();
        segments.manifest = compacted;
        for reader in opened {
            segments.readers.insert(reader.id(), reader);
        }
        Ok(())
    }

    fn publish_compaction(
        &self,
        inputs: &[SegmentId],
        outputs: &[SegmentId],
    ) -> Result<(Manifest, Vec<Arc<SegmentReader>>)> {
        let mut opened = Vec::with_capacity(outputs.len());
        for &id in outputs {
            opened.push(Arc::new(SegmentReader::open(&self.segment_path(id), id)?));
        }

        let compacted = self.manifest().compacted(
            inputs,
            outputs,
            self.next_segment_id.load(Ordering::SeqCst),
        )?;
        compacted.publish(&self.dir)?;
        Ok((compacted, opened))
    }

    /// Drop segments that are no longer in the manifest
    ///
    /// Files are removed once the last in-flight reader lets go.
    pub fn retire(&self, ids: &[SegmentId]) {
        let mut segments = self.segments.write();
        for id in ids {
            if segments.manifest.contains(*id) {
                continue;
            }
            if let Some(reader) = segments.readers.remove(id) {
                reader.mark_obsolete();
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Snapshot of the current manifest
    pub fn manifest(&self) -> Manifest {
        self.segments.read().manifest.clone()
    }

    pub fn reader(&self, id: SegmentId) -> Option<Arc<SegmentReader>> {
        self.segments.read().readers.get(&id).cloned()
    }

    /// Closed segment handles, oldest first
    pub fn closed_readers(&self) -> Vec<Arc<SegmentReader>> {
        let segments = self.segments.read();
        segments
            .manifest
            .closed
            .iter()
            .filter_map(|id| segments.readers.get(id).cloned())
            .collect()
    }

    pub fn active_id(&self) -> SegmentId {
        self.segments.read().manifest.active
    }

    pub fn closed_segment_ids(&self) -> Vec<SegmentId> {
        self.segments.read().manifest.closed.clone()
    }

    /// Closed plus active
    pub fn segment_count(&self) -> usize {
        self.segments.read().manifest.closed.len() + 1
    }

    /// Total bytes held by closed segments
    pub fn closed_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for reader in self.closed_readers() {
            total += reader.len()?;
        }
        Ok(total)
    }

    /// Hand out the next segment id
    pub fn allocate_segment_id(&self) -> SegmentId {
        self.next_segment_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn segment_path(&self, id: SegmentId) -> PathBuf {
        segment_path(&self.dir, &self.tablespace, id)
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}
