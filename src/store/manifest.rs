//! Manifest
//!
//! The durable list of segments: closed ids oldest → newest plus the active
//! id. A manifest value is never edited on disk; a new one replaces it via
//! write-temp → fsync → rename → fsync(dir).
//!
//! ## File Format
//! ```text
//! ┌───────────┬─────────────┬──────────────┬───────────┬──────────────────┐
//! │ Magic (4) │ Version (2) │ BodyLen (4)  │ CRC32 (4) │ Body (bincode)   │
//! └───────────┴─────────────┴──────────────┴───────────┴──────────────────┘
//! ```

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EmberError, Result};
use crate::segment::{sync_dir, SegmentId};

/// Manifest file name inside the data directory
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Scratch name used while a new manifest is written
pub const MANIFEST_TEMP_FILENAME: &str = "MANIFEST.tmp";

const MAGIC: &[u8; 4] = b"EMKV";
const VERSION: u16 = 1;
const PREFIX_SIZE: usize = 14;

/// Ordered segment list plus the active pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Closed segments in truth order, oldest first
    pub closed: Vec<SegmentId>,
    /// The only segment accepting appends
    pub active: SegmentId,
    /// Lower bound for the next id handed out
    pub next_segment_id: SegmentId,
}

impl Manifest {
    /// A manifest with a single, empty active segment
    pub fn new(active: SegmentId) -> Self {
        Self {
            closed: Vec::new(),
            active,
            next_segment_id: active + 1,
        }
    }

    /// Every referenced segment in replay order (closed, then active)
    pub fn segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.closed.iter().copied().chain(std::iter::once(self.active))
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.active == id || self.closed.contains(&id)
    }

    /// The old active segment becomes the newest closed one
    pub fn rotated(&self, new_active: SegmentId, next_segment_id: SegmentId) -> Self {
        let mut closed = self.closed.clone();
        closed.push(self.active);
        Self {
            closed,
            active: new_active,
            next_segment_id: next_segment_id.max(new_active + 1),
        }
    }

    /// Replace a contiguous run of closed ids with compaction output, in place
    pub fn compacted(
        &self,
        inputs: &[SegmentId],
        outputs: &[SegmentId],
        next_segment_id: SegmentId,
    ) -> Result<Self> {
        let start = inputs
            .first()
            .and_then(|first| self.closed.iter().position(|id| id == first))
            .ok_or_else(|| {
                EmberError::Manifest(format!("compaction inputs {:?} are not closed segments", inputs))
            })?;
        let end = start + inputs.len();
        if end > self.closed.len() || self.closed[start..end] != *inputs {
            return Err(EmberError::Manifest(format!(
                "compaction inputs {:?} are not a contiguous run of {:?}",
                inputs, self.closed
            )));
        }

        let mut closed = Vec::with_capacity(self.closed.len() - inputs.len() + outputs.len());
        closed.extend_from_slice(&self.closed[..start]);
        closed.extend_from_slice(outputs);
        closed.extend_from_slice(&self.closed[end..]);

        let highest = outputs.iter().copied().max().unwrap_or(0);
        let manifest = Self {
            closed,
            active: self.active,
            next_segment_id: next_segment_id.max(self.next_segment_id).max(highest + 1),
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural checks: no duplicates, active not closed, ids below the cursor
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.closed.len() + 1);
        for id in self.segment_ids() {
            if !seen.insert(id) {
                return Err(EmberError::Manifest(format!("segment {} listed twice", id)));
            }
            if id >= self.next_segment_id {
                return Err(EmberError::Manifest(format!(
                    "segment {} is not below next_segment_id {}",
                    id, self.next_segment_id
                )));
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let mut bytes = Vec::with_capacity(PREFIX_SIZE + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PREFIX_SIZE {
            return Err(EmberError::Manifest(format!(
                "manifest too short: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(EmberError::Manifest(format!(
                "invalid manifest magic: expected EMKV, got {:?}",
                &bytes[0..4]
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(EmberError::Manifest(format!(
                "unsupported manifest version: {}",
                version
            )));
        }

        let body_len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let stored_crc = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        let body = &bytes[PREFIX_SIZE..];
        if body.len() != body_len {
            return Err(EmberError::Manifest(format!(
                "manifest body is {} bytes, header says {}",
                body.len(),
                body_len
            )));
        }
        if crc32fast::hash(body) != stored_crc {
            return Err(EmberError::Manifest("manifest checksum mismatch".to_string()));
        }

        let manifest: Manifest = bincode::deserialize(body)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load the manifest from `dir`; `None` for a new store
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = manifest_path(dir);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Self::decode(&bytes).map(Some)
    }

    /// Atomically replace the manifest in `dir` with this one
    pub fn store(&self, dir: &Path) -> Result<()> {
        self.publish(dir)?;
        sync_dir(dir)
    }

    /// Write the temp file, fsync it and rename it over the live manifest
    ///
    /// An error means the old manifest is still the live one. After `Ok` the
    /// next open reads this manifest; the caller still owes a directory fsync
    /// and must not undo anything this manifest references.
    pub fn publish(&self, dir: &Path) -> Result<()> {
        let bytes = self.encode()?;
        let temp_path = dir.join(MANIFEST_TEMP_FILENAME);

        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, manifest_path(dir))?;
        Ok(())
    }
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILENAME)
}
