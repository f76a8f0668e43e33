//! Recovery
//!
//! Rebuilds the index from the segments named by the manifest.
//!
//! ## Steps
//! 1. Load the manifest (or adopt / initialize when it is missing)
//! 2. Delete orphan segment files the manifest does not reference
//! 3. Replay closed segments in manifest order, then the active segment
//! 4. Truncate a torn tail of the active segment to the last whole record

use std::collections::HashMap;
use std::fs;

use crate::config::Config;
use crate::error::{EmberError, Result};
use crate::index::{IndexEntry, KeyIndex};
use crate::segment::{
    discover_segments, segment_path, SegmentEntry, SegmentId, SegmentReader, SegmentWriter,
};
use crate::store::{Manifest, SegmentStore, MANIFEST_TEMP_FILENAME};

/// Summary of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Segments scanned (closed + active)
    pub segments_replayed: usize,

    /// Records applied or skipped as superseded
    pub records_replayed: u64,

    /// Tombstones among them
    pub tombstones_replayed: u64,

    /// Highest sequence number seen (0 for an empty store)
    pub max_seq: u64,

    /// Bytes cut from the active segment's tail
    pub truncated_bytes: u64,

    /// Unreferenced segment files deleted
    pub orphans_removed: usize,

    /// Whether the store was created by this open
    pub created: bool,
}

/// Everything the engine needs after recovery
pub struct Recovered {
    pub store: SegmentStore,
    pub writer: SegmentWriter,
    pub next_seq: u64,
    pub report: RecoveryReport,
}

/// Replays segments into a `KeyIndex`
pub struct RecoveryLoader<'a> {
    config: &'a Config,
    index: &'a KeyIndex,
    /// Newest tombstone seen per key, so an older put cannot resurrect it
    deleted: HashMap<Vec<u8>, u64>,
    report: RecoveryReport,
}

impl<'a> RecoveryLoader<'a> {
    pub fn new(config: &'a Config, index: &'a KeyIndex) -> Self {
        Self {
            config,
            index,
            deleted: HashMap::new(),
            report: RecoveryReport::default(),
        }
    }

    /// Open the store in `config.data_dir`, filling the index
    pub fn recover(mut self) -> Result<Recovered> {
        let config = self.config;
        let dir = &config.data_dir;
        fs::create_dir_all(dir)?;

        let temp = dir.join(MANIFEST_TEMP_FILENAME);
        if temp.exists() {
            tracing::warn!("Removing stale {}", temp.display());
            fs::remove_file(&temp)?;
        }

        let on_disk = discover_segments(dir, &config.tablespace)?;

        let store = match Manifest::load(dir)? {
            Some(manifest) => {
                self.remove_orphans(&manifest, &on_disk)?;
                let reconciled = self.reconcile_next_id(manifest.clone(), &on_disk);
                if reconciled != manifest {
                    reconciled.store(dir)?;
                }
                SegmentStore::from_manifest(config, reconciled)?
            }
            None => self.bootstrap(&on_disk)?,
        };

        for reader in store.closed_readers() {
            self.replay_closed(&reader)?;
        }

        let active = store
            .reader(store.active_id())
            .ok_or_else(|| EmberError::Manifest("active segment has no handle".to_string()))?;
        let mut writer = store.open_active_writer()?;
        self.replay_active(&active, &mut writer)?;

        let report = self.report;
        tracing::info!(
            "Recovery: {} segments, {} records ({} tombstones), {} live keys, max_seq={}, truncated {} bytes",
            report.segments_replayed,
            report.records_replayed,
            report.tombstones_replayed,
            self.index.len(),
            report.max_seq,
            report.truncated_bytes
        );

        Ok(Recovered {
            store,
            writer,
            next_seq: report.max_seq + 1,
            report,
        })
    }

    /// No manifest: adopt existing non-empty segments, or start fresh
    fn bootstrap(&mut self, on_disk: &[SegmentId]) -> Result<SegmentStore> {
        let config = self.config;
        let dir = &config.data_dir;
        let mut adopt = Vec::new();
        for &id in on_disk {
            let path = segment_path(dir, &config.tablespace, id);
            if fs::metadata(&path)?.len() > 0 {
                adopt.push(id);
            } else {
                fs::remove_file(&path)?;
            }
        }

        let next_id = on_disk.last().map_or(0, |id| id + 1);

        match adopt.split_last() {
            None => {
                self.report.created = true;
                SegmentStore::initialize(config, next_id)
            }
            Some((&active, closed)) => {
                tracing::warn!(
                    "No manifest found; adopting {} existing segment(s) with {} active",
                    adopt.len(),
                    active
                );
                let manifest = Manifest {
                    closed: closed.to_vec(),
                    active,
                    next_segment_id: next_id,
                };
                manifest.store(dir)?;
                SegmentStore::from_manifest(config, manifest)
            }
        }
    }

    /// Delete files left by a rotation or compaction that never reached the
    /// manifest; fail if the manifest names a file that is gone
    fn remove_orphans(&mut self, manifest: &Manifest, on_disk: &[SegmentId]) -> Result<()> {
        for id in manifest.segment_ids() {
            if on_disk.binary_search(&id).is_err() {
                return Err(EmberError::Manifest(format!(
                    "segment {} is listed in the manifest but missing on disk",
                    id
                )));
            }
        }

        for &id in on_disk {
            if manifest.contains(id) {
                continue;
            }
            let path = segment_path(&self.config.data_dir, &self.config.tablespace, id);
            tracing::warn!("Removing orphan segment {}", path.display());
            fs::remove_file(&path)?;
            self.report.orphans_removed += 1;
        }
        Ok(())
    }

    /// Never hand out an id that already has a file
    fn reconcile_next_id(&self, mut manifest: Manifest, on_disk: &[SegmentId]) -> Manifest {
        if let Some(&highest) = on_disk.last() {
            manifest.next_segment_id = manifest.next_segment_id.max(highest + 1);
        }
        manifest
    }

    /// Any bad frame in a closed segment is fatal
    fn replay_closed(&mut self, reader: &SegmentReader) -> Result<()> {
        self.report.segments_replayed += 1;
        for entry in reader.iter()? {
            self.apply(reader.id(), entry?);
        }
        Ok(())
    }

    /// A bad frame in the active segment ends the log there
    fn replay_active(&mut self, reader: &SegmentReader, writer: &mut SegmentWriter) -> Result<()> {
        self.report.segments_replayed += 1;
        let mut iter = reader.iter()?;

        let mut torn = None;
        for entry in iter.by_ref() {
            match entry {
                Ok(entry) => self.apply(reader.id(), entry),
                Err(e) if e.is_corruption() => {
                    torn = Some(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(cause) = torn {
            let valid_len = iter.valid_len();
            let cut = iter.file_len() - valid_len;
            tracing::warn!(
                "Active segment {} has a torn tail ({}); truncating {} bytes at offset {}",
                reader.id(),
                cause,
                cut,
                valid_len
            );
            writer.truncate(valid_len)?;
            self.report.truncated_bytes = cut;
        }
        Ok(())
    }

    /// Feed one record into the index, newest sequence number wins
    fn apply(&mut self, segment_id: SegmentId, entry: SegmentEntry) {
        let SegmentEntry { offset, len, record } = entry;

        self.report.records_replayed += 1;
        self.report.max_seq = self.report.max_seq.max(record.seq);
        if record.is_tombstone() {
            self.report.tombstones_replayed += 1;
        }

        if let Some(current) = self.index.get(&record.key) {
            if current.seq >= record.seq {
                return;
            }
        }
        if let Some(&deleted_at) = self.deleted.get(&record.key) {
            if deleted_at >= record.seq {
                return;
            }
        }

        if record.is_tombstone() {
            self.index.delete(&record.key);
            self.deleted.insert(record.key, record.seq);
        } else {
            self.deleted.remove(&record.key);
            self.index.put(
                record.key,
                IndexEntry {
                    segment_id,
                    offset,
                    len,
                    seq: record.seq,
                },
            );
        }
    }
}

/// Convenience wrapper: recover `config.data_dir` into `index`
pub fn recover(config: &Config, index: &KeyIndex) -> Result<Recovered> {
    RecoveryLoader::new(config, index).recover()
}
