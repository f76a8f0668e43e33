//! Compaction Module
//!
//! Merges a contiguous run of closed segments into fewer segments, dropping
//! superseded records and tombstones that no longer shadow anything.
//!
//! ## Phases
//! ```text
//!  plan ──► scan ──► select ──────────────► write ──► install
//!                    (writer lock held:               (writer lock held)
//!                     active segment fsynced,          ├─ publish manifest
//!                     index consulted)                 ├─ patch index for moved keys
//!                                                      ├─ retire inputs
//!                                                      └─ fsync directory
//! ```
//!
//! Select only trusts a newer record once it is on stable storage, so a
//! crash can never bring back a value an input record superseded.
//! A failure before install leaves the manifest and index untouched and
//! removes any output written so far.

mod worker;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{EmberError, Result};
use crate::index::KeyIndex;
use crate::record;
use crate::segment::{sync_dir, SegmentId, SegmentReader, SegmentWriter};
use crate::store::SegmentStore;

pub use worker::CompactionWorker;

/// Result of one compaction cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// No closed segments to merge, or merging would reclaim nothing
    NothingToDo,
    Compacted(CompactionStats),
}

/// Counters for a finished cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub inputs: Vec<SegmentId>,
    pub outputs: Vec<SegmentId>,
    pub records_scanned: u64,
    pub records_kept: u64,
    pub tombstones_dropped: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// Index entries moved to output segments
    pub keys_moved: usize,
}

/// Which closed segments a cycle merges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPlan {
    /// Contiguous run of closed ids, in manifest order
    pub inputs: Vec<SegmentId>,
    /// No closed segment is older than the first input
    pub starts_at_oldest: bool,
}

/// Output that is durable on disk but not yet referenced by the manifest
#[derive(Debug)]
pub struct MergedOutput {
    plan: CompactionPlan,
    outputs: Vec<SegmentId>,
    /// (key, seq, new segment, new offset) for each live record copied
    moves: Vec<(Vec<u8>, u64, SegmentId, u64)>,
    stats: CompactionStats,
}

/// Inputs read into memory, newest record per key
pub struct ScannedInputs {
    plan: CompactionPlan,
    inputs: Vec<Arc<SegmentReader>>,
    latest: HashMap<Vec<u8>, Candidate>,
    stats: CompactionStats,
}

/// Records chosen to survive a cycle
pub struct Survivors {
    plan: CompactionPlan,
    inputs: Vec<Arc<SegmentReader>>,
    records: Vec<(Vec<u8>, Candidate)>,
    stats: CompactionStats,
}

/// What the select phase decided
pub enum Selection {
    NothingToDo,
    Ready(Survivors),
}

/// Newest copy of a key inside the inputs
struct Candidate {
    input: usize,
    offset: u64,
    len: u32,
    seq: u64,
    tombstone: bool,
}

/// Runs compaction cycles against a store and its index
pub struct Compactor<'a> {
    store: &'a SegmentStore,
    index: &'a KeyIndex,
    max_inputs: usize,
}

impl<'a> Compactor<'a> {
    pub fn new(store: &'a SegmentStore, index: &'a KeyIndex, max_inputs: usize) -> Self {
        Self {
            store,
            index,
            max_inputs: max_inputs.max(1),
        }
    }

    /// Closed segments cut into runs of at most the input limit, oldest first
    pub fn windows(&self) -> Vec<CompactionPlan> {
        self.store
            .closed_segment_ids()
            .chunks(self.max_inputs)
            .enumerate()
            .map(|(i, run)| CompactionPlan {
                inputs: run.to_vec(),
                starts_at_oldest: i == 0,
            })
            .collect()
    }

    /// `count` closed segments starting at position `start` (0 = oldest)
    pub fn plan_range(&self, start: usize, count: usize) -> Option<CompactionPlan> {
        let closed = self.store.closed_segment_ids();
        if start >= closed.len() || count == 0 {
            return None;
        }
        let end = start.saturating_add(count).min(closed.len());
        Some(CompactionPlan {
            inputs: closed[start..end].to_vec(),
            starts_at_oldest: start == 0,
        })
    }

    /// Read every input and keep the newest record per key
    ///
    /// Runs without the writer lock. Errors come back as `Compaction`.
    pub fn scan(&self, plan: CompactionPlan) -> Result<ScannedInputs> {
        let inputs = plan
            .inputs
            .iter()
            .map(|&id| {
                self.store.reader(id).ok_or_else(|| {
                    EmberError::Compaction(format!("segment {} vanished before the scan", id))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stats = CompactionStats {
            inputs: plan.inputs.clone(),
            ..Default::default()
        };
        let latest = scan_latest(&inputs, &mut stats)
            .map_err(|e| EmberError::Compaction(format!("scan failed: {}", e)))?;

        Ok(ScannedInputs {
            plan,
            inputs,
            latest,
            stats,
        })
    }

    /// Decide which scanned records survive
    ///
    /// Must be called with the writer lock held and the active segment
    /// fsynced: a record is only dropped for a newer one that is durable.
    pub fn select(&self, scanned: ScannedInputs) -> Selection {
        let ScannedInputs {
            plan,
            inputs,
            latest,
            mut stats,
        } = scanned;

        let mut records = Vec::with_capacity(latest.len());
        for (key, candidate) in latest {
            let keep = if candidate.tombstone {
                // Still shadowing an older segment outside the inputs?
                let superseded = self.index.contains(&key);
                let shadows_older = !plan.starts_at_oldest;
                if !superseded && shadows_older {
                    true
                } else {
                    stats.tombstones_dropped += 1;
                    false
                }
            } else {
                self.index.get(&key).map_or(false, |e| e.seq == candidate.seq)
            };
            if keep {
                records.push((key, candidate));
            }
        }
        // Keep log order so the output reads like the input
        records.sort_by_key(|(_, c)| (c.input, c.offset));

        stats.records_kept = records.len() as u64;
        if stats.records_kept == stats.records_scanned {
            let repacked = estimate_segments(
                records.iter().map(|(_, c)| c.len as u64),
                self.store.threshold(),
            );
            if repacked >= inputs.len() {
                tracing::debug!(
                    "Compaction of {:?} would reclaim nothing; skipping",
                    plan.inputs
                );
                return Selection::NothingToDo;
            }
        }

        Selection::Ready(Survivors {
            plan,
            inputs,
            records,
            stats,
        })
    }

    /// Write the survivors into new output segments
    ///
    /// Runs without the writer lock. On error every output written so far is
    /// removed and the error comes back as `Compaction`.
    pub fn write(&self, survivors: Survivors) -> Result<MergedOutput> {
        let Survivors {
            plan,
            inputs,
            records,
            mut stats,
        } = survivors;

        let mut written = Vec::new();
        match self.write_output(&inputs, records, &mut written, &mut stats) {
            Ok(moves) => Ok(MergedOutput {
                plan,
                outputs: written.iter().map(|(id, _)| *id).collect(),
                moves,
                stats,
            }),
            Err(e) => {
                for (id, path) in written {
                    if let Err(rm) = fs::remove_file(&path) {
                        tracing::warn!("Failed to remove partial output segment {}: {}", id, rm);
                    }
                }
                Err(EmberError::Compaction(format!("merge-write failed: {}", e)))
            }
        }
    }

    /// Copy surviving frames into new segments, fsyncing each
    fn write_output(
        &self,
        inputs: &[Arc<SegmentReader>],
        survivors: Vec<(Vec<u8>, Candidate)>,
        written: &mut Vec<(SegmentId, PathBuf)>,
        stats: &mut CompactionStats,
    ) -> Result<Vec<(Vec<u8>, u64, SegmentId, u64)>> {
        let threshold = self.store.threshold();
        let mut moves = Vec::with_capacity(survivors.len());
        let mut current: Option<SegmentWriter> = None;

        for (key, candidate) in survivors {
            let reader = &inputs[candidate.input];
            let frame = reader.read_frame(candidate.offset, candidate.len)?;
            let (record, _) = record::decode(&frame)
                .map_err(|e| record::locate(e, reader.id(), candidate.offset))?;
            if record.key != key || record.seq != candidate.seq {
                return Err(EmberError::InvalidOffset {
                    segment: reader.id(),
                    offset: candidate.offset,
                });
            }

            let full = current
                .as_ref()
                .map_or(false, |w| w.size() > 0 && w.size() + frame.len() as u64 > threshold);
            if full {
                if let Some(mut done) = current.take() {
                    done.sync()?;
                    stats.bytes_after += done.size();
                }
            }

            let writer = match current.take() {
                Some(writer) => writer,
                None => {
                    let writer = self.store.create_output_segment()?;
                    written.push((writer.id(), writer.path().to_path_buf()));
                    writer
                }
            };
            let writer = current.insert(writer);

            let offset = writer.append(&frame)?;
            if !candidate.tombstone {
                moves.push((key, candidate.seq, writer.id(), offset));
            }
        }

        if let Some(mut done) = current.take() {
            done.sync()?;
            stats.bytes_after += done.size();
        }
        sync_dir(self.store.data_dir())?;

        stats.outputs = written.iter().map(|(id, _)| *id).collect();
        Ok(moves)
    }

    /// Swap merged output into the store and patch the index
    ///
    /// Must be called with the engine's writer lock held.
    pub fn install(&self, merged: MergedOutput) -> Result<CompactionStats> {
        let MergedOutput {
            plan,
            outputs,
            moves,
            mut stats,
        } = merged;

        self.store.install_compaction(&plan.inputs, &outputs)?;

        stats.keys_moved = self.index.patch_many(
            moves
                .iter()
                .map(|(key, seq, segment, offset)| (key.as_slice(), *seq, *segment, *offset)),
        );

        self.store.retire(&plan.inputs);
        sync_dir(self.store.data_dir())?;

        tracing::info!(
            "Compacted segments {:?} → {:?}: {} of {} records kept, {} tombstones dropped, {} → {} bytes",
            stats.inputs,
            stats.outputs,
            stats.records_kept,
            stats.records_scanned,
            stats.tombstones_dropped,
            stats.bytes_before,
            stats.bytes_after
        );
        Ok(stats)
    }
}

/// Newest record per key across the inputs
fn scan_latest(
    inputs: &[Arc<SegmentReader>],
    stats: &mut CompactionStats,
) -> Result<HashMap<Vec<u8>, Candidate>> {
    let mut latest: HashMap<Vec<u8>, Candidate> = HashMap::new();
    for (input, reader) in inputs.iter().enumerate() {
        for entry in reader.iter()? {
            let entry = entry?;
            stats.records_scanned += 1;
            stats.bytes_before += entry.len as u64;

            let newer = latest
                .get(&entry.record.key)
                .map_or(true, |c| c.seq < entry.record.seq);
            if newer {
                let tombstone = entry.record.is_tombstone();
                latest.insert(
                    entry.record.key,
                    Candidate {
                        input,
                        offset: entry.offset,
                        len: entry.len,
                        seq: entry.record.seq,
                        tombstone,
                    },
                );
            }
        }
    }
    Ok(latest)
}

/// Segments needed to hold frames of these sizes under `threshold`
fn estimate_segments(frame_lens: impl Iterator<Item = u64>, threshold: u64) -> usize {
    let mut segments = 0;
    let mut size = 0u64;
    for len in frame_lens {
        if segments == 0 || (size > 0 && size + len > threshold) {
            segments += 1;
            size = 0;
        }
        size += len;
    }
    segments
}
