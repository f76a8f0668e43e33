//! Engine Module
//!
//! The storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Recover the store and rebuild the index on open
//! - Serialize writes through one writer lock
//! - Serve reads concurrently from the index and segment handles
//! - Run compaction on demand or from the background worker

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::compaction::{CompactionOutcome, CompactionPlan, CompactionWorker, Compactor, Selection};
use crate::config::{CompactionTrigger, Config};
use crate::error::{EmberError, Result};
use crate::index::{IndexEntry, KeyIndex};
use crate::protocol::Command;
use crate::record::Record;
use crate::recovery::{self, RecoveryReport};
use crate::segment::{SegmentId, SegmentWriter};
use crate::store::SegmentStore;

/// How often a lookup retries after its segment was compacted away
const MAX_READ_RETRIES: usize = 16;

/// State guarded by the writer lock
struct WriterState {
    /// Append handle for the active segment
    segment: SegmentWriter,

    /// Sequence number for the next record
    next_seq: u64,

    /// Set after an I/O failure; writes are refused until resumed
    halted: Option<String>,
}

impl WriterState {
    fn check_writable(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(EmberError::WritesHalted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Record an I/O failure and stop accepting writes
    fn halt_on_io(&mut self, err: EmberError) -> EmberError {
        if matches!(err, EmberError::Io(_)) {
            tracing::error!(
                "Write to segment {} failed, halting writes: {}",
                self.segment.id(),
                err
            );
            self.halted = Some(err.to_string());
        }
        err
    }

    /// Make every acknowledged append durable
    fn sync_active(&mut self) -> Result<()> {
        if !self.segment.has_unsynced_writes() {
            return Ok(());
        }
        let synced = self.segment.sync();
        synced.map_err(|e| self.halt_on_io(e))
    }
}

/// Shared between the engine handle and the compaction worker
struct EngineInner {
    config: Config,
    store: SegmentStore,
    index: KeyIndex,
    writer: Mutex<WriterState>,
    /// Only one compaction cycle at a time
    compaction: Mutex<()>,
    recovery: RecoveryReport,
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (set/delete/rotation/compaction swap): serialized by the
///   writer lock, so sequence order is the order writes happen
///   - Must acquire: writer → segment append → index (write) → store
///
/// - **Reads** (get): never take the writer lock
///   - Index lookup under its read lock
///   - Segment handle cloned out of the arena, then a positional read
///
/// - **Compaction**: scan and merge-write run alongside reads and writes;
///   selecting survivors and the swap take the writer lock
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Option<CompactionWorker>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config and create the data directory
    /// 2. Recover segments and rebuild the index
    /// 3. Start the compaction worker unless compaction is manual
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let index = KeyIndex::new();
        let recovered = recovery::recover(&config, &index)?;

        let inner = Arc::new(EngineInner {
            store: recovered.store,
            index,
            writer: Mutex::new(WriterState {
                segment: recovered.writer,
                next_seq: recovered.next_seq,
                halted: None,
            }),
            compaction: Mutex::new(()),
            recovery: recovered.report,
            config,
        });

        let worker = match inner.config.compaction_trigger {
            CompactionTrigger::Manual => None,
            _ => {
                let shared = Arc::clone(&inner);
                let worker = CompactionWorker::spawn(inner.config.compaction_interval(), move || {
                    shared.compact_if_triggered()
                })?;
                // Pick up a backlog left by the previous run
                worker.notify();
                Some(worker)
            }
        };

        tracing::info!(
            "Engine opened at {} ({} keys, {} segments)",
            inner.config.data_dir.display(),
            inner.index.len(),
            inner.store.segment_count()
        );

        Ok(Self { inner, worker })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Execute a command
    ///
    /// Routes commands to appropriate handlers
    pub fn execute(&self, command: Command) -> Result<Option<Vec<u8>>> {
        match command {
            Command::Get { key } => self.get(&key),
            Command::Set { key, value } => {
                self.set(&key, &value)?;
                Ok(None)
            }
            Command::Delete { key } => {
                self.delete(&key)?;
                Ok(None)
            }
            Command::Compact => match self.compact()? {
                CompactionOutcome::NothingToDo => Ok(Some(b"NOTHING_TO_DO".to_vec())),
                CompactionOutcome::Compacted(stats) => Ok(Some(
                    format!(
                        "COMPACTED {} -> {} segments, {} records kept",
                        stats.inputs.len(),
                        stats.outputs.len(),
                        stats.records_kept
                    )
                    .into_bytes(),
                )),
            },
            Command::Ping => Ok(Some(b"PONG".to_vec())),
        }
    }

    /// Get the newest value for a key
    ///
    /// `Ok(None)` when the key was never set or was deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut last_miss = None;
        for _ in 0..MAX_READ_RETRIES {
            let Some(entry) = self.inner.index.get(key) else {
                return Ok(None);
            };

            // Compaction retired the segment after our index lookup; the
            // index has been patched by now
            let Some(reader) = self.inner.store.reader(entry.segment_id) else {
                last_miss = Some(entry);
                std::thread::yield_now();
                continue;
            };

            let record = reader.read_record(entry.offset, entry.len)?;
            if record.key != key || record.seq != entry.seq {
                return Err(EmberError::InvalidOffset {
                    segment: entry.segment_id,
                    offset: entry.offset,
                });
            }
            return Ok(record.value);
        }

        let (segment, offset) = last_miss.map_or((0, 0), |e| (e.segment_id, e.offset));
        Err(EmberError::InvalidOffset { segment, offset })
    }

    /// Set a key to a value
    ///
    /// Steps:
    /// 1. Acquire writer lock
    /// 2. Append the record (fsync per policy)
    /// 3. Point the index at it
    /// 4. Rotate the active segment if it is full
    ///
    /// Once step 3 is done the write is acknowledged. A failed rotation
    /// halts later writes but still returns `Ok`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let rotated = {
            let mut writer = self.inner.writer.lock();
            writer.check_writable()?;

            let seq = writer.next_seq;
            let record = Record::put(seq, key, value);
            let location = self.inner.store.append(&mut writer.segment, &record);
            let (offset, len) = location.map_err(|e| writer.halt_on_io(e))?;
            writer.next_seq += 1;

            self.inner.index.put(
                key.to_vec(),
                IndexEntry {
                    segment_id: writer.segment.id(),
                    offset,
                    len,
                    seq,
                },
            );

            self.rotate_locked(&mut writer)
        };

        if rotated {
            self.notify_worker();
        }
        Ok(())
    }

    /// Delete a key
    ///
    /// Deleting a key that has no live value writes nothing. Rotation
    /// failures are handled as in `set`.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let rotated = {
            let mut writer = self.inner.writer.lock();
            writer.check_writable()?;

            if !self.inner.index.contains(key) {
                return Ok(());
            }

            let record = Record::tombstone(writer.next_seq, key);
            let appended = self.inner.store.append(&mut writer.segment, &record);
            appended.map_err(|e| writer.halt_on_io(e))?;
            writer.next_seq += 1;

            self.inner.index.delete(key);

            self.rotate_locked(&mut writer)
        };

        if rotated {
            self.notify_worker();
        }
        Ok(())
    }

    /// Run one compaction cycle
    ///
    /// Tries runs of closed segments oldest first and merges the first one
    /// that would reclaim space.
    pub fn compact(&self) -> Result<CompactionOutcome> {
        self.inner.run_compaction(|c| c.windows())
    }

    /// Compact `count` closed segments starting at position `start`
    ///
    /// Position 0 is the oldest closed segment. Tombstones are only dropped
    /// when the range starts there.
    pub fn compact_range(&self, start: usize, count: usize) -> Result<CompactionOutcome> {
        self.inner
            .run_compaction(|c| c.plan_range(start, count).into_iter().collect())
    }

    /// Clear a write halt
    ///
    /// Truncates the active segment to its last acknowledged length and
    /// fsyncs it. The halt stays in place if that fails.
    pub fn resume_writes(&self) -> Result<()> {
        let mut writer = self.inner.writer.lock();
        if writer.halted.is_none() {
            return Ok(());
        }

        let acked = writer.segment.size();
        writer.segment.truncate(acked)?;
        writer.halted = None;
        tracing::warn!(
            "Writes resumed on segment {} at {} bytes",
            writer.segment.id(),
            acked
        );
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Stops the compaction worker and syncs the active segment
    pub fn close(mut self) -> Result<()> {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }

        let mut writer = self.inner.writer.lock();
        writer.segment.sync()?;
        tracing::info!(
            "Engine closed (active segment {}, next seq {})",
            writer.segment.id(),
            writer.next_seq
        );
        Ok(())
    }

    /// Rotate after an acknowledged append; failure halts writes
    fn rotate_locked(&self, writer: &mut WriterState) -> bool {
        match self.inner.store.rotate_if_needed(&mut writer.segment) {
            Ok(rotated) => rotated,
            Err(e) => {
                tracing::error!(
                    "Rotating segment {} failed, halting writes: {}",
                    writer.segment.id(),
                    e
                );
                writer.halted = Some(format!("rotation failed: {}", e));
                false
            }
        }
    }

    fn notify_worker(&self) {
        if let Some(worker) = &self.worker {
            worker.notify();
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Closed plus active segments
    pub fn segment_count(&self) -> usize {
        self.inner.store.segment_count()
    }

    /// Closed segment ids in manifest order
    pub fn closed_segment_ids(&self) -> Vec<SegmentId> {
        self.inner.store.closed_segment_ids()
    }

    pub fn active_segment_id(&self) -> SegmentId {
        self.inner.store.active_id()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.inner.index.len()
    }

    pub fn is_write_halted(&self) -> bool {
        self.inner.writer.lock().halted.is_some()
    }

    /// Acknowledged bytes of the active segment not yet fsynced
    pub fn unsynced_bytes(&self) -> u64 {
        self.inner.writer.lock().segment.unsynced_bytes()
    }

    /// What recovery found when this engine was opened
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.inner.recovery
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl EngineInner {
    /// Try each plan in turn and install the first one worth merging
    fn run_compaction<P>(&self, plans: P) -> Result<CompactionOutcome>
    where
        P: FnOnce(&Compactor<'_>) -> Vec<CompactionPlan>,
    {
        let _cycle = self.compaction.lock();
        let compactor = Compactor::new(&self.store, &self.index, self.config.max_compaction_inputs);

        for plan in plans(&compactor) {
            let scanned = compactor.scan(plan)?;

            let selection = {
                let mut writer = self.writer.lock();
                writer.sync_active().map_err(|e| {
                    EmberError::Compaction(format!("could not sync active segment: {}", e))
                })?;
                compactor.select(scanned)
            };
            let survivors = match selection {
                Selection::NothingToDo => continue,
                Selection::Ready(survivors) => survivors,
            };

            let merged = compactor.write(survivors)?;

            let _writer = self.writer.lock();
            let stats = compactor
                .install(merged)
                .map_err(|e| EmberError::Compaction(format!("swap failed: {}", e)))?;
            return Ok(CompactionOutcome::Compacted(stats));
        }
        Ok(CompactionOutcome::NothingToDo)
    }

    /// Background check: compact when the trigger is met
    fn compact_if_triggered(&self) {
        let closed = self.store.closed_segment_ids().len();
        let closed_bytes = match self.store.closed_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Could not size closed segments: {}", e);
                return;
            }
        };
        if !self.config.compaction_trigger.is_met(closed, closed_bytes) {
            return;
        }

        tracing::debug!(
            "Compaction trigger met ({} closed segments, {} bytes)",
            closed,
            closed_bytes
        );
        if let Err(e) = self.run_compaction(|c| c.windows()) {
            tracing::warn!("Background compaction failed: {}", e);
        }
    }
}
