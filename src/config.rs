//! Configuration for EmberKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EmberError, Result};

/// Main configuration for an EmberKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST                     (ordered segment list + active id)
    ///     └── {tablespace}_{id:010}.dblog  (one file per segment)
    pub data_dir: PathBuf,

    /// Prefix of every segment file name
    pub tablespace: String,

    /// Bytes the active segment may hold before it is rotated
    pub segment_size_threshold: u64,

    /// How often appends are fsynced
    pub fsync_policy: FsyncPolicy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// When the background worker compacts on its own
    pub compaction_trigger: CompactionTrigger,

    /// How often the background worker re-checks the trigger (milliseconds)
    pub compaction_interval_ms: u64,

    /// Upper bound on the closed segments merged in one cycle
    pub max_compaction_inputs: usize,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

/// Fsync policy for the active segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync once `count` unsynced writes have accumulated
    EveryNWrites { count: usize },

    /// fsync on the first write after `millis` have elapsed since the last sync
    Interval { millis: u64 },
}

/// Automatic compaction trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionTrigger {
    /// Only `Engine::compact()` compacts
    Manual,

    /// Compact once this many closed segments exist
    SegmentCount { closed_segments: usize },

    /// Compact once closed segments hold at least this many bytes
    ClosedBytes { bytes: u64 },
}

impl CompactionTrigger {
    /// Whether the trigger fires for the given closed-segment totals
    pub fn is_met(&self, closed_segments: usize, closed_bytes: u64) -> bool {
        match *self {
            CompactionTrigger::Manual => false,
            CompactionTrigger::SegmentCount { closed_segments: n } => closed_segments >= n,
            CompactionTrigger::ClosedBytes { bytes } => closed_segments > 0 && closed_bytes >= bytes,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./emberkv_data"),
            tablespace: "data".to_string(),
            segment_size_threshold: 4 * 1024 * 1024, // 4 MB
            fsync_policy: FsyncPolicy::EveryWrite,
            compaction_trigger: CompactionTrigger::SegmentCount { closed_segments: 8 },
            compaction_interval_ms: 30_000,
            max_compaction_inputs: 16,
            listen_addr: "127.0.0.1:7878".to_string(),
            max_connections: 1024,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let tablespace_ok = !self.tablespace.is_empty()
            && self
                .tablespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !tablespace_ok {
            return Err(EmberError::Config(format!(
                "tablespace must be non-empty [A-Za-z0-9_-], got {:?}",
                self.tablespace
            )));
        }
        if self.segment_size_threshold == 0 {
            return Err(EmberError::Config(
                "segment_size_threshold must be greater than 0".to_string(),
            ));
        }
        if self.max_compaction_inputs == 0 {
            return Err(EmberError::Config(
                "max_compaction_inputs must be greater than 0".to_string(),
            ));
        }
        match self.fsync_policy {
            FsyncPolicy::EveryNWrites { count: 0 } => Err(EmberError::Config(
                "fsync_policy EveryNWrites needs count > 0".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Background re-check period for the compaction trigger
    pub fn compaction_interval(&self) -> Duration {
        Duration::from_millis(self.compaction_interval_ms.max(1))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the segment file name prefix
    pub fn tablespace(mut self, name: impl Into<String>) -> Self {
        self.config.tablespace = name.into();
        self
    }

    /// Set the rotation threshold (in bytes)
    pub fn segment_size_threshold(mut self, bytes: u64) -> Self {
        self.config.segment_size_threshold = bytes;
        self
    }

    /// Set the fsync policy
    pub fn fsync_policy(mut self, policy: FsyncPolicy) -> Self {
        self.config.fsync_policy = policy;
        self
    }

    /// Set the automatic compaction trigger
    pub fn compaction_trigger(mut self, trigger: CompactionTrigger) -> Self {
        self.config.compaction_trigger = trigger;
        self
    }

    /// Set the background re-check period (in milliseconds)
    pub fn compaction_interval_ms(mut self, ms: u64) -> Self {
        self.config.compaction_interval_ms = ms;
        self
    }

    /// Set the maximum number of segments merged per cycle
    pub fn max_compaction_inputs(mut self, count: usize) -> Self {
        self.config.max_compaction_inputs = count;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
