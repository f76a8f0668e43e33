//! Error types for EmberKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::segment::SegmentId;

/// Result type alias using EmberError
pub type Result<T> = std::result::Result<T, EmberError>;

/// Unified error type for EmberKV operations
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum EmberError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record / Segment Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt record in segment {segment} at offset {offset}: {reason}")]
    CorruptRecord {
        segment: SegmentId,
        offset: u64,
        reason: String,
    },

    #[error("Truncated record in segment {segment} at offset {offset}")]
    TruncatedRecord { segment: SegmentId, offset: u64 },

    #[error("No record for the requested key in segment {segment} at offset {offset}")]
    InvalidOffset { segment: SegmentId, offset: u64 },

    // -------------------------------------------------------------------------
    // Store Errors
    // -------------------------------------------------------------------------
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Compaction failed: {0}")]
    Compaction(String),

    #[error("Writes halted after storage failure: {0}")]
    WritesHalted(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EmberError {
    /// True for errors that describe damaged on-disk bytes rather than a
    /// failing device.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            EmberError::CorruptRecord { .. } | EmberError::TruncatedRecord { .. }
        )
    }
}

impl From<bincode::Error> for EmberError {
    fn from(err: bincode::Error) -> Self {
        EmberError::Serialization(err.to_string())
    }
}
