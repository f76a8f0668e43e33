//! # EmberKV
//!
//! A single-node key-value store built on an append-only log:
//! - Checksummed records appended to segment files
//! - In-memory index pointing at the newest record per key
//! - Segment rotation with an atomically replaced manifest
//! - Background compaction of closed segments
//! - Crash recovery that truncates a torn tail
//! - TCP-based client protocol
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │                  (Multiple Clients)                          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Engine                                │
//! │            (Single Writer / Multi Reader)                    │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │  KeyIndex   │        │SegmentStore │◄───────│  Compactor  │
//! │  (RwLock)   │        │ + MANIFEST  │        │ (bg worker) │
//! └─────────────┘        └──────┬──────┘        └─────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │  Segments   │
//!                        │ (*.dblog)   │
//!                        └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod compaction;
pub mod engine;
pub mod index;
pub mod network;
pub mod protocol;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use compaction::{CompactionOutcome, CompactionStats};
pub use config::{CompactionTrigger, Config, FsyncPolicy};
pub use engine::Engine;
pub use error::{EmberError, Result};
pub use recovery::RecoveryReport;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
