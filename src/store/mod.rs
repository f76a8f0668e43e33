//! Store Module
//!
//! The segment set and the manifest that makes it durable.
//!
//! ## On-Disk Layout
//! ```text
//! {data_dir}/
//!   ├── MANIFEST                 closed = [5, 3], active = 6
//!   ├── data_0000000005.dblog    closed (compaction output of 0..=2, ordered first)
//!   ├── data_0000000003.dblog    closed
//!   └── data_0000000006.dblog    active
//! ```
//!
//! Truth order is the manifest order, not the numeric id order: compaction
//! output takes the position of the segments it replaced.

mod manager;
mod manifest;

pub use manager::SegmentStore;
pub use manifest::{manifest_path, Manifest, MANIFEST_FILENAME, MANIFEST_TEMP_FILENAME};
