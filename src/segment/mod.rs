//! Segment Module
//!
//! A segment is one append-only file of record frames. Exactly one segment is
//! active (accepting appends); every other segment is closed and immutable.
//!
//! ## Responsibilities
//! - Name and discover segment files
//! - Append frames to the active segment under the fsync policy
//! - Positional reads for point lookups (no shared file cursor)
//! - Sequential scans for recovery and compaction
//!
//! ## File Naming
//! ```text
//! {data_dir}/{tablespace}_{id:010}.dblog
//! e.g. data_0000000042.dblog
//! ```

mod iterator;
mod reader;
mod writer;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use iterator::{SegmentEntry, SegmentIterator};
pub use reader::SegmentReader;
pub use writer::SegmentWriter;

/// Segment identifier; ids are handed out in increasing order and never reused
pub type SegmentId = u64;

/// Extension shared by every segment file
pub const SEGMENT_EXTENSION: &str = "dblog";

/// Width of the zero-padded id in file names
const ID_WIDTH: usize = 10;

/// "data", 42 → "data_0000000042.dblog"
pub fn segment_file_name(tablespace: &str, id: SegmentId) -> String {
    format!("{}_{:0width$}.{}", tablespace, id, SEGMENT_EXTENSION, width = ID_WIDTH)
}

/// Full path of a segment inside `dir`
pub fn segment_path(dir: &Path, tablespace: &str, id: SegmentId) -> PathBuf {
    dir.join(segment_file_name(tablespace, id))
}

/// Parse a segment id from a file name belonging to `tablespace`
/// "data_0000000042.dblog" → Some(42)
pub fn parse_segment_id(path: &Path, tablespace: &str) -> Option<SegmentId> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
    let digits = stem.strip_prefix(tablespace)?.strip_prefix('_')?;
    if digits.len() != ID_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List every segment id of `tablespace` present in `dir`, ascending
pub fn discover_segments(dir: &Path, tablespace: &str) -> Result<Vec<SegmentId>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            if let Some(id) = parse_segment_id(&path, tablespace) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Fsync a directory so that file creations, renames and removals are durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    // NTFS journals metadata; directory handles cannot be fsynced here
    Ok(())
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
