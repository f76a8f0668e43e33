//! Tests for segment files
//!
//! These tests verify:
//! - Appends return increasing offsets and positional reads find them
//! - Sequential scans yield every frame in order
//! - Scans stop at a torn tail and report the last valid boundary
//! - Retired readers delete their file when dropped

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use emberkv::config::FsyncPolicy;
use emberkv::error::EmberError;
use emberkv::record::{encode, Record};
use emberkv::segment::{discover_segments, segment_path, SegmentReader, SegmentWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_segment() -> (TempDir, SegmentWriter) {
    let temp_dir = TempDir::new().unwrap();
    let path = segment_path(temp_dir.path(), "data", 1);
    let writer = SegmentWriter::create(&path, 1, FsyncPolicy::EveryWrite).unwrap();
    (temp_dir, writer)
}

fn append(writer: &mut SegmentWriter, record: &Record) -> (u64, u32) {
    let frame = encode(record).unwrap();
    let offset = writer.append(&frame).unwrap();
    (offset, frame.len() as u32)
}

// =============================================================================
// Writer / Reader Tests
// =============================================================================

#[test]
fn test_create_refuses_existing_file() {
    let (_temp, writer) = setup_temp_segment();

    let result = SegmentWriter::create(writer.path(), 1, FsyncPolicy::EveryWrite);

    assert!(matches!(result, Err(EmberError::Io(_))));
}

#[test]
fn test_append_then_read_record() {
    let (_temp, mut writer) = setup_temp_segment();

    let (off_a, len_a) = append(&mut writer, &Record::put(1, b"a".to_vec(), b"one".to_vec()));
    let (off_b, len_b) = append(&mut writer, &Record::put(2, b"b".to_vec(), b"two".to_vec()));

    assert_eq!(off_a, 0);
    assert_eq!(off_b, len_a as u64);
    assert_eq!(writer.size(), (len_a + len_b) as u64);

    let reader = SegmentReader::open(writer.path(), 1).unwrap();
    let b = reader.read_record(off_b, len_b).unwrap();
    let a = reader.read_record(off_a, len_a).unwrap();

    assert_eq!(a.value, Some(b"one".to_vec()));
    assert_eq!(b.value, Some(b"two".to_vec()));
}

#[test]
fn test_reopen_appends_at_end() {
    let (_temp, mut writer) = setup_temp_segment();
    let (_, len) = append(&mut writer, &Record::put(1, b"a".to_vec(), b"1".to_vec()));
    let path = writer.path().to_path_buf();
    drop(writer);

    let mut writer = SegmentWriter::open(&path, 1, FsyncPolicy::EveryWrite).unwrap();
    assert_eq!(writer.size(), len as u64);

    let (offset, _) = append(&mut writer, &Record::put(2, b"b".to_vec(), b"2".to_vec()));
    assert_eq!(offset, len as u64);
}

#[test]
fn test_read_past_end_is_truncated() {
    let (_temp, mut writer) = setup_temp_segment();
    let (offset, len) = append(&mut writer, &Record::put(1, b"a".to_vec(), b"1".to_vec()));

    let reader = SegmentReader::open(writer.path(), 1).unwrap();
    let result = reader.read_record(offset + 1, len);

    assert!(matches!(result, Err(EmberError::TruncatedRecord { segment: 1, .. })));
}

#[test]
fn test_batched_fsync_policy() {
    let temp_dir = TempDir::new().unwrap();
    let path = segment_path(temp_dir.path(), "data", 1);
    let mut writer =
        SegmentWriter::create(&path, 1, FsyncPolicy::EveryNWrites { count: 3 }).unwrap();

    let (_, first) = append(&mut writer, &Record::put(1, b"a".to_vec(), b"1".to_vec()));
    let (_, second) = append(&mut writer, &Record::put(2, b"b".to_vec(), b"2".to_vec()));
    assert!(writer.has_unsynced_writes());
    assert_eq!(writer.unsynced_bytes(), (first + second) as u64);

    append(&mut writer, &Record::put(3, b"c".to_vec(), b"3".to_vec()));
    assert!(!writer.has_unsynced_writes());
    assert_eq!(writer.unsynced_bytes(), 0);
}

#[test]
fn test_explicit_sync_and_truncate_clear_unsynced_bytes() {
    let temp_dir = TempDir::new().unwrap();
    let path = segment_path(temp_dir.path(), "data", 1);
    let mut writer =
        SegmentWriter::create(&path, 1, FsyncPolicy::EveryNWrites { count: 100 }).unwrap();

    let (_, len) = append(&mut writer, &Record::put(1, b"a".to_vec(), b"1".to_vec()));
    writer.sync().unwrap();
    assert_eq!(writer.unsynced_bytes(), 0);

    append(&mut writer, &Record::put(2, b"b".to_vec(), b"2".to_vec()));
    assert!(writer.unsynced_bytes() > 0);
    writer.truncate(len as u64).unwrap();
    assert_eq!(writer.unsynced_bytes(), 0);
    assert_eq!(writer.size(), len as u64);
}

#[test]
fn test_concurrent_positional_reads() {
    let (_temp, mut writer) = setup_temp_segment();
    let mut locations = Vec::new();
    for i in 0..100u64 {
        let key = format!("key{}", i).into_bytes();
        let value = format!("value{}", i).into_bytes();
        let (offset, len) = append(&mut writer, &Record::put(i + 1, key, value));
        locations.push((i, offset, len));
    }

    let reader = Arc::new(SegmentReader::open(writer.path(), 1).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let reader = Arc::clone(&reader);
            let locations = locations.clone();
            thread::spawn(move || {
                for (i, offset, len) in locations.into_iter().skip(t).step_by(4) {
                    let record = reader.read_record(offset, len).unwrap();
                    assert_eq!(record.value, Some(format!("value{}", i).into_bytes()));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

// =============================================================================
// Iterator Tests
// =============================================================================

#[test]
fn test_iter_yields_frames_in_order() {
    let (_temp, mut writer) = setup_temp_segment();
    let records = vec![
        Record::put(1, b"a".to_vec(), b"1".to_vec()),
        Record::tombstone(2, b"a".to_vec()),
        Record::put(3, b"b".to_vec(), Vec::new()),
    ];
    let offsets: Vec<u64> = records.iter().map(|r| append(&mut writer, r).0).collect();

    let reader = SegmentReader::open(writer.path(), 1).unwrap();
    let entries: Vec<_> = reader.iter().unwrap().map(|e| e.unwrap()).collect();

    assert_eq!(entries.len(), 3);
    for ((entry, record), offset) in entries.iter().zip(&records).zip(&offsets) {
        assert_eq!(&entry.record, record);
        assert_eq!(entry.offset, *offset);
    }
}

#[test]
fn test_iter_empty_segment() {
    let (_temp, writer) = setup_temp_segment();
    let reader = SegmentReader::open(writer.path(), 1).unwrap();

    assert!(reader.is_empty().unwrap());
    assert_eq!(reader.iter().unwrap().count(), 0);
}

#[test]
fn test_iter_stops_at_torn_tail() {
    let (_temp, mut writer) = setup_temp_segment();
    append(&mut writer, &Record::put(1, b"a".to_vec(), b"1".to_vec()));
    let good_len = writer.size();

    // Half a frame, as left by a crash mid-write
    let frame = encode(&Record::put(2, b"b".to_vec(), b"2".to_vec())).unwrap();
    let mut file = OpenOptions::new().append(true).open(writer.path()).unwrap();
    file.write_all(&frame[..frame.len() / 2]).unwrap();
    drop(file);

    let reader = SegmentReader::open(writer.path(), 1).unwrap();
    let mut iter = reader.iter().unwrap();

    assert!(iter.next().unwrap().is_ok());
    let err = iter.next().unwrap().unwrap_err();
    assert!(matches!(err, EmberError::TruncatedRecord { segment: 1, offset } if offset == good_len));
    assert!(iter.next().is_none());
    assert_eq!(iter.valid_len(), good_len);
}

#[test]
fn test_iter_reports_corrupt_frame_offset() {
    let (_temp, mut writer) = setup_temp_segment();
    append(&mut writer, &Record::put(1, b"a".to_vec(), b"1".to_vec()));
    let (second, _) = append(&mut writer, &Record::put(2, b"b".to_vec(), b"2".to_vec()));

    let mut bytes = std::fs::read(writer.path()).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(writer.path(), &bytes).unwrap();

    let reader = SegmentReader::open(writer.path(), 1).unwrap();
    let results: Vec<_> = reader.iter().unwrap().collect();

    assert_eq!(results.len(), 2);
    assert!(matches!(
        results[1],
        Err(EmberError::CorruptRecord { segment: 1, offset, .. }) if offset == second
    ));
}

#[test]
fn test_garbage_length_does_not_allocate_past_file() {
    let (_temp, writer) = setup_temp_segment();
    // key_len = u32::MAX - 1, val_len = u32::MAX - 1
    let mut garbage = vec![0xFE, 0xFF, 0xFF, 0xFF, 0xFE, 0xFF, 0xFF, 0xFF];
    garbage.extend_from_slice(&[0u8; 16]);
    std::fs::write(writer.path(), &garbage).unwrap();

    let reader = SegmentReader::open(writer.path(), 1).unwrap();
    let results: Vec<_> = reader.iter().unwrap().collect();

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(EmberError::TruncatedRecord { offset: 0, .. })));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_obsolete_reader_removes_file_on_last_drop() {
    let (_temp, writer) = setup_temp_segment();
    let path = writer.path().to_path_buf();
    drop(writer);

    let reader = Arc::new(SegmentReader::open(&path, 1).unwrap());
    let in_flight = Arc::clone(&reader);
    reader.mark_obsolete();
    drop(reader);

    // Still readable while a handle is alive
    assert!(path.exists());
    assert!(in_flight.is_obsolete());

    drop(in_flight);
    assert!(!path.exists());
}

#[test]
fn test_discover_ignores_other_files() {
    let temp_dir = TempDir::new().unwrap();
    for id in [3u64, 1, 2] {
        SegmentWriter::create(&segment_path(temp_dir.path(), "data", id), id, FsyncPolicy::EveryWrite)
            .unwrap();
    }
    SegmentWriter::create(&segment_path(temp_dir.path(), "other", 9), 9, FsyncPolicy::EveryWrite)
        .unwrap();
    std::fs::write(temp_dir.path().join("MANIFEST"), b"x").unwrap();
    std::fs::write(temp_dir.path().join("data_12.dblog"), b"x").unwrap();

    let ids = discover_segments(temp_dir.path(), "data").unwrap();

    assert_eq!(ids, vec![1, 2, 3]);
}
