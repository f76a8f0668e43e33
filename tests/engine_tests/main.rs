//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/set/delete operations
//! - Command execution
//! - Rotation and restart scenarios
//! - Concurrent access patterns
//! - Engine lifecycle (open/close)
//! - Write halts after I/O failures and resuming from them

mod scenarios;

use std::fs;

use emberkv::config::{CompactionTrigger, Config, FsyncPolicy};
use emberkv::engine::Engine;
use emberkv::error::EmberError;
use emberkv::protocol::Command;
use emberkv::segment::segment_path;
use emberkv::store::{manifest_path, Manifest, MANIFEST_TEMP_FILENAME};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

pub(crate) fn engine_config(dir: &std::path::Path, threshold: u64) -> Config {
    Config::builder()
        .data_dir(dir)
        .segment_size_threshold(threshold)
        .fsync_policy(FsyncPolicy::EveryWrite) // Sync every write for test reliability
        .compaction_trigger(CompactionTrigger::Manual)
        .build()
}

pub(crate) fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(engine_config(temp_dir.path(), 1024 * 1024)).unwrap();
    (temp_dir, engine)
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_directory_and_manifest() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let engine = Engine::open(engine_config(&data_dir, 1024)).unwrap();

    assert!(data_dir.exists());
    assert!(manifest_path(&data_dir).exists());
    assert_eq!(engine.data_dir(), data_dir.as_path());
    assert_eq!(engine.segment_count(), 1);
}

#[test]
fn test_engine_open_path_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();

    let engine = Engine::open_path(temp_dir.path()).unwrap();

    assert_eq!(engine.config().tablespace, "data");
    assert_eq!(engine.config().segment_size_threshold, 4 * 1024 * 1024);
    engine.close().unwrap();
}

#[test]
fn test_engine_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .tablespace("bad/name")
        .build();

    assert!(matches!(Engine::open(config), Err(EmberError::Config(_))));
}

#[test]
fn test_engine_set_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"hello", b"world").unwrap();

    assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    assert_eq!(engine.get(b"nonexistent").unwrap(), None);
}

#[test]
fn test_engine_overwrite() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"key", b"value1").unwrap();
    engine.set(b"key", b"value2").unwrap();

    assert_eq!(engine.get(b"key").unwrap(), Some(b"value2".to_vec()));
    assert_eq!(engine.key_count(), 1);
}

#[test]
fn test_engine_delete() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"key", b"value").unwrap();
    engine.delete(b"key").unwrap();

    assert_eq!(engine.get(b"key").unwrap(), None);
    assert_eq!(engine.key_count(), 0);
}

#[test]
fn test_engine_set_after_delete() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"key", b"old").unwrap();
    engine.delete(b"key").unwrap();
    engine.set(b"key", b"new").unwrap();

    assert_eq!(engine.get(b"key").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn test_engine_delete_absent_key_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(engine_config(temp_dir.path(), 1024)).unwrap();
        engine.set(b"a", b"1").unwrap();
        engine.delete(b"never-set").unwrap();
        engine.delete(b"never-set").unwrap();
    }

    let engine = Engine::open(engine_config(temp_dir.path(), 1024)).unwrap();
    assert_eq!(engine.recovery_report().records_replayed, 1);
    assert_eq!(engine.recovery_report().tombstones_replayed, 0);
}

#[test]
fn test_engine_empty_value_is_not_missing() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"empty", b"").unwrap();

    assert_eq!(engine.get(b"empty").unwrap(), Some(Vec::new()));
}

#[test]
fn test_engine_binary_keys_and_values() {
    let (_temp, engine) = setup_temp_engine();
    let key = vec![0x00, 0xFF, 0x10];
    let value: Vec<u8> = (0..=255).collect();

    engine.set(&key, &value).unwrap();

    assert_eq!(engine.get(&key).unwrap(), Some(value));
}

#[test]
fn test_engine_large_value() {
    let (_temp, engine) = setup_temp_engine();
    let value = vec![0x5A; 3 * 1024 * 1024];

    engine.set(b"big", &value).unwrap();

    assert_eq!(engine.get(b"big").unwrap(), Some(value));
}

// =============================================================================
// Command Execution Tests
// =============================================================================

#[test]
fn test_engine_execute_commands() {
    let (_temp, engine) = setup_temp_engine();

    let set = Command::Set {
        key: b"k".to_vec(),
        value: b"v".to_vec(),
    };
    assert_eq!(engine.execute(set).unwrap(), None);

    let get = Command::Get { key: b"k".to_vec() };
    assert_eq!(engine.execute(get.clone()).unwrap(), Some(b"v".to_vec()));

    assert_eq!(
        engine.execute(Command::Delete { key: b"k".to_vec() }).unwrap(),
        None
    );
    assert_eq!(engine.execute(get).unwrap(), None);

    assert_eq!(engine.execute(Command::Ping).unwrap(), Some(b"PONG".to_vec()));
    assert_eq!(
        engine.execute(Command::Compact).unwrap(),
        Some(b"NOTHING_TO_DO".to_vec())
    );
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_close_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(engine_config(temp_dir.path(), 1024)).unwrap();
        engine.set(b"persist", b"me").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(engine_config(temp_dir.path(), 1024)).unwrap();
    assert_eq!(engine.get(b"persist").unwrap(), Some(b"me".to_vec()));
}

#[test]
fn test_engine_batched_fsync_persists_on_close() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .fsync_policy(FsyncPolicy::EveryNWrites { count: 1000 })
        .compaction_trigger(CompactionTrigger::Manual)
        .build();
    {
        let engine = Engine::open(config.clone()).unwrap();
        for i in 0..10 {
            engine.set(format!("k{}", i).as_bytes(), b"v").unwrap();
        }
        engine.close().unwrap();
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.key_count(), 10);
}

#[test]
fn test_engine_resume_without_halt_is_noop() {
    let (_temp, engine) = setup_temp_engine();

    assert!(!engine.is_write_halted());
    engine.resume_writes().unwrap();
    engine.set(b"k", b"v").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Write Halt Tests
// =============================================================================

#[test]
fn test_rotation_failure_acknowledges_write_and_halts() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(engine_config(temp_dir.path(), 64)).unwrap();

    // The next segment id is taken, so rotation cannot create its file
    let blocker = segment_path(temp_dir.path(), "data", 1);
    fs::write(&blocker, b"").unwrap();

    engine.set(b"k1", &[b'a'; 44]).unwrap();
    assert!(engine.is_write_halted());
    assert_eq!(engine.get(b"k1").unwrap(), Some(vec![b'a'; 44]));

    assert!(matches!(engine.set(b"k2", b"v"), Err(EmberError::WritesHalted(_))));
    assert!(matches!(engine.delete(b"k1"), Err(EmberError::WritesHalted(_))));
    assert!(blocker.exists());
    assert_eq!(engine.active_segment_id(), 0);

    engine.resume_writes().unwrap();
    assert!(!engine.is_write_halted());
    engine.set(b"k2", b"v").unwrap();
    assert_ne!(engine.active_segment_id(), 0);
    engine.close().unwrap();

    fs::remove_file(&blocker).unwrap();
    let engine = Engine::open(engine_config(temp_dir.path(), 64)).unwrap();
    assert_eq!(engine.get(b"k1").unwrap(), Some(vec![b'a'; 44]));
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_failed_manifest_publish_keeps_old_rotation_state() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(engine_config(temp_dir.path(), 64)).unwrap();

    // A directory in the way of the temp manifest makes the publish fail
    let temp_manifest = temp_dir.path().join(MANIFEST_TEMP_FILENAME);
    fs::create_dir(&temp_manifest).unwrap();

    engine.set(b"k1", &[b'a'; 44]).unwrap();

    assert!(engine.is_write_halted());
    assert!(!segment_path(temp_dir.path(), "data", 1).exists());
    let on_disk = Manifest::load(temp_dir.path()).unwrap().unwrap();
    assert_eq!(on_disk.active, 0);
    assert!(on_disk.closed.is_empty());
    assert_eq!(engine.active_segment_id(), 0);

    fs::remove_dir(&temp_manifest).unwrap();
    engine.resume_writes().unwrap();
    engine.set(b"k2", b"v").unwrap();
    assert!(!engine.is_write_halted());
    assert_eq!(engine.closed_segment_ids(), vec![0]);
    engine.close().unwrap();

    let engine = Engine::open(engine_config(temp_dir.path(), 64)).unwrap();
    assert_eq!(engine.recovery_report().orphans_removed, 0);
    assert_eq!(engine.get(b"k1").unwrap(), Some(vec![b'a'; 44]));
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_engine_separate_tablespaces() {
    let temp_dir = TempDir::new().unwrap();
    let users = Config::builder()
        .data_dir(temp_dir.path().join("users"))
        .tablespace("users")
        .compaction_trigger(CompactionTrigger::Manual)
        .build();
    let orders = Config::builder()
        .data_dir(temp_dir.path().join("orders"))
        .tablespace("orders")
        .compaction_trigger(CompactionTrigger::Manual)
        .build();

    let users_engine = Engine::open(users).unwrap();
    let orders_engine = Engine::open(orders).unwrap();
    users_engine.set(b"id", b"alice").unwrap();
    orders_engine.set(b"id", b"order-1").unwrap();

    assert_eq!(users_engine.get(b"id").unwrap(), Some(b"alice".to_vec()));
    assert_eq!(orders_engine.get(b"id").unwrap(), Some(b"order-1".to_vec()));
}
