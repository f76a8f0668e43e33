//! End-to-end scenarios through the public engine API

use emberkv::engine::Engine;
use tempfile::TempDir;

use super::engine_config;

#[test]
fn test_scenario_set_delete_restart() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(engine_config(temp_dir.path(), 1024)).unwrap();
        engine.set(b"a", b"1").unwrap();
        engine.set(b"b", b"2").unwrap();
        engine.delete(b"a").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(engine_config(temp_dir.path(), 1024)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.key_count(), 1);
}

#[test]
fn test_scenario_rotation_keeps_every_key() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(engine_config(temp_dir.path(), 256)).unwrap();
        for i in 0..200 {
            engine
                .set(format!("key{:03}", i).as_bytes(), format!("value{}", i).as_bytes())
                .unwrap();
        }
        assert!(engine.segment_count() > 10);

        for i in 0..200 {
            assert_eq!(
                engine.get(format!("key{:03}", i).as_bytes()).unwrap(),
                Some(format!("value{}", i).into_bytes())
            );
        }
        engine.close().unwrap();
    }

    let engine = Engine::open(engine_config(temp_dir.path(), 256)).unwrap();
    assert_eq!(engine.key_count(), 200);
    assert_eq!(engine.get(b"key123").unwrap(), Some(b"value123".to_vec()));
}

#[test]
fn test_scenario_newest_write_wins_across_segments() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(engine_config(temp_dir.path(), 64)).unwrap();
        for round in 0..10 {
            engine.set(b"hot", format!("{:0>40}", round).as_bytes()).unwrap();
        }
        engine.delete(b"hot").unwrap();
        engine.set(b"hot", b"final").unwrap();
        assert!(engine.closed_segment_ids().len() >= 5);
    }

    let engine = Engine::open(engine_config(temp_dir.path(), 64)).unwrap();
    assert_eq!(engine.get(b"hot").unwrap(), Some(b"final".to_vec()));
    assert_eq!(engine.recovery_report().max_seq, 12);
}

#[test]
fn test_scenario_oversized_record_rotates_immediately() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(engine_config(temp_dir.path(), 64)).unwrap();
    let first_active = engine.active_segment_id();

    engine.set(b"big", &[b'x'; 500]).unwrap();

    assert_eq!(engine.closed_segment_ids(), vec![first_active]);
    assert_ne!(engine.active_segment_id(), first_active);
    assert_eq!(engine.get(b"big").unwrap(), Some(vec![b'x'; 500]));
}
