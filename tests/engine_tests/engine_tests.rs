//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations
//! - Command execution, FETCH included
//! - Crash recovery from the backup log
//! - Lock timeouts and failed appends leave the store unchanged
//! - FETCH replies always fit in one frame
//! - Merging replicated entries
//! - Engine lifecycle (open/close)

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use driftkv::backup::{LogRecovery, MAX_BATCH_BYTES};
use driftkv::config::{Config, NodeSettings, SyncStrategy};
use driftkv::engine::{ApplyOutcome, Engine};
use driftkv::protocol::{read_response, write_response, Command, Status};
use driftkv::store::{Entry, Version};
use driftkv::DriftError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(dir: &TempDir, node_id: &str) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .node(NodeSettings::new(node_id, 0, 0))
        .sync_strategy(SyncStrategy::EveryWrite)
        .lock_timeout_ms(50)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir, "node1")).unwrap();
    (temp_dir, engine)
}

fn volatile_engine(dir: &TempDir) -> Engine {
    let config = Config::builder()
        .data_dir(dir.path())
        .backup_on_write(false)
        .build();
    Engine::open(config).unwrap()
}

fn remote(key: &str, value: &str, node: &str, clock: u64) -> Entry {
    Entry::value(key, value.as_bytes().to_vec(), Version::new(clock, node))
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_node_directory() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir, "alpha")).unwrap();

    let node_dir = temp_dir.path().join("alpha");
    assert_eq!(engine.data_dir(), node_dir.as_path());
    assert!(node_dir.join("backup.log").exists());
}

#[test]
fn test_engine_open_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .lock_timeout_ms(0)
        .build();

    assert!(matches!(Engine::open(config), Err(DriftError::Config(_))));
}

#[test]
fn test_engine_put_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("hello", b"world").unwrap();

    assert_eq!(engine.get("hello"), Some(b"world".to_vec()));
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    assert_eq!(engine.get("nonexistent"), None);
}

#[test]
fn test_engine_overwrite_bumps_version() {
    let (_temp, engine) = setup_temp_engine();

    let v1 = engine.put("k", b"1").unwrap();
    let v2 = engine.put("k", b"2").unwrap();

    assert!(v2 > v1);
    assert_eq!(v2.node_id, "node1");
    assert_eq!(engine.get("k"), Some(b"2".to_vec()));
}

#[test]
fn test_engine_delete_writes_tombstone() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("key", b"value").unwrap();
    let version = engine.delete("key").unwrap();

    assert_eq!(engine.get("key"), None);
    let entry = engine.entry("key").unwrap();
    assert!(entry.tombstone);
    assert_eq!(entry.version, version);
}

#[test]
fn test_engine_delete_absent_key() {
    let (_temp, engine) = setup_temp_engine();

    engine.delete("never").unwrap();

    assert_eq!(engine.get("never"), None);
    assert_eq!(engine.entry_count(), 1);
}

#[test]
fn test_engine_empty_value() {
    let (_temp, engine) = setup_temp_engine();

    engine.put("empty", b"").unwrap();

    assert_eq!(engine.get("empty"), Some(Vec::new()));
}

// =============================================================================
// Command Execution Tests
// =============================================================================

#[test]
fn test_execute_put_get_delete() {
    let (_temp, engine) = setup_temp_engine();

    let put = engine
        .execute(Command::Put {
            key: "k".into(),
            value: b"v".to_vec(),
        })
        .unwrap();
    assert_eq!(put.status, Status::Ok);
    assert_eq!(put.version().unwrap().node_id, "node1");

    let get = engine.execute(Command::Get { key: "k".into() }).unwrap();
    assert_eq!(get.status, Status::Ok);
    assert_eq!(get.payload, Some(b"v".to_vec()));

    engine.execute(Command::Delete { key: "k".into() }).unwrap();
    let get = engine.execute(Command::Get { key: "k".into() }).unwrap();
    assert_eq!(get.status, Status::NotFound);
}

#[test]
fn test_execute_ping() {
    let (_temp, engine) = setup_temp_engine();

    let response = engine.execute(Command::Ping).unwrap();

    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.payload, Some(b"PONG".to_vec()));
}

#[test]
fn test_execute_fetch() {
    let (_temp, engine) = setup_temp_engine();
    for i in 0..5 {
        engine.put(&format!("k{}", i), b"v").unwrap();
    }

    let response = engine
        .execute(Command::Fetch { since: 2, limit: 2 })
        .unwrap();
    let batch = response.fetch_batch().unwrap();

    assert_eq!(batch.last_index, 5);
    let indices: Vec<_> = batch.records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![3, 4]);
    assert!(batch.corrupt.is_none());
}

#[test]
fn test_execute_fetch_reply_fits_one_frame() {
    let temp_dir = TempDir::new().unwrap();
    let engine = volatile_engine(&temp_dir);
    let nine_mib = vec![7u8; 9 * 1024 * 1024];
    engine.put("big1", &nine_mib).unwrap();
    engine.put("big2", &nine_mib).unwrap();

    let mut since = 0;
    let mut keys = Vec::new();
    while since < 2 {
        let response = engine
            .execute(Command::Fetch { since, limit: 1024 })
            .unwrap();

        // The reply must survive the wire codec's frame limit
        let mut wire = Vec::new();
        write_response(&mut wire, &response).unwrap();
        let batch = read_response(&mut wire.as_slice())
            .unwrap()
            .fetch_batch()
            .unwrap();

        assert_eq!(batch.last_index, 2);
        assert_eq!(batch.records.len(), 1);
        since = batch.records[0].index;
        keys.push(batch.records[0].entry.key.clone());
    }

    assert_eq!(keys, vec!["big1", "big2"]);
}

#[test]
fn test_put_refuses_value_too_large_to_fetch() {
    let (_temp, engine) = setup_temp_engine();
    engine.put("k", b"small").unwrap();
    let clock = engine.clock();
    let value = vec![0u8; MAX_BATCH_BYTES];

    let err = engine.put("k", &value).unwrap_err();

    assert!(
        matches!(err, DriftError::RecordTooLarge { ref key, .. } if key == "k"),
        "unexpected error: {:?}",
        err
    );
    assert_eq!(engine.get("k"), Some(b"small".to_vec()));
    assert_eq!(engine.log().len(), 1);
    assert_eq!(engine.clock(), clock);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_engine_replay_restores_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let before = {
        let engine = Engine::open(config_for(&temp_dir, "node1")).unwrap();
        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();
        engine.put("a", b"3").unwrap();
        engine.delete("b").unwrap();
        engine
            .apply_replicated(remote("c", "far", "node2", 40))
            .unwrap();
        engine.snapshot()
        // Dropped without close: simulates a crash
    };

    let engine = Engine::open(config_for(&temp_dir, "node1")).unwrap();

    assert_eq!(engine.snapshot(), before);
    assert_eq!(engine.get("a"), Some(b"3".to_vec()));
    assert_eq!(engine.get("b"), None);
    assert_eq!(engine.recovery_report().entries_recovered, 5);
}

#[test]
fn test_engine_clock_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let last = {
        let engine = Engine::open(config_for(&temp_dir, "node1")).unwrap();
        engine
            .apply_replicated(remote("x", "1", "node2", 100))
            .unwrap();
        engine.put("y", b"2").unwrap()
    };

    let engine = Engine::open(config_for(&temp_dir, "node1")).unwrap();
    let next = engine.put("z", b"3").unwrap();

    assert!(last.clock > 100);
    assert!(next > last);
}

#[test]
fn test_engine_volatile_loses_state_on_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .backup_on_write(false)
        .build();

    {
        let engine = Engine::open(config.clone()).unwrap();
        engine.put("k", b"v").unwrap();
        assert_eq!(engine.get("k"), Some(b"v".to_vec()));
        assert!(!engine.log().is_durable());
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.get("k"), None);
    assert!(!engine.data_dir().join("backup.log").exists());
}

#[test]
fn test_engine_recovers_after_corruption() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir, "node1")).unwrap();
        engine.put("keep", b"1").unwrap();
    }

    // Append garbage that looks like half a header
    let log_path = temp_dir.path().join("node1").join("backup.log");
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes.extend_from_slice(&[0xAB; 9]);
    std::fs::write(&log_path, bytes).unwrap();

    let engine = Engine::open(config_for(&temp_dir, "node1")).unwrap();

    assert_eq!(engine.get("keep"), Some(b"1".to_vec()));
    assert!(engine.recovery_report().was_truncated);
    assert!(!LogRecovery::verify(&log_path).unwrap().was_truncated);
}

#[test]
fn test_engine_never_reuses_quarantined_index() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir, "node1")).unwrap();
        for key in ["a", "b", "c"] {
            engine.put(key, b"v").unwrap();
        }
    }

    // Damage the last byte of record 3
    let log_path = temp_dir.path().join("node1").join("backup.log");
    let mut bytes = fs::read(&log_path).unwrap();
    if let Some(last) = bytes.last_mut() {
        *last ^= 0xFF;
    }
    fs::write(&log_path, bytes).unwrap();

    let engine = Engine::open(config_for(&temp_dir, "node1")).unwrap();
    assert_eq!(engine.recovery_report().entries_corrupted, 1);
    engine.put("fresh", b"new").unwrap();

    assert_eq!(engine.log().last_index(), 4);
    let served = engine.fetch_since(3, 10);
    assert_eq!(served.len(), 1);
    assert_eq!(served[0].entry.key, "fresh");
}

// =============================================================================
// Durability Tests
// =============================================================================

/// Points the node's backup log at `/dev/full`, where every write fails
#[cfg(target_os = "linux")]
fn engine_on_full_disk(dir: &TempDir) -> Option<Engine> {
    let full = std::path::Path::new("/dev/full");
    if !full.exists() {
        return None;
    }
    let node_dir = dir.path().join("node1");
    fs::create_dir_all(&node_dir).unwrap();
    std::os::unix::fs::symlink(full, node_dir.join("backup.log")).unwrap();

    Some(Engine::open(config_for(dir, "node1")).unwrap())
}

#[cfg(target_os = "linux")]
#[test]
fn test_durability_failure_fails_local_write() {
    let temp_dir = TempDir::new().unwrap();
    let Some(engine) = engine_on_full_disk(&temp_dir) else {
        return;
    };
    let clock = engine.clock();

    for result in [engine.put("k", b"v"), engine.delete("k")] {
        let err = result.unwrap_err();
        assert!(
            matches!(err, DriftError::DurabilityFailure(_)),
            "unexpected error: {:?}",
            err
        );
        assert!(!err.is_retryable());
    }

    assert_eq!(engine.get("k"), None);
    assert!(engine.entry("k").is_none());
    assert_eq!(engine.entry_count(), 0);
    assert!(engine.log().is_empty());
    assert_eq!(engine.log().last_index(), 0);
    assert_eq!(engine.clock(), clock);
}

#[cfg(target_os = "linux")]
#[test]
fn test_durability_failure_rejects_replicated_entry() {
    let temp_dir = TempDir::new().unwrap();
    let Some(engine) = engine_on_full_disk(&temp_dir) else {
        return;
    };

    let result = engine.apply_replicated(remote("r", "x", "node2", 7));

    assert!(matches!(result, Err(DriftError::DurabilityFailure(_))));
    assert!(engine.entry("r").is_none());
    assert!(engine.fetch_since(0, 10).is_empty());
}

// =============================================================================
// Lock Tests
// =============================================================================

#[test]
fn test_put_times_out_when_key_is_locked() {
    let (_temp, engine) = setup_temp_engine();
    engine.put("contended", b"before").unwrap();
    let log_len = engine.log().len();

    let _held = engine
        .locks()
        .acquire("contended", Duration::from_secs(5))
        .unwrap();
    let result = engine.put("contended", b"after");

    match result {
        Err(DriftError::LockTimeout { key, .. }) => assert_eq!(key, "contended"),
        other => panic!("expected LockTimeout, got {:?}", other),
    }
    assert_eq!(engine.get("contended"), Some(b"before".to_vec()));
    assert_eq!(engine.log().len(), log_len);
}

#[test]
fn test_concurrent_writers_different_keys() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open(config_for(&temp_dir, "node1")).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..50 {
                    engine
                        .put(&format!("t{}-k{}", t, i), format!("{}", i).as_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.entry_count(), 200);
    assert_eq!(engine.log().last_index(), 200);
    assert_eq!(engine.get("t3-k49"), Some(b"49".to_vec()));
}

// =============================================================================
// Replication Merge Tests
// =============================================================================

#[test]
fn test_version_is_clock_first() {
    let version = Version::new(7, "node2");

    assert_eq!(version.clock, 7);
    assert_eq!(version.node_id, "node2");
    assert_eq!(version.to_string(), "(7, node2)");
    assert!(Version::new(8, "a") > Version::new(7, "z"));
    assert!(Version::new(7, "b") > Version::new(7, "a"));
}

#[test]
fn test_apply_newer_entry() {
    let (_temp, engine) = setup_temp_engine();
    engine.put("k", b"local").unwrap();

    let outcome = engine
        .apply_replicated(remote("k", "remote", "node2", 50))
        .unwrap();

    assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
    assert_eq!(engine.get("k"), Some(b"remote".to_vec()));
    assert!(engine.clock() >= 50);
}

#[test]
fn test_apply_stale_entry_is_discarded() {
    let (_temp, engine) = setup_temp_engine();
    engine
        .apply_replicated(remote("k", "new", "node2", 10))
        .unwrap();
    let log_len = engine.log().len();

    let outcome = engine
        .apply_replicated(remote("k", "old", "node3", 9))
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Stale);
    assert_eq!(engine.get("k"), Some(b"new".to_vec()));
    assert_eq!(engine.log().len(), log_len);
}

#[test]
fn test_apply_is_idempotent() {
    let (_temp, engine) = setup_temp_engine();
    let entry = remote("k", "v", "node2", 7);

    let first = engine.apply_replicated(entry.clone()).unwrap();
    let second = engine.apply_replicated(entry).unwrap();

    assert!(matches!(first, ApplyOutcome::Applied { .. }));
    assert_eq!(second, ApplyOutcome::Stale);
    assert_eq!(engine.log().len(), 1);
}

#[test]
fn test_apply_tie_breaks_on_node_id() {
    let (_temp, engine) = setup_temp_engine();
    engine
        .apply_replicated(remote("k", "from-a", "node-a", 5))
        .unwrap();

    engine
        .apply_replicated(remote("k", "from-b", "node-b", 5))
        .unwrap();
    let outcome = engine
        .apply_replicated(remote("k", "from-a-again", "node-a", 5))
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Stale);
    assert_eq!(engine.get("k"), Some(b"from-b".to_vec()));
}

#[test]
fn test_apply_remote_tombstone() {
    let (_temp, engine) = setup_temp_engine();
    engine.put("k", b"v").unwrap();

    engine
        .apply_replicated(Entry::tombstone("k", Version::new(99, "node2")))
        .unwrap();

    assert_eq!(engine.get("k"), None);
}

#[test]
fn test_local_write_after_remote_wins() {
    let (_temp, engine) = setup_temp_engine();
    engine
        .apply_replicated(remote("k", "remote", "zzz", 30))
        .unwrap();

    let version = engine.put("k", b"local").unwrap();

    assert!(version.clock > 30);
    assert_eq!(engine.get("k"), Some(b"local".to_vec()));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_close_refuses_writes() {
    let (_temp, engine) = setup_temp_engine();
    engine.put("k", b"v").unwrap();

    engine.close().unwrap();
    engine.close().unwrap();

    assert!(engine.is_closed());
    assert!(matches!(engine.put("k", b"x"), Err(DriftError::ShuttingDown)));
    assert!(matches!(
        engine.apply_replicated(remote("k", "y", "node2", 100)),
        Err(DriftError::ShuttingDown)
    ));
    // Reads keep working
    assert_eq!(engine.get("k"), Some(b"v".to_vec()));
}
