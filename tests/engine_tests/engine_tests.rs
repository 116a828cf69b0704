//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations and the user:1/user:2 scenario
//! - Command execution
//! - TTL expiry, pinning and eviction
//! - Validation and pool limits surfaced as typed errors
//! - Statistics
//! - Concurrent access patterns
//! - Independent engine instances

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use slabkv::{
    Command, Config, Engine, HashAlgorithm, PutOutcome, Reply, SizeClass, SlabError,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_engine() -> Engine {
    Engine::with_defaults().unwrap()
}

fn setup_engine_with_small_table() -> Engine {
    let config = Config::builder()
        .initial_bucket_count(2)
        .max_load_factor(0.75)
        .build();
    Engine::new(config).unwrap()
}

fn b(s: &'static str) -> Option<Bytes> {
    Some(Bytes::from_static(s.as_bytes()))
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_put_get() {
    let engine = setup_engine();

    engine.put(b"hello", b"world").unwrap();
    let result = engine.get(b"hello").unwrap();

    assert_eq!(result, b("world"));
}

#[test]
fn test_engine_get_nonexistent_key() {
    let engine = setup_engine();

    assert_eq!(engine.get(b"nonexistent").unwrap(), None);
}

#[test]
fn test_engine_put_overwrite() {
    let engine = setup_engine();

    assert_eq!(engine.put(b"key", b"value1").unwrap(), PutOutcome::Inserted);
    assert_eq!(engine.put(b"key", b"value2").unwrap(), PutOutcome::Updated);

    assert_eq!(engine.get(b"key").unwrap(), b("value2"));
    assert_eq!(engine.len(), 1);
}

#[test]
fn test_engine_delete_twice() {
    let engine = setup_engine();
    engine.put(b"key", b"value").unwrap();

    assert!(engine.delete(b"key").unwrap());
    assert!(!engine.delete(b"key").unwrap());
    assert_eq!(engine.get(b"key").unwrap(), None);

    engine.put(b"key", b"fresh").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), b("fresh"));
}

#[test]
fn test_engine_user_scenario() {
    let engine = setup_engine();

    engine.put(b"user:1", b"alice").unwrap();
    engine.put(b"user:2", b"bob").unwrap();
    assert_eq!(engine.get(b"user:1").unwrap(), b("alice"));

    assert!(engine.delete(b"user:1").unwrap());
    assert_eq!(engine.get(b"user:1").unwrap(), None);
    assert_eq!(engine.get(b"user:2").unwrap(), b("bob"));
}

#[test]
fn test_engine_transaction_scenario() {
    let engine = setup_engine();

    let tx1 = engine.begin().unwrap();
    engine.write(tx1, b"x", b"10").unwrap();
    assert_eq!(engine.read(tx1, b"x").unwrap(), b("10"));
    assert_eq!(engine.get(b"x").unwrap(), None);

    engine.commit(tx1).unwrap();
    assert_eq!(engine.get(b"x").unwrap(), b("10"));
}

#[test]
fn test_engine_empty_value_is_not_delete() {
    let engine = setup_engine();
    engine.put(b"k", b"").unwrap();

    assert_eq!(engine.get(b"k").unwrap(), Some(Bytes::new()));
    assert!(engine.contains(b"k").unwrap());
}

#[test]
fn test_engine_large_value_uses_raw_path() {
    let engine = setup_engine();
    let value = vec![42u8; 100_000];

    engine.put(b"big", &value).unwrap();
    assert_eq!(engine.get(b"big").unwrap().as_deref(), Some(value.as_slice()));
    assert_eq!(engine.stats().raw.live, 1);

    engine.delete(b"big").unwrap();
    assert_eq!(engine.stats().raw.live, 0);
}

// =============================================================================
// Command Execution Tests
// =============================================================================

#[test]
fn test_engine_execute_get() {
    let engine = setup_engine();
    engine.put(b"key", b"value").unwrap();

    let result = engine
        .execute(Command::Get {
            key: b"key".to_vec(),
        })
        .unwrap();

    assert_eq!(result, Reply::Value(Bytes::from_static(b"value")));
}

#[test]
fn test_engine_execute_put_and_delete() {
    let engine = setup_engine();

    let result = engine
        .execute(Command::Put {
            key: b"key".to_vec(),
            value: b"value".to_vec(),
        })
        .unwrap();
    assert_eq!(result, Reply::Ok);
    assert_eq!(engine.get(b"key").unwrap(), b("value"));

    let result = engine
        .execute(Command::Delete {
            key: b"key".to_vec(),
        })
        .unwrap();
    assert_eq!(result, Reply::Ok);
    assert_eq!(
        engine.execute(Command::Delete {
            key: b"key".to_vec()
        }),
        Err(SlabError::NotFound)
    );
}

#[test]
fn test_engine_execute_putex_and_exists() {
    let engine = setup_engine();

    engine
        .execute(Command::PutEx {
            key: b"session".to_vec(),
            value: b"token".to_vec(),
            ttl: Duration::ZERO,
        })
        .unwrap();

    assert_eq!(
        engine.execute(Command::Exists {
            key: b"session".to_vec()
        }),
        Ok(Reply::Bool(false))
    );
}

#[test]
fn test_engine_execute_ping_and_stats() {
    let engine = setup_engine();

    assert_eq!(engine.execute(Command::Ping).unwrap(), Reply::Pong);
    match engine.execute(Command::Stats).unwrap() {
        Reply::Stats(stats) => assert_eq!(stats.entry_count, 0),
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[test]
fn test_engine_command_metadata() {
    let command = Command::Write {
        txn: 1,
        key: b"k".to_vec(),
        value: b"v".to_vec(),
    };
    assert_eq!(command.name(), "WRITE");
    assert!(!command.is_write());
    assert!(Command::Commit { txn: 1 }.is_write());
}

// =============================================================================
// TTL, Pin and Evict Tests
// =============================================================================

#[test]
fn test_engine_zero_ttl_reads_as_absent() {
    let engine = setup_engine();

    engine
        .put_with_ttl(b"k", b"v", Duration::ZERO)
        .unwrap();

    assert_eq!(engine.get(b"k").unwrap(), None);
    assert!(!engine.contains(b"k").unwrap());
    assert_eq!(engine.len(), 0);
}

#[test]
fn test_engine_ttl_expires_after_sleep() {
    let engine = setup_engine();
    engine
        .put_with_ttl(b"k", b"v", Duration::from_millis(20))
        .unwrap();
    assert_eq!(engine.get(b"k").unwrap(), b("v"));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.get(b"k").unwrap(), None);
}

#[test]
fn test_engine_default_ttl_and_purge() {
    let engine = Engine::new(
        Config::builder()
            .default_ttl(Duration::from_millis(10))
            .build(),
    )
    .unwrap();

    for i in 0..20 {
        engine.put(format!("k{}", i).as_bytes(), b"v").unwrap();
    }
    thread::sleep(Duration::from_millis(30));

    assert_eq!(engine.purge_expired().unwrap(), 20);
    assert!(engine.is_empty());
}

#[test]
fn test_engine_pin_survives_delete() {
    let engine = setup_engine();
    engine.put(b"doc", b"contents").unwrap();

    let guard = engine.pin(b"doc").unwrap().unwrap();
    engine.delete(b"doc").unwrap();

    assert_eq!(guard.value().unwrap(), Bytes::from_static(b"contents"));
    assert_eq!(guard.key().unwrap(), Bytes::from_static(b"doc"));
    assert_eq!(engine.stats().pools[0].live, 1);

    drop(guard);
    assert_eq!(engine.stats().pools[0].live, 0);
}

#[test]
fn test_engine_evict() {
    let engine = setup_engine();
    engine.put(b"k", b"v").unwrap();

    engine.evict(b"k").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), None);
    assert_eq!(engine.evict(b"k"), Err(SlabError::NotFound));
}

#[test]
fn test_engine_record_info() {
    let engine = setup_engine();
    engine
        .put_with_ttl(b"k", b"value", Duration::from_secs(60))
        .unwrap();

    let info = engine.record_info(b"k").unwrap().unwrap();
    assert_eq!(info.key_len, 1);
    assert_eq!(info.value_len, 5);
    assert_eq!(info.ttl, Some(Duration::from_secs(60)));
    assert!(info.remaining_ttl.unwrap() <= Duration::from_secs(60));
    assert_eq!(info.size_class, Some(0));
    assert!(engine.record_info(b"missing").unwrap().is_none());
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_engine_rejects_oversized_key_and_value() {
    let engine = Engine::new(
        Config::builder()
            .max_key_len(8)
            .max_value_len(16)
            .build(),
    )
    .unwrap();

    assert_eq!(
        engine.put(b"much-too-long", b"v"),
        Err(SlabError::KeyTooLarge { len: 13, max: 8 })
    );
    assert_eq!(
        engine.put(b"k", &[0u8; 17]),
        Err(SlabError::ValueTooLarge { len: 17, max: 16 })
    );
    assert_eq!(
        engine.delete(b"much-too-long"),
        Err(SlabError::KeyTooLarge { len: 13, max: 8 })
    );
    assert!(engine.is_empty());
}

#[test]
fn test_engine_pool_exhaustion_is_reported() {
    let engine = Engine::new(
        Config::builder()
            .size_classes(vec![SizeClass::new(64, 128)])
            .max_chunks_per_class(1)
            .max_value_len(32)
            .build(),
    )
    .unwrap();

    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    assert_eq!(
        engine.put(b"c", b"3"),
        Err(SlabError::Exhausted {
            block_size: 64,
            chunks: 1
        })
    );

    // Failed put leaves the index consistent
    assert_eq!(engine.len(), 2);
    assert_eq!(engine.get(b"c").unwrap(), None);
    engine.delete(b"a").unwrap();
    engine.put(b"c", b"3").unwrap();
}

#[test]
fn test_engine_invalid_config() {
    let config = Config::builder().max_load_factor(-1.0).build();
    assert!(matches!(Engine::new(config), Err(SlabError::InvalidConfig(_))));
}

// =============================================================================
// Statistics Tests
// =============================================================================

#[test]
fn test_engine_stats() {
    let engine = setup_engine_with_small_table();
    for i in 0..100 {
        engine.put(format!("key{}", i).as_bytes(), b"v").unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.entry_count, 100);
    assert!(stats.resize_count > 0);
    assert!(stats.load_factor <= 0.75);
    assert_eq!(stats.pools.len(), 3);
    assert_eq!(stats.pools[0].live, 100);
    assert!(stats.pools.iter().all(|p| p.live <= p.chunks * p.blocks_per_chunk));

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["entry_count"], 100);
    assert!(json["transactions"]["commits_per_sec"].is_number());
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_engine_concurrent_reads() {
    let engine = Arc::new(setup_engine());

    // Pre-populate data
    for i in 0..100 {
        engine
            .put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
            .unwrap();
    }

    let mut handles = vec![];
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                let expected = format!("value{}", i);
                let result = engine.get(format!("key{}", i).as_bytes()).unwrap();
                assert_eq!(result.as_deref(), Some(expected.as_bytes()));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_engine_concurrent_writers_across_resizes() {
    let engine = Arc::new(setup_engine_with_small_table());
    let mut handles = vec![];

    for t in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..250 {
                let key = format!("t{}:k{}", t, i);
                engine.put(key.as_bytes(), key.as_bytes()).unwrap();
                if i % 5 == 0 {
                    assert!(engine.delete(key.as_bytes()).unwrap());
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.len(), 8 * 200);
    for t in 0..8 {
        for i in 0..250 {
            let key = format!("t{}:k{}", t, i);
            let expected = if i % 5 == 0 { None } else { Some(key.as_bytes()) };
            assert_eq!(engine.get(key.as_bytes()).unwrap().as_deref(), expected);
        }
    }
}

#[test]
fn test_engine_concurrent_pins_and_overwrites() {
    let engine = Arc::new(setup_engine());
    engine.put(b"hot", b"v0").unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 1..500 {
                engine.put(b"hot", format!("v{}", i).as_bytes()).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..500 {
                    let guard = engine.pin(b"hot").unwrap().unwrap();
                    let value = guard.value().unwrap();
                    assert!(value.starts_with(b"v"));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(engine.get(b"hot").unwrap(), b("v499"));
    // Every retired block came back once its readers were gone
    assert_eq!(engine.stats().pools[0].live, 1);
}

#[test]
fn test_engine_instances_are_independent() {
    let a = Engine::new(Config::builder().hash_algorithm(HashAlgorithm::Fx).build()).unwrap();
    let b_engine = Engine::new(Config::builder().hash_algorithm(HashAlgorithm::Sip).build()).unwrap();

    a.put(b"k", b"a").unwrap();
    b_engine.put(b"k", b"b").unwrap();

    assert_eq!(a.get(b"k").unwrap(), b("a"));
    assert_eq!(b_engine.get(b"k").unwrap(), b("b"));
    assert_eq!(a.begin().unwrap(), 1);
    assert_eq!(b_engine.begin().unwrap(), 1);
}
