//! Tests for transactions
//!
//! These tests verify:
//! - Own writes are visible before commit, invisible to others
//! - Snapshot-at-begin reads, including against direct writes
//! - First-committer-wins conflict detection
//! - ReadCommitted isolation
//! - Terminal states and unknown ids
//! - Active limits, timeouts and reaping
//! - Failed commits leave every record exactly as it was
//! - Concurrent read-modify-write counters

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use slabkv::{
    Config, Engine, IsolationLevel, Pending, RecordFlags, SizeClass, SlabError, TxnState,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_engine() -> Engine {
    Engine::with_defaults().unwrap()
}

/// Engine whose only pool holds two 64 byte blocks and cannot grow
fn setup_two_block_engine() -> Engine {
    let config = Config::builder()
        .size_classes(vec![SizeClass::new(64, 128)])
        .max_chunks_per_class(1)
        .max_value_len(32)
        .build();
    Engine::new(config).unwrap()
}

fn b(s: &'static str) -> Option<Bytes> {
    Some(Bytes::from_static(s.as_bytes()))
}

// =============================================================================
// Visibility Tests
// =============================================================================

#[test]
fn test_txn_own_write_visible_before_commit() {
    let engine = setup_engine();

    let tx1 = engine.begin().unwrap();
    engine.write(tx1, b"x", b"10").unwrap();

    assert_eq!(engine.read(tx1, b"x").unwrap(), b("10"));
    assert_eq!(engine.get(b"x").unwrap(), None);

    let info = engine.commit(tx1).unwrap();
    assert_eq!(info.version, 1);
    assert_eq!(engine.get(b"x").unwrap(), b("10"));
    assert_eq!(engine.transaction_state(tx1).unwrap(), TxnState::Committed);
}

#[test]
fn test_txn_buffered_remove_hides_key() {
    let engine = setup_engine();
    engine.put(b"k", b"v").unwrap();

    let tx = engine.begin().unwrap();
    engine.remove(tx, b"k").unwrap();
    assert_eq!(engine.read(tx, b"k").unwrap(), None);
    assert_eq!(engine.get(b"k").unwrap(), b("v"));

    let info = engine.commit(tx).unwrap();
    assert_eq!(info.writes, vec![(Bytes::from_static(b"k"), Pending::Delete)]);
    assert_eq!(engine.get(b"k").unwrap(), None);
}

#[test]
fn test_txn_snapshot_read_ignores_later_commit() {
    let engine = setup_engine();
    engine.put(b"k", b"0").unwrap();

    let t2 = engine.begin().unwrap();
    let t1 = engine.begin().unwrap();
    engine.write(t1, b"k", b"1").unwrap();
    engine.commit(t1).unwrap();

    assert_eq!(engine.get(b"k").unwrap(), b("1"));
    assert_eq!(engine.read(t2, b"k").unwrap(), b("0"));
    assert_eq!(engine.read(t2, b"k").unwrap(), b("0"));
    engine.abort(t2).unwrap();
}

#[test]
fn test_txn_snapshot_read_ignores_direct_writes() {
    let engine = setup_engine();
    engine.put(b"a", b"before").unwrap();

    let tx = engine.begin().unwrap();
    engine.put(b"a", b"after").unwrap();
    engine.put(b"b", b"new").unwrap();
    engine.delete(b"a").unwrap();

    assert_eq!(engine.read(tx, b"a").unwrap(), b("before"));
    assert_eq!(engine.read(tx, b"b").unwrap(), None);
    assert_eq!(engine.get(b"a").unwrap(), None);
}

#[test]
fn test_txn_read_committed_sees_latest() {
    let engine = setup_engine();
    engine.put(b"k", b"0").unwrap();

    let tx = engine.begin_with(IsolationLevel::ReadCommitted).unwrap();
    assert_eq!(engine.read(tx, b"k").unwrap(), b("0"));

    engine.put(b"k", b"1").unwrap();
    assert_eq!(engine.read(tx, b"k").unwrap(), b("1"));

    // No read validation under ReadCommitted
    engine.write(tx, b"k", b"2").unwrap();
    engine.commit(tx).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), b("2"));
}

// =============================================================================
// Conflict Tests
// =============================================================================

#[test]
fn test_txn_conflict_first_committer_wins() {
    let engine = setup_engine();
    engine.put(b"k", b"0").unwrap();

    let t1 = engine.begin().unwrap();
    let t2 = engine.begin().unwrap();
    engine.read(t1, b"k").unwrap();
    engine.read(t2, b"k").unwrap();

    engine.write(t1, b"k", b"1").unwrap();
    engine.commit(t1).unwrap();

    engine.write(t2, b"k", b"2").unwrap();
    let err = engine.commit(t2).unwrap_err();
    assert!(err.is_retriable());
    assert!(matches!(err, SlabError::Conflict { ref key, .. } if key == b"k"));

    assert_eq!(engine.transaction_state(t2).unwrap(), TxnState::Aborted);
    assert_eq!(engine.get(b"k").unwrap(), b("1"));
    assert_eq!(engine.stats().transactions.conflicts, 1);
}

#[test]
fn test_txn_conflict_from_direct_write() {
    let engine = setup_engine();

    let tx = engine.begin().unwrap();
    assert_eq!(engine.read(tx, b"k").unwrap(), None);
    engine.put(b"k", b"direct").unwrap();
    engine.write(tx, b"k", b"txn").unwrap();

    assert!(matches!(engine.commit(tx), Err(SlabError::Conflict { .. })));
    assert_eq!(engine.get(b"k").unwrap(), b("direct"));
}

#[test]
fn test_txn_blind_writes_do_not_conflict() {
    let engine = setup_engine();

    let t1 = engine.begin().unwrap();
    let t2 = engine.begin().unwrap();
    engine.write(t1, b"k", b"1").unwrap();
    engine.write(t2, b"k", b"2").unwrap();

    engine.commit(t1).unwrap();
    engine.commit(t2).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), b("2"));
}

#[test]
fn test_txn_disjoint_keys_commit() {
    let engine = setup_engine();

    let t1 = engine.begin().unwrap();
    let t2 = engine.begin().unwrap();
    engine.read(t1, b"a").unwrap();
    engine.read(t2, b"b").unwrap();
    engine.write(t1, b"a", b"1").unwrap();
    engine.write(t2, b"b", b"2").unwrap();

    assert_eq!(engine.commit(t1).unwrap().version, 1);
    assert_eq!(engine.commit(t2).unwrap().version, 2);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_txn_abort_discards_writes() {
    let engine = setup_engine();

    let tx = engine.begin().unwrap();
    engine.write(tx, b"k", b"v").unwrap();
    engine.abort(tx).unwrap();

    assert_eq!(engine.get(b"k").unwrap(), None);
    assert_eq!(engine.transaction_state(tx).unwrap(), TxnState::Aborted);
}

#[test]
fn test_txn_operations_on_finished_transaction_fail() {
    let engine = setup_engine();
    let tx = engine.begin().unwrap();
    engine.commit(tx).unwrap();

    let expected = SlabError::InvalidTransactionState {
        id: tx,
        state: TxnState::Committed,
    };
    assert_eq!(engine.read(tx, b"k").unwrap_err(), expected);
    assert_eq!(engine.write(tx, b"k", b"v").unwrap_err(), expected);
    assert_eq!(engine.commit(tx).unwrap_err(), expected);
    assert_eq!(engine.abort(tx).unwrap_err(), expected);
}

#[test]
fn test_txn_unknown_id() {
    let engine = setup_engine();

    assert_eq!(
        engine.read(42, b"k").unwrap_err(),
        SlabError::UnknownTransaction(42)
    );
    assert_eq!(engine.commit(0).unwrap_err(), SlabError::UnknownTransaction(0));
}

#[test]
fn test_txn_ids_increase() {
    let engine = setup_engine();
    let a = engine.begin().unwrap();
    let b = engine.begin().unwrap();
    assert!(b > a);
    assert_eq!(a, 1);
}

#[test]
fn test_txn_read_only_commit_has_no_version() {
    let engine = setup_engine();
    let tx = engine.begin().unwrap();
    engine.read(tx, b"k").unwrap();

    let info = engine.commit(tx).unwrap();
    assert_eq!(info.version, 0);
    assert!(info.writes.is_empty());
}

#[test]
fn test_txn_active_limit() {
    let engine = Engine::new(Config::builder().max_active_transactions(2).build()).unwrap();
    let a = engine.begin().unwrap();
    engine.begin().unwrap();

    assert!(matches!(
        engine.begin(),
        Err(SlabError::CapacityExceeded { limit: 2, .. })
    ));

    engine.abort(a).unwrap();
    engine.begin().unwrap();
}

#[test]
fn test_txn_timeout_aborts_on_next_operation() {
    let engine = Engine::new(
        Config::builder()
            .transaction_timeout(Duration::from_millis(20))
            .build(),
    )
    .unwrap();

    let tx = engine.begin().unwrap();
    engine.write(tx, b"k", b"v").unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(matches!(
        engine.commit(tx),
        Err(SlabError::InvalidTransactionState {
            state: TxnState::Aborted,
            ..
        })
    ));
    assert_eq!(engine.get(b"k").unwrap(), None);
    assert_eq!(engine.stats().transactions.timed_out, 1);
}

#[test]
fn test_txn_reap_expired() {
    let engine = Engine::new(
        Config::builder()
            .transaction_timeout(Duration::from_millis(20))
            .build(),
    )
    .unwrap();

    let old = engine.begin().unwrap();
    thread::sleep(Duration::from_millis(50));
    let fresh = engine.begin().unwrap();

    assert_eq!(engine.reap_expired_transactions(), 1);
    assert_eq!(engine.transaction_state(old).unwrap(), TxnState::Aborted);
    assert_eq!(engine.transaction_state(fresh).unwrap(), TxnState::Active);
}

#[test]
fn test_txn_info_tracks_sets() {
    let engine = setup_engine();
    let tx = engine.begin().unwrap();
    engine.read(tx, b"a").unwrap();
    engine.read(tx, b"a").unwrap();
    engine.write(tx, b"b", b"1").unwrap();

    let info = engine.transaction_info(tx).unwrap();
    assert_eq!(info.reads, 1);
    assert_eq!(info.writes, 1);
    assert_eq!(info.state, TxnState::Active);
    assert_eq!(info.isolation, IsolationLevel::Snapshot);
}

// =============================================================================
// Commit Failure Tests
// =============================================================================

#[test]
fn test_txn_failed_commit_restores_in_place_update() {
    let engine = setup_two_block_engine();
    engine.put(b"a", b"old").unwrap();
    engine.put(b"z", b"keep").unwrap();
    let before = engine.record_info(b"a").unwrap().unwrap();

    let tx = engine.begin().unwrap();
    engine.write(tx, b"a", b"new").unwrap();
    engine.write(tx, b"b", b"x").unwrap();

    assert_eq!(
        engine.commit(tx),
        Err(SlabError::Exhausted {
            block_size: 64,
            chunks: 1
        })
    );

    assert_eq!(engine.get(b"a").unwrap(), b("old"));
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert_eq!(engine.get(b"z").unwrap(), b("keep"));
    assert_eq!(engine.len(), 2);

    let after = engine.record_info(b"a").unwrap().unwrap();
    assert_eq!(after.flags, before.flags);
    assert!(!after.flags.contains(RecordFlags::TXN_WRITTEN));

    assert_eq!(engine.transaction_state(tx).unwrap(), TxnState::Aborted);
    let stats = engine.stats();
    assert_eq!(stats.transactions.version, 0);
    assert_eq!(stats.transactions.version_log_entries, 0);
    assert_eq!(stats.transactions.aborted, 1);
    assert_eq!(stats.pools[0].live, 2);
}

#[test]
fn test_txn_failed_commit_restores_deleted_record_exactly() {
    let engine = setup_two_block_engine();
    engine
        .put_with_ttl(b"a", b"old", Duration::from_secs(3600))
        .unwrap();
    engine.put(b"z", b"keep").unwrap();
    let before = engine.record_info(b"a").unwrap().unwrap();

    // "b" takes the block freed by removing "a", then "c" finds the pool full
    let tx = engine.begin().unwrap();
    engine.remove(tx, b"a").unwrap();
    engine.write(tx, b"b", b"x").unwrap();
    engine.write(tx, b"c", b"y").unwrap();

    assert_eq!(
        engine.commit(tx),
        Err(SlabError::Exhausted {
            block_size: 64,
            chunks: 1
        })
    );

    assert_eq!(engine.get(b"a").unwrap(), b("old"));
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert_eq!(engine.get(b"c").unwrap(), None);
    assert_eq!(engine.get(b"z").unwrap(), b("keep"));
    assert_eq!(engine.len(), 2);

    // Same clock and flags as before the commit, not a fresh default-TTL record
    let after = engine.record_info(b"a").unwrap().unwrap();
    assert_eq!(after.ttl, Some(Duration::from_secs(3600)));
    assert!(after.remaining_ttl.unwrap() <= before.remaining_ttl.unwrap());
    assert!(after.remaining_ttl.unwrap() > Duration::from_secs(3500));
    assert!(after.age >= before.age);
    assert_eq!(after.flags, before.flags);
    assert!(after.flags.contains(RecordFlags::EXPIRING));

    assert_eq!(engine.transaction_state(tx).unwrap(), TxnState::Aborted);
    assert_eq!(engine.stats().transactions.version_log_entries, 0);
    assert_eq!(engine.stats().pools[0].live, 2);
}

#[test]
fn test_txn_commit_after_failed_commit_succeeds() {
    let engine = setup_two_block_engine();
    engine.put(b"a", b"old").unwrap();
    engine.put(b"z", b"keep").unwrap();

    let failed = engine.begin().unwrap();
    engine.remove(failed, b"a").unwrap();
    engine.write(failed, b"b", b"x").unwrap();
    engine.write(failed, b"c", b"y").unwrap();
    assert!(engine.commit(failed).is_err());

    let tx = engine.begin().unwrap();
    engine.remove(tx, b"a").unwrap();
    engine.write(tx, b"b", b"x").unwrap();
    assert_eq!(engine.commit(tx).unwrap().version, 1);

    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), b("x"));
    assert_eq!(engine.get(b"z").unwrap(), b("keep"));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_txn_concurrent_increments_with_retry() {
    let engine = Arc::new(setup_engine());
    engine.put(b"counter", b"0").unwrap();
    let mut handles = vec![];

    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                loop {
                    let tx = engine.begin().unwrap();
                    let current = engine.read(tx, b"counter").unwrap().unwrap();
                    let n: u64 = std::str::from_utf8(&current).unwrap().parse().unwrap();
                    engine
                        .write(tx, b"counter", (n + 1).to_string().as_bytes())
                        .unwrap();
                    match engine.commit(tx) {
                        Ok(_) => break,
                        Err(e) if e.is_retriable() => continue,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.get(b"counter").unwrap(), b("200"));
    let stats = engine.stats().transactions;
    assert_eq!(stats.committed, 200);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.version_log_entries, 0);
}
