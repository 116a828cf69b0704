//! Tests for the pool allocator
//!
//! These tests verify:
//! - Chunk growth and block reuse
//! - Double-free and stale-handle detection
//! - Chunk limits (Exhausted) and invalid geometry (InvalidConfig)
//! - Size-class routing and the raw path
//! - The live-block bound under arbitrary allocate/release sequences
//! - Concurrent allocation across threads

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use slabkv::config::SizeClass;
use slabkv::pool::{BlockHandle, Pool, SizeClassAllocator};
use slabkv::SlabError;

// =============================================================================
// Helper Functions
// =============================================================================

fn small_pool() -> Pool {
    // 4 blocks of 16 bytes per chunk
    Pool::new(16, 64, None).unwrap()
}

fn three_classes() -> SizeClassAllocator {
    SizeClassAllocator::new(
        &[
            SizeClass::new(64, 1024),
            SizeClass::new(512, 4096),
            SizeClass::new(4096, 16 * 1024),
        ],
        None,
    )
    .unwrap()
}

// =============================================================================
// Pool Tests
// =============================================================================

#[test]
fn test_pool_acquires_chunks_lazily() {
    let pool = small_pool();
    assert_eq!(pool.stats().chunks, 0);

    let first = pool.allocate().unwrap();
    let stats = pool.stats();
    assert_eq!(stats.chunks, 1);
    assert_eq!(stats.live, 1);
    assert_eq!(stats.free, 3);

    pool.release(first).unwrap();
    assert_eq!(pool.stats().live, 0);
}

#[test]
fn test_pool_grows_by_whole_chunks() {
    let pool = small_pool();
    let blocks: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();

    let stats = pool.stats();
    assert_eq!(stats.chunks, 2);
    assert_eq!(stats.live, 5);
    assert_eq!(stats.free, 3);
    assert_eq!(stats.capacity(), 8);

    let unique: HashSet<u32> = blocks.iter().map(|b| b.index()).collect();
    assert_eq!(unique.len(), 5);
}

#[test]
fn test_pool_reuses_released_block_first() {
    let pool = small_pool();
    let a = pool.allocate().unwrap();
    let _b = pool.allocate().unwrap();

    pool.release(a).unwrap();
    let c = pool.allocate().unwrap();

    assert_eq!(c.index(), a.index());
    assert_ne!(c, a, "reused block must carry a new generation");
}

#[test]
fn test_pool_double_free_is_detected() {
    let pool = small_pool();
    let block = pool.allocate().unwrap();
    pool.release(block).unwrap();

    let before = pool.stats();
    assert!(matches!(pool.release(block), Err(SlabError::DoubleFree(_))));

    let after = pool.stats();
    assert_eq!(before.free, after.free);
    assert_eq!(before.live, after.live);
}

#[test]
fn test_pool_stale_handle_after_reuse_is_rejected() {
    let pool = small_pool();
    let stale = pool.allocate().unwrap();
    pool.release(stale).unwrap();
    let fresh = pool.allocate().unwrap();

    assert!(matches!(pool.release(stale), Err(SlabError::DoubleFree(_))));
    assert!(pool.with_bytes(stale, |_| ()).is_err());
    pool.release(fresh).unwrap();
}

#[test]
fn test_pool_write_and_read_back() {
    let pool = small_pool();
    let block = pool.allocate().unwrap();

    pool.write(block, &[b"key", b"value"]).unwrap();
    let bytes = pool.with_bytes(block, |b| b.to_vec()).unwrap();
    assert_eq!(bytes, b"keyvalue");

    assert!(pool.write(block, &[&[0u8; 17]]).is_err());
}

#[test]
fn test_pool_max_chunks_exhausted() {
    let pool = Pool::new(16, 64, Some(1)).unwrap();
    for _ in 0..4 {
        pool.allocate().unwrap();
    }

    assert_eq!(
        pool.allocate(),
        Err(SlabError::Exhausted {
            block_size: 16,
            chunks: 1
        })
    );
}

#[test]
fn test_pool_invalid_geometry() {
    assert!(matches!(Pool::new(0, 64, None), Err(SlabError::InvalidConfig(_))));
    assert!(matches!(Pool::new(128, 64, None), Err(SlabError::InvalidConfig(_))));
}

// =============================================================================
// Size-Class Allocator Tests
// =============================================================================

#[test]
fn test_allocator_routes_to_smallest_fitting_class() {
    let allocator = three_classes();

    assert_eq!(allocator.class_for(1), Some(0));
    assert_eq!(allocator.class_for(64), Some(0));
    assert_eq!(allocator.class_for(65), Some(1));
    assert_eq!(allocator.class_for(4096), Some(2));
    assert_eq!(allocator.class_for(4097), None);

    let handle = allocator.allocate(300).unwrap();
    assert_eq!(handle.size_class(), Some(1));
    assert_eq!(allocator.capacity(handle), 512);
}

#[test]
fn test_allocator_raw_path_for_oversized_requests() {
    let allocator = three_classes();
    let payload = vec![7u8; 10_000];

    let handle = allocator.allocate(payload.len()).unwrap();
    assert!(matches!(handle, BlockHandle::Raw { .. }));
    allocator.write(handle, &[&payload]).unwrap();
    assert_eq!(
        allocator.with_bytes(handle, |b| b.len()).unwrap(),
        payload.len()
    );

    let stats = allocator.stats();
    assert_eq!(stats.raw.live, 1);
    assert_eq!(stats.raw.live_bytes, 10_000);

    allocator.release(handle).unwrap();
    assert!(matches!(
        allocator.release(handle),
        Err(SlabError::DoubleFree(_))
    ));
    assert_eq!(allocator.stats().raw.live, 0);
}

#[test]
fn test_allocator_rejects_empty_class_list() {
    assert!(matches!(
        SizeClassAllocator::new(&[], None),
        Err(SlabError::InvalidConfig(_))
    ));
}

#[test]
fn test_allocator_concurrent_allocations_are_distinct() {
    let allocator = Arc::new(three_classes());
    let mut handles = vec![];

    for _ in 0..4 {
        let allocator = Arc::clone(&allocator);
        handles.push(thread::spawn(move || {
            (0..200)
                .map(|_| allocator.allocate(32).unwrap())
                .collect::<Vec<_>>()
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for block in handle.join().unwrap() {
            assert!(seen.insert(block), "block handed out twice");
        }
    }

    let stats = &allocator.stats().classes[0];
    assert_eq!(stats.live, 800);
    assert!(stats.live <= stats.capacity());
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #[test]
    fn prop_live_blocks_never_exceed_capacity(ops in prop::collection::vec(any::<bool>(), 1..300)) {
        let pool = Pool::new(32, 256, None).unwrap();
        let mut live = Vec::new();

        for allocate in ops {
            if allocate || live.is_empty() {
                live.push(pool.allocate().unwrap());
            } else {
                pool.release(live.swap_remove(0)).unwrap();
            }

            let stats = pool.stats();
            prop_assert_eq!(stats.live, live.len());
            prop_assert!(stats.live <= stats.chunks * stats.blocks_per_chunk);
            prop_assert_eq!(stats.live + stats.free, stats.capacity());
        }
    }
}
