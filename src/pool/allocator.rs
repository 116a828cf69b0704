//! Size-class allocator
//!
//! Routes each request to the smallest pool whose block fits, and falls back
//! to a class-less raw path for anything larger than the biggest class.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::SizeClass;
use crate::error::{Result, SlabError};

use super::{BlockHandle, Pool, PoolStats, MAGIC_FREE, MAGIC_LIVE};

/// Allocator over a fixed set of size classes plus a raw fallback
pub struct SizeClassAllocator {
    /// Pools ordered by ascending block size
    pools: Vec<Pool>,

    /// Oversized allocations
    raw: RawArena,
}

/// Statistics for every size class and the raw path
#[derive(Debug, Clone, Serialize)]
pub struct AllocatorStats {
    pub classes: Vec<PoolStats>,
    pub raw: RawStats,
}

/// Statistics for the class-less raw path
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RawStats {
    pub live: usize,
    pub live_bytes: usize,
    pub total_allocations: u64,
    pub total_releases: u64,
}

impl SizeClassAllocator {
    /// Build one pool per size class
    pub fn new(classes: &[SizeClass], max_chunks_per_class: Option<usize>) -> Result<Self> {
        if classes.is_empty() {
            return Err(SlabError::InvalidConfig(
                "allocator needs at least one size class".to_string(),
            ));
        }
        if classes.len() > u8::MAX as usize {
            return Err(SlabError::InvalidConfig(format!(
                "at most {} size classes are supported",
                u8::MAX
            )));
        }

        let pools = classes
            .iter()
            .map(|class| Pool::new(class.block_size, class.chunk_bytes, max_chunks_per_class))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pools,
            raw: RawArena::default(),
        })
    }

    /// Index of the smallest class that holds `size` bytes
    pub fn class_for(&self, size: usize) -> Option<usize> {
        self.pools.iter().position(|pool| pool.block_size() >= size)
    }

    /// Allocate a block able to hold `size` bytes
    pub fn allocate(&self, size: usize) -> Result<BlockHandle> {
        match self.class_for(size) {
            Some(class) => Ok(BlockHandle::Pooled {
                class: class as u8,
                block: self.pools[class].allocate()?,
            }),
            None => self.raw.allocate(size),
        }
    }

    /// Return a block to its pool (or free a raw allocation)
    pub fn release(&self, handle: BlockHandle) -> Result<()> {
        match handle {
            BlockHandle::Pooled { class, block } => self.pool(class)?.release(block),
            BlockHandle::Raw { slot, generation } => self.raw.release(slot, generation),
        }
    }

    /// Copy `parts` back to back into a live block
    pub fn write(&self, handle: BlockHandle, parts: &[&[u8]]) -> Result<()> {
        match handle {
            BlockHandle::Pooled { class, block } => self.pool(class)?.write(block, parts),
            BlockHandle::Raw { slot, generation } => self.raw.write(slot, generation, parts),
        }
    }

    /// Run `f` over the bytes in use within a live block
    pub fn with_bytes<R>(&self, handle: BlockHandle, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        match handle {
            BlockHandle::Pooled { class, block } => self.pool(class)?.with_bytes(block, f),
            BlockHandle::Raw { slot, generation } => self.raw.with_bytes(slot, generation, f),
        }
    }

    /// Bytes a block can hold
    pub fn capacity(&self, handle: BlockHandle) -> usize {
        match handle {
            BlockHandle::Pooled { class, .. } => self
                .pools
                .get(class as usize)
                .map(Pool::block_size)
                .unwrap_or(0),
            BlockHandle::Raw { slot, .. } => self.raw.capacity(slot),
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            classes: self.pools.iter().map(Pool::stats).collect(),
            raw: self.raw.stats(),
        }
    }

    fn pool(&self, class: u8) -> Result<&Pool> {
        self.pools.get(class as usize).ok_or_else(|| {
            SlabError::DoubleFree(format!("handle names unknown size class {}", class))
        })
    }
}

// =============================================================================
// Raw Allocation Path
// =============================================================================

struct RawSlot {
    magic: u32,
    generation: u32,
    memory: Box<[u8]>,
    len: usize,
}

#[derive(Default)]
struct RawInner {
    slots: Vec<RawSlot>,
    vacant: Vec<u32>,
    live: usize,
    live_bytes: usize,
}

/// Slab of individually allocated oversized buffers
#[derive(Default)]
struct RawArena {
    inner: RwLock<RawInner>,
    total_allocations: CachePadded<AtomicU64>,
    total_releases: CachePadded<AtomicU64>,
}

impl RawArena {
    fn allocate(&self, size: usize) -> Result<BlockHandle> {
        let mut memory: Vec<u8> = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| SlabError::OutOfMemory { requested: size })?;
        memory.resize(size, 0);
        let memory = memory.into_boxed_slice();

        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let slot = match inner.vacant.pop() {
            Some(slot) => {
                let entry = &mut inner.slots[slot as usize];
                entry.magic = MAGIC_LIVE;
                entry.generation = entry.generation.wrapping_add(1);
                entry.memory = memory;
                entry.len = 0;
                slot
            }
            None => {
                if inner.slots.len() >= u32::MAX as usize {
                    return Err(SlabError::OutOfMemory { requested: size });
                }
                inner.slots.push(RawSlot {
                    magic: MAGIC_LIVE,
                    generation: 1,
                    memory,
                    len: 0,
                });
                (inner.slots.len() - 1) as u32
            }
        };
        let generation = inner.slots[slot as usize].generation;
        inner.live += 1;
        inner.live_bytes += size;
        drop(guard);

        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        Ok(BlockHandle::Raw { slot, generation })
    }

    fn release(&self, slot: u32, generation: u32) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let entry = live_slot_mut(&mut inner.slots, slot, generation)?;
        entry.magic = MAGIC_FREE;
        let freed = std::mem::take(&mut entry.memory);
        entry.len = 0;
        inner.vacant.push(slot);
        inner.live -= 1;
        inner.live_bytes -= freed.len();
        drop(guard);

        self.total_releases.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, slot: u32, generation: u32, parts: &[&[u8]]) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = live_slot_mut(&mut inner.slots, slot, generation)?;

        let total: usize = parts.iter().map(|p| p.len()).sum();
        if total > entry.memory.len() {
            return Err(SlabError::InvalidConfig(format!(
                "{} bytes do not fit a {} byte raw block",
                total,
                entry.memory.len()
            )));
        }

        let mut cursor = 0;
        for part in parts {
            entry.memory[cursor..cursor + part.len()].copy_from_slice(part);
            cursor += part.len();
        }
        entry.len = total;
        Ok(())
    }

    fn with_bytes<R>(&self, slot: u32, generation: u32, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let inner = self.inner.read();
        let entry = inner
            .slots
            .get(slot as usize)
            .filter(|e| e.magic == MAGIC_LIVE && e.generation == generation)
            .ok_or_else(|| stale_raw(slot, generation))?;
        Ok(f(&entry.memory[..entry.len]))
    }

    fn capacity(&self, slot: u32) -> usize {
        self.inner
            .read()
            .slots
            .get(slot as usize)
            .map(|e| e.memory.len())
            .unwrap_or(0)
    }

    fn stats(&self) -> RawStats {
        let inner = self.inner.read();
        RawStats {
            live: inner.live,
            live_bytes: inner.live_bytes,
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            total_releases: self.total_releases.load(Ordering::Relaxed),
        }
    }
}

fn live_slot_mut(slots: &mut [RawSlot], slot: u32, generation: u32) -> Result<&mut RawSlot> {
    slots
        .get_mut(slot as usize)
        .filter(|e| e.magic == MAGIC_LIVE && e.generation == generation)
        .ok_or_else(|| stale_raw(slot, generation))
}

fn stale_raw(slot: u32, generation: u32) -> SlabError {
    SlabError::DoubleFree(format!(
        "raw slot {} (generation {}) is not live",
        slot, generation
    ))
}
