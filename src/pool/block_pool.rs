//! Fixed-size block pool
//!
//! One pool serves exactly one block size. Chunks are acquired with a
//! fallible reservation so that system allocation failure surfaces as
//! `OutOfMemory` instead of aborting the process.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{Result, SlabError};

use super::{MAGIC_FREE, MAGIC_LIVE};

/// A block within one pool, stamped with the generation it was allocated at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolBlock {
    index: u32,
    generation: u32,
}

impl PoolBlock {
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Per-block bookkeeping, kept outside the block memory itself
#[derive(Debug)]
struct BlockHeader {
    magic: u32,
    generation: u32,
    next_free: Option<u32>,
    /// Bytes in use within the block
    len: u32,
}

/// Mutable pool state guarded by the per-class lock
struct PoolInner {
    /// Backing memory, `blocks_per_chunk * block_size` bytes each
    chunks: Vec<Box<[u8]>>,
    /// One header per block across all chunks
    headers: Vec<BlockHeader>,
    free_head: Option<u32>,
    live: usize,
    free: usize,
}

/// Fixed-size block pool
///
/// ## Concurrency:
/// - `inner`: RwLock (allocate/release/write exclusive, reads shared)
/// - lifetime counters: cache-padded atomics, updated outside the lock
pub struct Pool {
    block_size: usize,
    blocks_per_chunk: usize,
    max_chunks: Option<usize>,
    inner: RwLock<PoolInner>,
    total_allocations: CachePadded<AtomicU64>,
    total_releases: CachePadded<AtomicU64>,
}

/// Point-in-time statistics for one pool
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStats {
    pub block_size: usize,
    pub blocks_per_chunk: usize,
    pub chunks: usize,
    /// Blocks currently handed out
    pub live: usize,
    /// Blocks on the free list
    pub free: usize,
    pub total_allocations: u64,
    pub total_releases: u64,
    /// `live / (chunks * blocks_per_chunk)`, 0.0 for an empty pool
    pub utilization: f64,
}

impl PoolStats {
    /// Total blocks this pool can hand out without growing
    pub fn capacity(&self) -> usize {
        self.chunks * self.blocks_per_chunk
    }
}

impl Pool {
    /// Create a pool (no memory is acquired until the first allocation)
    ///
    /// Fails with `InvalidConfig` if `block_size` is zero or a chunk of
    /// `chunk_bytes` cannot hold at least one block.
    pub fn new(block_size: usize, chunk_bytes: usize, max_chunks: Option<usize>) -> Result<Self> {
        if block_size == 0 {
            return Err(SlabError::InvalidConfig(
                "pool block_size must be > 0".to_string(),
            ));
        }
        if block_size > u32::MAX as usize {
            return Err(SlabError::InvalidConfig(format!(
                "pool block_size {} exceeds {}",
                block_size,
                u32::MAX
            )));
        }
        let blocks_per_chunk = chunk_bytes / block_size;
        if blocks_per_chunk == 0 {
            return Err(SlabError::InvalidConfig(format!(
                "chunk of {} bytes cannot hold one {} byte block",
                chunk_bytes, block_size
            )));
        }

        Ok(Self {
            block_size,
            blocks_per_chunk,
            max_chunks,
            inner: RwLock::new(PoolInner {
                chunks: Vec::new(),
                headers: Vec::new(),
                free_head: None,
                live: 0,
                free: 0,
            }),
            total_allocations: CachePadded::new(AtomicU64::new(0)),
            total_releases: CachePadded::new(AtomicU64::new(0)),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn blocks_per_chunk(&self) -> usize {
        self.blocks_per_chunk
    }

    /// Pop a block off the free list, growing by one chunk if it is empty
    pub fn allocate(&self) -> Result<PoolBlock> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        if inner.free_head.is_none() {
            self.acquire_chunk(inner)?;
        }

        let index = inner.free_head.ok_or(SlabError::Exhausted {
            block_size: self.block_size,
            chunks: inner.chunks.len(),
        })?;

        let header = &mut inner.headers[index as usize];
        debug_assert_eq!(header.magic, MAGIC_FREE);
        inner.free_head = header.next_free.take();
        header.magic = MAGIC_LIVE;
        header.generation = header.generation.wrapping_add(1);
        header.len = 0;
        let block = PoolBlock {
            index,
            generation: header.generation,
        };

        inner.live += 1;
        inner.free -= 1;
        drop(guard);

        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        Ok(block)
    }

    /// Push a block back onto the free list head
    ///
    /// Releasing a block that is not live, or a stale handle whose block was
    /// reused since, fails with `DoubleFree` and leaves the pool untouched.
    pub fn release(&self, block: PoolBlock) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let header = Self::live_header_mut(&mut inner.headers, block, self.block_size)?;
        header.magic = MAGIC_FREE;
        header.len = 0;
        header.next_free = inner.free_head;
        inner.free_head = Some(block.index);

        inner.live -= 1;
        inner.free += 1;
        drop(guard);

        self.total_releases.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Copy `parts` back to back into a live block
    pub fn write(&self, block: PoolBlock, parts: &[&[u8]]) -> Result<()> {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        if total > self.block_size {
            return Err(SlabError::InvalidConfig(format!(
                "{} bytes do not fit a {} byte block",
                total, self.block_size
            )));
        }

        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let header = Self::live_header_mut(&mut inner.headers, block, self.block_size)?;
        header.len = total as u32;

        let (chunk, offset) = self.locate(block.index);
        let mut cursor = offset;
        let memory = &mut inner.chunks[chunk];
        for part in parts {
            memory[cursor..cursor + part.len()].copy_from_slice(part);
            cursor += part.len();
        }
        Ok(())
    }

    /// Run `f` over the bytes in use within a live block
    pub fn with_bytes<R>(&self, block: PoolBlock, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let inner = self.inner.read();

        let header = inner
            .headers
            .get(block.index as usize)
            .filter(|h| h.magic == MAGIC_LIVE && h.generation == block.generation)
            .ok_or_else(|| stale(block, self.block_size))?;

        let (chunk, offset) = self.locate(block.index);
        Ok(f(&inner.chunks[chunk][offset..offset + header.len as usize]))
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.read();
        let capacity = inner.chunks.len() * self.blocks_per_chunk;
        PoolStats {
            block_size: self.block_size,
            blocks_per_chunk: self.blocks_per_chunk,
            chunks: inner.chunks.len(),
            live: inner.live,
            free: inner.free,
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            total_releases: self.total_releases.load(Ordering::Relaxed),
            utilization: if capacity == 0 {
                0.0
            } else {
                inner.live as f64 / capacity as f64
            },
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Acquire one chunk and link all its blocks onto the free list
    fn acquire_chunk(&self, inner: &mut PoolInner) -> Result<()> {
        let chunks = inner.chunks.len();
        if self.max_chunks.is_some_and(|max| chunks >= max)
            || inner.headers.len() + self.blocks_per_chunk > u32::MAX as usize
        {
            return Err(SlabError::Exhausted {
                block_size: self.block_size,
                chunks,
            });
        }

        let bytes = self.blocks_per_chunk * self.block_size;
        let oom = |_| SlabError::OutOfMemory { requested: bytes };

        let mut memory: Vec<u8> = Vec::new();
        memory.try_reserve_exact(bytes).map_err(oom)?;
        memory.resize(bytes, 0);
        inner
            .headers
            .try_reserve_exact(self.blocks_per_chunk)
            .map_err(oom)?;
        inner.chunks.try_reserve(1).map_err(oom)?;

        let base = inner.headers.len() as u32;
        let last = base + self.blocks_per_chunk as u32 - 1;
        for index in base..=last {
            inner.headers.push(BlockHeader {
                magic: MAGIC_FREE,
                generation: 0,
                next_free: if index == last {
                    inner.free_head
                } else {
                    Some(index + 1)
                },
                len: 0,
            });
        }
        inner.free_head = Some(base);
        inner.chunks.push(memory.into_boxed_slice());
        inner.free += self.blocks_per_chunk;

        tracing::debug!(
            block_size = self.block_size,
            chunks = inner.chunks.len(),
            blocks = self.blocks_per_chunk,
            "pool acquired chunk"
        );
        Ok(())
    }

    /// Chunk number and byte offset of a block
    fn locate(&self, index: u32) -> (usize, usize) {
        let index = index as usize;
        (
            index / self.blocks_per_chunk,
            (index % self.blocks_per_chunk) * self.block_size,
        )
    }

    fn live_header_mut(
        headers: &mut [BlockHeader],
        block: PoolBlock,
        block_size: usize,
    ) -> Result<&mut BlockHeader> {
        headers
            .get_mut(block.index as usize)
            .filter(|h| h.magic == MAGIC_LIVE && h.generation == block.generation)
            .ok_or_else(|| stale(block, block_size))
    }
}

fn stale(block: PoolBlock, block_size: usize) -> SlabError {
    SlabError::DoubleFree(format!(
        "block {} (generation {}) in {} B pool is not live",
        block.index, block.generation, block_size
    ))
}
