//! Pool Allocator Module
//!
//! Fixed-size-class memory provider. Every record payload in the engine is
//! allocated through here.
//!
//! ## Responsibilities
//! - O(1) allocate/release for fixed block sizes
//! - Amortize backing memory acquisition by growing in whole chunks
//! - Detect double release instead of corrupting the free list
//! - Route requests to the smallest size class that fits
//!
//! ## Layout
//! ```text
//! Pool (block_size = 64)
//! ┌──────────────────────────────────────────────────────┐
//! │ chunk 0: [blk 0][blk 1][blk 2] ... [blk n-1]         │
//! │ chunk 1: [blk n][blk n+1]      ... [blk 2n-1]        │
//! └──────────────────────────────────────────────────────┘
//! headers: one per block { magic, generation, next_free, len }
//!
//! free_head ──► blk 5 ──► blk 2 ──► blk n+1 ──► ∅
//! ```
//!
//! A block is either on the free list (`MAGIC_FREE`) or live
//! (`MAGIC_LIVE`). Handles carry the generation stamped at allocation, so a
//! stale handle for a block that has since been reused is also rejected.

mod allocator;
mod block_pool;

pub use allocator::{AllocatorStats, RawStats, SizeClassAllocator};
pub use block_pool::{Pool, PoolBlock, PoolStats};

/// Header magic for a block handed out to an owner
pub(crate) const MAGIC_LIVE: u32 = 0xB10C_A11C;

/// Header magic for a block sitting on a free list
pub(crate) const MAGIC_FREE: u32 = 0xF4EE_B10C;

/// Opaque reference to an allocated block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockHandle {
    /// Block served by the pool for size class `class`
    Pooled { class: u8, block: PoolBlock },

    /// Class-less allocation for requests larger than every size class
    Raw { slot: u32, generation: u32 },
}

impl BlockHandle {
    /// Size class index, or `None` for raw allocations
    pub fn size_class(&self) -> Option<usize> {
        match self {
            BlockHandle::Pooled { class, .. } => Some(*class as usize),
            BlockHandle::Raw { .. } => None,
        }
    }
}
