//! Record Model
//!
//! The entry representation manipulated by the hash index.
//!
//! ## Layout
//! ```text
//! chain node (in bucket)              pool block
//! ┌─────────────────────────┐         ┌─────────────┬────────────────┐
//! │ hash, key_len, val_len  │ ──────► │ key bytes   │ value bytes    │
//! │ created_at, ttl, flags  │         └─────────────┴────────────────┘
//! │ pin ── readers, retired │
//! └─────────────────────────┘
//! ```
//!
//! A record's block is released only once no reader pin remains. Deleting a
//! pinned record retires it: the node is unlinked immediately and the last
//! [`RecordGuard`] to drop returns the block to the pool.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;
use crate::pool::{BlockHandle, SizeClassAllocator};

// =============================================================================
// Flags
// =============================================================================

/// Record flag bitset
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct RecordFlags(u8);

impl RecordFlags {
    /// Record carries a TTL
    pub const EXPIRING: RecordFlags = RecordFlags(1 << 0);
    /// Stored value was rewritten by a plugin
    pub const TRANSFORMED: RecordFlags = RecordFlags(1 << 1);
    /// Last written by a transaction commit
    pub const TXN_WRITTEN: RecordFlags = RecordFlags(1 << 2);
    /// Payload moved to a new block at least once
    pub const RELOCATED: RecordFlags = RecordFlags(1 << 3);

    pub const fn empty() -> Self {
        RecordFlags(0)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: RecordFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RecordFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: RecordFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: RecordFlags, on: bool) {
        if on {
            self.insert(other)
        } else {
            self.remove(other)
        }
    }
}

impl std::ops::BitOr for RecordFlags {
    type Output = RecordFlags;

    fn bitor(self, rhs: RecordFlags) -> RecordFlags {
        RecordFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for RecordFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(RecordFlags, &str); 4] = [
            (RecordFlags::EXPIRING, "EXPIRING"),
            (RecordFlags::TRANSFORMED, "TRANSFORMED"),
            (RecordFlags::TXN_WRITTEN, "TXN_WRITTEN"),
            (RecordFlags::RELOCATED, "RELOCATED"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "RecordFlags({})", set.join(" | "))
    }
}

// =============================================================================
// Expiry Policy
// =============================================================================

/// How a put treats the record's TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Keep `created_at` and `ttl` of an existing record; new records get
    /// the engine's default TTL
    Keep,

    /// Restart the clock with this TTL (`None` makes the record persistent)
    Refresh(Option<Duration>),
}

// =============================================================================
// Record Image
// =============================================================================

/// Full copy of a live record: value plus the metadata a put would reset
#[derive(Debug, Clone, PartialEq)]
pub struct RecordImage {
    pub value: Bytes,
    pub created_at: Instant,
    pub ttl: Option<Duration>,
    pub flags: RecordFlags,
}

// =============================================================================
// Reader Pins
// =============================================================================

#[derive(Debug, Default)]
struct PinInner {
    readers: usize,
    retired: bool,
}

/// Shared reader count for one payload block
#[derive(Debug, Default)]
pub(crate) struct PinState {
    inner: Mutex<PinInner>,
}

impl PinState {
    fn acquire(&self) {
        self.inner.lock().readers += 1;
    }

    /// Drop one reader; true when the caller must release the block
    fn drop_reader(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.readers -= 1;
        inner.readers == 0 && inner.retired
    }

    /// Mark the block unreachable; true when it can be released right away
    fn retire(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.readers == 0 {
            true
        } else {
            inner.retired = true;
            false
        }
    }

    fn readers(&self) -> usize {
        self.inner.lock().readers
    }

    fn is_retired(&self) -> bool {
        self.inner.lock().retired
    }
}

// =============================================================================
// Record
// =============================================================================

/// A key/value entry whose bytes live in a pool block
#[derive(Debug)]
pub struct Record {
    hash: u64,
    key_len: usize,
    value_len: usize,
    block: BlockHandle,
    created_at: Instant,
    ttl: Option<Duration>,
    flags: RecordFlags,
    pin: Arc<PinState>,
}

impl Record {
    /// Wrap a block that already holds `[key][value]`
    pub(crate) fn new(
        hash: u64,
        key_len: usize,
        value_len: usize,
        block: BlockHandle,
        ttl: Option<Duration>,
        mut flags: RecordFlags,
    ) -> Self {
        flags.set(RecordFlags::EXPIRING, ttl.is_some());
        Self {
            hash,
            key_len,
            value_len,
            block,
            created_at: Instant::now(),
            ttl,
            flags,
            pin: Arc::new(PinState::default()),
        }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn block(&self) -> BlockHandle {
        self.block
    }

    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Outstanding reader pins
    pub fn ref_count(&self) -> usize {
        self.pin.readers()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.created_at) >= ttl)
    }

    /// Exact byte comparison, short-circuited by the stored hash
    pub(crate) fn key_matches(
        &self,
        hash: u64,
        key: &[u8],
        allocator: &SizeClassAllocator,
    ) -> Result<bool> {
        if self.hash != hash || self.key_len != key.len() {
            return Ok(false);
        }
        allocator.with_bytes(self.block, |bytes| &bytes[..self.key_len] == key)
    }

    pub(crate) fn value(&self, allocator: &SizeClassAllocator) -> Result<Bytes> {
        allocator.with_bytes(self.block, |bytes| {
            Bytes::copy_from_slice(&bytes[self.key_len..self.key_len + self.value_len])
        })
    }

    pub(crate) fn key(&self, allocator: &SizeClassAllocator) -> Result<Bytes> {
        allocator.with_bytes(self.block, |bytes| {
            Bytes::copy_from_slice(&bytes[..self.key_len])
        })
    }

    /// Whether the value may be overwritten inside the current block
    pub(crate) fn can_update_in_place(&self, needed: usize, allocator: &SizeClassAllocator) -> bool {
        self.pin.readers() == 0
            && allocator.class_for(needed) == self.block.size_class()
            && allocator.capacity(self.block) >= needed
    }

    /// Record the new value length after an in-place write
    pub(crate) fn set_value_len(&mut self, value_len: usize) {
        self.value_len = value_len;
    }

    /// Point the record at a new block, returning the old block's pin so the
    /// caller can retire it
    pub(crate) fn relocate(&mut self, block: BlockHandle, value_len: usize) -> (BlockHandle, Arc<PinState>) {
        let old_block = std::mem::replace(&mut self.block, block);
        let old_pin = std::mem::replace(&mut self.pin, Arc::new(PinState::default()));
        self.value_len = value_len;
        self.flags.insert(RecordFlags::RELOCATED);
        (old_block, old_pin)
    }

    pub(crate) fn apply_expiry(&mut self, expiry: Expiry) {
        if let Expiry::Refresh(ttl) = expiry {
            self.created_at = Instant::now();
            self.ttl = ttl;
            self.flags.set(RecordFlags::EXPIRING, ttl.is_some());
        }
    }

    /// Copy the value and metadata out of the record
    pub(crate) fn image(&self, allocator: &SizeClassAllocator) -> Result<RecordImage> {
        Ok(RecordImage {
            value: self.value(allocator)?,
            created_at: self.created_at,
            ttl: self.ttl,
            flags: self.flags,
        })
    }

    /// Put back the clock and flags captured in `image`
    pub(crate) fn restore_metadata(&mut self, image: &RecordImage) {
        self.created_at = image.created_at;
        self.ttl = image.ttl;
        self.flags = image.flags;
    }

    pub(crate) fn set_flags(&mut self, flags: RecordFlags) {
        let expiring = self.flags.contains(RecordFlags::EXPIRING);
        let relocated = self.flags.contains(RecordFlags::RELOCATED);
        self.flags = flags;
        self.flags.set(RecordFlags::EXPIRING, expiring);
        self.flags.set(RecordFlags::RELOCATED, relocated);
    }

    /// Take a reader pin on this record's current block
    pub(crate) fn pin(&self, allocator: Arc<SizeClassAllocator>) -> RecordGuard {
        self.pin.acquire();
        RecordGuard {
            allocator,
            pin: Arc::clone(&self.pin),
            block: self.block,
            key_len: self.key_len,
            value_len: self.value_len,
        }
    }

    /// Unlinked from its chain: release now, or defer to the last reader
    pub(crate) fn retire(self, allocator: &SizeClassAllocator) -> Result<()> {
        retire_block(self.block, &self.pin, allocator)
    }

    pub(crate) fn info(&self, now: Instant) -> RecordInfo {
        RecordInfo {
            key_len: self.key_len,
            value_len: self.value_len,
            age: now.saturating_duration_since(self.created_at),
            ttl: self.ttl,
            remaining_ttl: self
                .ttl
                .map(|ttl| ttl.saturating_sub(now.saturating_duration_since(self.created_at))),
            ref_count: self.pin.readers(),
            flags: self.flags,
            size_class: self.block.size_class(),
        }
    }
}

/// Release `block` unless readers still hold `pin`
pub(crate) fn retire_block(
    block: BlockHandle,
    pin: &PinState,
    allocator: &SizeClassAllocator,
) -> Result<()> {
    if pin.retire() {
        allocator.release(block)?;
    }
    Ok(())
}

/// Metadata snapshot of a record (no payload)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordInfo {
    pub key_len: usize,
    pub value_len: usize,
    pub age: Duration,
    pub ttl: Option<Duration>,
    pub remaining_ttl: Option<Duration>,
    pub ref_count: usize,
    pub flags: RecordFlags,
    /// `None` for raw (oversized) allocations
    pub size_class: Option<usize>,
}

// =============================================================================
// Reader Guard
// =============================================================================

/// Reader pin on a record's payload
///
/// While the guard lives the payload block is never returned to the pool,
/// even if the record is deleted or its value replaced. Reads go straight to
/// the block without taking any index lock.
pub struct RecordGuard {
    allocator: Arc<SizeClassAllocator>,
    pin: Arc<PinState>,
    block: BlockHandle,
    key_len: usize,
    value_len: usize,
}

impl RecordGuard {
    pub fn key(&self) -> Result<Bytes> {
        self.allocator
            .with_bytes(self.block, |bytes| Bytes::copy_from_slice(&bytes[..self.key_len]))
    }

    pub fn value(&self) -> Result<Bytes> {
        self.with_value(Bytes::copy_from_slice)
    }

    /// Borrow the value bytes without copying
    pub fn with_value<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let (start, end) = (self.key_len, self.key_len + self.value_len);
        self.allocator.with_bytes(self.block, |bytes| f(&bytes[start..end]))
    }

    pub fn value_len(&self) -> usize {
        self.value_len
    }

    /// Readers currently pinning this payload (including this guard)
    pub fn ref_count(&self) -> usize {
        self.pin.readers()
    }

    /// True once the record was deleted or its value moved elsewhere
    pub fn is_retired(&self) -> bool {
        self.pin.is_retired()
    }
}

impl fmt::Debug for RecordGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordGuard")
            .field("block", &self.block)
            .field("key_len", &self.key_len)
            .field("value_len", &self.value_len)
            .finish()
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        if self.pin.drop_reader() {
            if let Err(e) = self.allocator.release(self.block) {
                tracing::error!(error = %e, "deferred release of retired record failed");
            }
        }
    }
}
