//! Hash index implementation
//!
//! Chained buckets behind a table-wide RwLock with one Mutex per bucket.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, SlabError};
use crate::pool::SizeClassAllocator;
use crate::record::{
    retire_block, Expiry, Record, RecordFlags, RecordGuard, RecordImage, RecordInfo,
};

use super::bucket::{Bucket, Position};
use super::HashAlgorithm;

/// Settings the index needs from the engine config
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub initial_bucket_count: usize,
    pub max_load_factor: f64,
    pub hash_algorithm: HashAlgorithm,
    pub max_key_len: usize,
    pub max_value_len: usize,
    pub default_ttl: Option<Duration>,
}

/// Whether a put created a record or replaced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Updated,
}

struct Table {
    buckets: Box<[Mutex<Bucket>]>,
}

impl Table {
    fn with_buckets(count: usize) -> Self {
        Self {
            buckets: (0..count).map(|_| Mutex::new(Bucket::default())).collect(),
        }
    }

    #[inline]
    fn bucket_for(&self, hash: u64) -> &Mutex<Bucket> {
        &self.buckets[(hash % self.buckets.len() as u64) as usize]
    }
}

/// Chained, resizable hash index from key bytes to records
///
/// ## Concurrency:
/// - `table`: RwLock, always acquired before any bucket lock
///   - point operations (put/get/delete/pin) hold it shared
///   - resize holds it exclusive, so no operation ever observes a
///     partially rehashed table
/// - each bucket: its own Mutex, so disjoint buckets proceed in parallel
/// - `entry_count`, `bucket_count`: atomics readable without any lock
pub struct HashIndex {
    table: RwLock<Table>,
    allocator: Arc<SizeClassAllocator>,
    options: IndexOptions,
    entry_count: AtomicUsize,
    bucket_count: AtomicUsize,
    resize_count: AtomicU64,
}

impl HashIndex {
    pub fn new(options: IndexOptions, allocator: Arc<SizeClassAllocator>) -> Result<Self> {
        if options.initial_bucket_count == 0 {
            return Err(SlabError::InvalidConfig(
                "initial_bucket_count must be > 0".to_string(),
            ));
        }
        if !options.max_load_factor.is_finite() || options.max_load_factor <= 0.0 {
            return Err(SlabError::InvalidConfig(format!(
                "max_load_factor must be a positive number, got {}",
                options.max_load_factor
            )));
        }

        Ok(Self {
            table: RwLock::new(Table::with_buckets(options.initial_bucket_count)),
            bucket_count: AtomicUsize::new(options.initial_bucket_count),
            allocator,
            options,
            entry_count: AtomicUsize::new(0),
            resize_count: AtomicU64::new(0),
        })
    }

    /// Reject oversized keys/values before anything is allocated
    pub fn validate(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if key.len() > self.options.max_key_len {
            return Err(SlabError::KeyTooLarge {
                len: key.len(),
                max: self.options.max_key_len,
            });
        }
        if let Some(value) = value {
            if value.len() > self.options.max_value_len {
                return Err(SlabError::ValueTooLarge {
                    len: value.len(),
                    max: self.options.max_value_len,
                });
            }
        }
        Ok(())
    }

    pub fn hash(&self, key: &[u8]) -> u64 {
        self.options.hash_algorithm.hash(key)
    }

    /// Insert or replace the value for `key`
    ///
    /// Steps:
    /// 1. Validate lengths (no allocation on failure)
    /// 2. Lock table (shared) then the target bucket
    /// 3. Update the matching record, or allocate and link a new one
    /// 4. Release locks and evaluate the resize policy
    pub fn put(
        &self,
        key: &[u8],
        value: &[u8],
        expiry: Expiry,
        flags: RecordFlags,
    ) -> Result<PutOutcome> {
        self.validate(key, Some(value))?;
        let hash = self.hash(key);
        let needed = key.len() + value.len();

        let outcome = {
            let table = self.table.read();
            let mut bucket = table.bucket_for(hash).lock();

            match self.locate_live(&mut bucket, hash, key)? {
                Some(position) => {
                    self.update(bucket.record_mut(position.slot), key, value, needed)?;
                    let record = bucket.record_mut(position.slot);
                    record.apply_expiry(expiry);
                    record.set_flags(flags);
                    PutOutcome::Updated
                }
                None => {
                    let block = self.allocator.allocate(needed)?;
                    if let Err(e) = self.allocator.write(block, &[key, value]) {
                        self.allocator.release(block)?;
                        return Err(e);
                    }
                    let ttl = match expiry {
                        Expiry::Keep => self.options.default_ttl,
                        Expiry::Refresh(ttl) => ttl,
                    };
                    bucket.push_front(Record::new(hash, key.len(), value.len(), block, ttl, flags));
                    self.entry_count.fetch_add(1, Ordering::AcqRel);
                    PutOutcome::Inserted
                }
            }
        };

        if outcome == PutOutcome::Inserted && self.over_threshold() {
            self.resize();
        }
        Ok(outcome)
    }

    /// Look up the value for `key`; expired records read as absent
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let hash = self.hash(key);
        let table = self.table.read();
        let mut bucket = table.bucket_for(hash).lock();

        match self.locate_live(&mut bucket, hash, key)? {
            Some(position) => Ok(Some(bucket.record(position.slot).value(&self.allocator)?)),
            None => Ok(None),
        }
    }

    /// Pin the record for `key` so its payload can be read lock-free
    pub fn pin(&self, key: &[u8]) -> Result<Option<RecordGuard>> {
        let hash = self.hash(key);
        let table = self.table.read();
        let mut bucket = table.bucket_for(hash).lock();

        Ok(self
            .locate_live(&mut bucket, hash, key)?
            .map(|position| {
                bucket
                    .record(position.slot)
                    .pin(Arc::clone(&self.allocator))
            }))
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        let hash = self.hash(key);
        let table = self.table.read();
        let mut bucket = table.bucket_for(hash).lock();
        Ok(self.locate_live(&mut bucket, hash, key)?.is_some())
    }

    /// Metadata for `key` without copying the value
    pub fn record_info(&self, key: &[u8]) -> Result<Option<RecordInfo>> {
        let hash = self.hash(key);
        let table = self.table.read();
        let mut bucket = table.bucket_for(hash).lock();

        Ok(self
            .locate_live(&mut bucket, hash, key)?
            .map(|position| bucket.record(position.slot).info(Instant::now())))
    }

    /// Unlink and release the record for `key`
    ///
    /// Returns `false` if the key was absent (or already expired). A pinned
    /// record is unlinked now and released when its last reader drops.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let hash = self.hash(key);
        let table = self.table.read();
        let mut bucket = table.bucket_for(hash).lock();

        match self.locate_live(&mut bucket, hash, key)? {
            Some(position) => {
                let record = bucket.unlink(position);
                self.entry_count.fetch_sub(1, Ordering::AcqRel);
                record.retire(&self.allocator)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Value and metadata of `key`, for an exact restore later
    pub fn image(&self, key: &[u8]) -> Result<Option<RecordImage>> {
        let hash = self.hash(key);
        let table = self.table.read();
        let mut bucket = table.bucket_for(hash).lock();

        match self.locate_live(&mut bucket, hash, key)? {
            Some(position) => Ok(Some(bucket.record(position.slot).image(&self.allocator)?)),
            None => Ok(None),
        }
    }

    /// Return `key` to a state captured by [`HashIndex::image`]
    ///
    /// `None` removes the key. `Some` writes the value back and restores
    /// `created_at`, `ttl` and flags exactly, so the remaining TTL is what
    /// it was at capture time.
    pub fn restore(&self, key: &[u8], image: Option<&RecordImage>) -> Result<()> {
        let Some(image) = image else {
            return self.delete(key).map(|_| ());
        };

        let hash = self.hash(key);
        let needed = key.len() + image.value.len();
        let table = self.table.read();
        let mut bucket = table.bucket_for(hash).lock();

        match self.locate_live(&mut bucket, hash, key)? {
            Some(position) => {
                self.update(bucket.record_mut(position.slot), key, &image.value, needed)?;
                bucket.record_mut(position.slot).restore_metadata(image);
            }
            None => {
                let block = self.allocator.allocate(needed)?;
                if let Err(e) = self.allocator.write(block, &[key, &image.value]) {
                    self.allocator.release(block)?;
                    return Err(e);
                }
                let mut record =
                    Record::new(hash, key.len(), image.value.len(), block, image.ttl, image.flags);
                record.restore_metadata(image);
                bucket.push_front(record);
                self.entry_count.fetch_add(1, Ordering::AcqRel);
            }
        }
        Ok(())
    }

    /// Sweep every bucket for expired records; returns how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let table = self.table.read();
        let mut purged = 0;

        for bucket in table.buckets.iter() {
            let expired = bucket.lock().remove_expired(now);
            purged += expired.len();
            self.entry_count.fetch_sub(expired.len(), Ordering::AcqRel);
            for record in expired {
                record.retire(&self.allocator)?;
            }
        }

        if purged > 0 {
            tracing::debug!(purged, "purged expired records");
        }
        Ok(purged)
    }

    /// Grow the bucket array until the load factor is back under the limit
    ///
    /// Stop-the-world: holds the table lock exclusively while every record is
    /// relinked into its new chain. Payload blocks never move. Returns
    /// `false` if no resize was needed or the larger bucket array could not
    /// be allocated, in which case the old table stays in service.
    pub fn resize(&self) -> bool {
        let mut table = self.table.write();

        let entries = self.entry_count.load(Ordering::Acquire);
        let current = table.buckets.len();
        let mut target = current;
        while entries as f64 / target as f64 > self.options.max_load_factor {
            match target.checked_mul(2) {
                Some(next) => target = next,
                None => break,
            }
        }
        if target == current {
            return false;
        }

        let mut fresh: Vec<Mutex<Bucket>> = Vec::new();
        if let Err(e) = fresh.try_reserve_exact(target) {
            tracing::warn!(
                from = current,
                to = target,
                error = %e,
                "resize skipped: cannot allocate bucket array"
            );
            return false;
        }
        fresh.extend((0..target).map(|_| Mutex::new(Bucket::default())));

        for bucket in table.buckets.iter_mut() {
            for record in bucket.get_mut().drain() {
                let index = (record.hash() % target as u64) as usize;
                fresh[index].get_mut().push_front(record);
            }
        }

        table.buckets = fresh.into_boxed_slice();
        self.bucket_count.store(target, Ordering::Release);
        self.resize_count.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(from = current, to = target, entries, "hash index resized");
        true
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count.load(Ordering::Acquire)
    }

    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.bucket_count() as f64
    }

    pub fn resize_count(&self) -> u64 {
        self.resize_count.load(Ordering::Relaxed)
    }

    /// Length of the longest chain (scans every bucket)
    pub fn longest_chain(&self) -> usize {
        let table = self.table.read();
        table
            .buckets
            .iter()
            .map(|b| b.lock().len())
            .max()
            .unwrap_or(0)
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn allocator(&self) -> &Arc<SizeClassAllocator> {
        &self.allocator
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn over_threshold(&self) -> bool {
        self.load_factor() > self.options.max_load_factor
    }

    /// Locate `key`, lazily unlinking it if its TTL has elapsed
    fn locate_live(&self, bucket: &mut Bucket, hash: u64, key: &[u8]) -> Result<Option<Position>> {
        let Some(position) = bucket.locate(hash, key, &self.allocator)? else {
            return Ok(None);
        };
        if !bucket.record(position.slot).is_expired(Instant::now()) {
            return Ok(Some(position));
        }

        let expired = bucket.unlink(position);
        self.entry_count.fetch_sub(1, Ordering::AcqRel);
        expired.retire(&self.allocator)?;
        Ok(None)
    }

    /// Replace a record's value, in place when the block allows it
    fn update(&self, record: &mut Record, key: &[u8], value: &[u8], needed: usize) -> Result<()> {
        if record.can_update_in_place(needed, &self.allocator) {
            self.allocator.write(record.block(), &[key, value])?;
            record.set_value_len(value.len());
            return Ok(());
        }

        // Copy-on-write: readers pinning the old block keep seeing the old value.
        let block = self.allocator.allocate(needed)?;
        if let Err(e) = self.allocator.write(block, &[key, value]) {
            self.allocator.release(block)?;
            return Err(e);
        }
        let (old_block, old_pin) = record.relocate(block, value.len());
        retire_block(old_block, &old_pin, &self.allocator)
    }
}
