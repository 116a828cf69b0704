//! Transaction manager for coordinating commit operations
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Acquire commit lock (serializes validate → apply)
//! 2. Validate read set against the version log
//! 3. IF conflict: mark Aborted, return Conflict
//! 4. Allocate commit version
//! 5. Record before-images of every written key
//! 6. Apply write set to the hash index; on failure undo the applied keys
//!    newest first, so blocks they took are free again for the restores
//! 7. Publish the version, mark Committed
//! 8. Prune the version log
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::{Result, SlabError};
use crate::index::HashIndex;
use crate::record::{Expiry, RecordFlags, RecordImage};

use super::version_log::VersionLog;
use super::{CommitInfo, IsolationLevel, Pending, Transaction, TxnId, TxnInfo, TxnState};

/// How many terminal outcomes are remembered for error reporting
const FINISHED_HISTORY: usize = 4096;

/// Record state of one written key before a commit touched it
type BeforeImage = (Bytes, Option<RecordImage>);

/// Transaction limits taken from the engine config
#[derive(Debug, Clone)]
pub struct TxnOptions {
    pub max_active: usize,
    pub timeout: Option<Duration>,
}

/// Entry in the active table. `start_version` and `started` never change,
/// so they are readable without locking the transaction itself.
struct ActiveEntry {
    start_version: u64,
    started: Instant,
    handle: Arc<Mutex<Transaction>>,
}

#[derive(Default)]
struct FinishedLog {
    states: HashMap<TxnId, TxnState>,
    order: VecDeque<TxnId>,
}

impl FinishedLog {
    fn push(&mut self, id: TxnId, state: TxnState) {
        self.states.insert(id, state);
        self.order.push_back(id);
        while self.order.len() > FINISHED_HISTORY {
            if let Some(oldest) = self.order.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }
}

#[derive(Default)]
struct TxnCounters {
    begun: CachePadded<AtomicU64>,
    committed: CachePadded<AtomicU64>,
    aborted: CachePadded<AtomicU64>,
    conflicts: CachePadded<AtomicU64>,
    timed_out: CachePadded<AtomicU64>,
}

/// Transaction throughput and state counters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TxnStats {
    pub begun: u64,
    pub committed: u64,
    pub aborted: u64,
    pub conflicts: u64,
    pub timed_out: u64,
    pub active: usize,
    /// Last published commit version
    pub version: u64,
    /// Before-images currently retained for active snapshots
    pub version_log_entries: usize,
    /// Commits per second since the manager was created
    pub commits_per_sec: f64,
}

/// Manages transaction lifecycle and atomic commits
///
/// # Thread Safety
///
/// - `active`: Mutex over the id → transaction table, held only briefly
/// - each transaction: its own Mutex, taken by the owner's calls
/// - `commit_lock`: serializes validation and apply across commits and
///   logged direct writes, so nothing changes between the check and the write
/// - `write_gate`: direct writes hold it shared; `begin` holds it exclusive
///   so a new snapshot never races an unlogged direct write
/// - `log`: RwLock over before-images; readers consult it after reading the
///   index, committers fill it before applying to the index
///
/// Lock order: write_gate → transaction → commit_lock → active → log.
/// `begin` also takes the commit lock, so a snapshot version is never read
/// while a commit or logged direct write is half applied.
pub struct TransactionManager {
    options: TxnOptions,
    next_id: AtomicU64,
    version: AtomicU64,
    active: Mutex<HashMap<TxnId, ActiveEntry>>,
    active_count: AtomicUsize,
    finished: Mutex<FinishedLog>,
    log: RwLock<VersionLog>,
    commit_lock: Mutex<()>,
    write_gate: RwLock<()>,
    counters: TxnCounters,
    created_at: Instant,
}

impl TransactionManager {
    pub fn new(options: TxnOptions) -> Self {
        Self {
            options,
            next_id: AtomicU64::new(1),
            version: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
            finished: Mutex::new(FinishedLog::default()),
            log: RwLock::new(VersionLog::default()),
            commit_lock: Mutex::new(()),
            write_gate: RwLock::new(()),
            counters: TxnCounters::default(),
            created_at: Instant::now(),
        }
    }

    /// Current published commit version
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Start a transaction and register it in the active table
    pub fn begin(&self, isolation: IsolationLevel) -> Result<TxnId> {
        let _gate = self.write_gate.write();
        let _commit = self.commit_lock.lock();
        let mut active = self.active.lock();

        if active.len() >= self.options.max_active {
            return Err(SlabError::CapacityExceeded {
                resource: "active transactions",
                limit: self.options.max_active,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let start_version = self.current_version();
        let txn = Transaction::new(id, start_version, isolation);
        active.insert(
            id,
            ActiveEntry {
                start_version,
                started: Instant::now(),
                handle: Arc::new(Mutex::new(txn)),
            },
        );
        self.active_count.store(active.len(), Ordering::Release);
        drop(active);

        self.counters.begun.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(id, start_version, ?isolation, "transaction begun");
        Ok(id)
    }

    /// Read `key` inside a transaction
    ///
    /// Own pending writes win; otherwise Snapshot transactions see the value
    /// as of `begin` and ReadCommitted ones see the latest commit.
    pub fn read(&self, id: TxnId, key: &[u8], index: &HashIndex) -> Result<Option<Bytes>> {
        let handle = self.handle(id)?;
        let mut txn = handle.lock();
        txn.ensure_active()?;

        txn.record_read(key);
        if let Some(local) = txn.local(key) {
            return Ok(local);
        }

        match txn.isolation() {
            IsolationLevel::ReadCommitted => index.get(key),
            IsolationLevel::Snapshot => {
                let current = index.get(key)?;
                match self.log.read().before_image(key, txn.start_version()) {
                    Some(before) => Ok(before),
                    None => Ok(current),
                }
            }
        }
    }

    /// Buffer a mutation; nothing reaches the index before commit
    pub fn write(&self, id: TxnId, key: &[u8], pending: Pending) -> Result<()> {
        let handle = self.handle(id)?;
        let mut txn = handle.lock();
        txn.ensure_active()?;
        txn.buffer(key, pending);
        Ok(())
    }

    /// Validate and apply a transaction
    pub fn commit(&self, id: TxnId, index: &HashIndex) -> Result<CommitInfo> {
        let handle = self.handle(id)?;
        let mut txn = handle.lock();
        txn.ensure_active()?;

        let commit_guard = self.commit_lock.lock();

        if txn.isolation() == IsolationLevel::Snapshot {
            let conflict = {
                let log = self.log.read();
                txn.read_set().iter().find_map(|key| {
                    log.modified_after(key, txn.start_version())
                        .map(|version| (key.to_vec(), version))
                })
            };
            if let Some((key, version)) = conflict {
                txn.finish(TxnState::Aborted);
                drop(commit_guard);
                self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                self.retire(id, TxnState::Aborted);
                tracing::debug!(id, version, "commit conflict");
                return Err(SlabError::Conflict { key, version });
            }
        }

        if txn.write_set().is_empty() {
            txn.finish(TxnState::Committed);
            drop(commit_guard);
            self.retire(id, TxnState::Committed);
            return Ok(CommitInfo {
                id,
                version: 0,
                writes: Vec::new(),
            });
        }

        let version = self.current_version() + 1;
        let mut before_images: Vec<BeforeImage> = Vec::with_capacity(txn.write_set().len());
        for key in txn.write_set().keys() {
            before_images.push((key.clone(), index.image(key)?));
        }
        {
            let mut log = self.log.write();
            for (key, before) in &before_images {
                let value = before.as_ref().map(|image| image.value.clone());
                log.record(version, key.clone(), value);
            }
        }

        let mut applied = 0;
        if let Err(e) = self.apply(txn.write_set(), index, &mut applied) {
            self.rollback(&before_images[..applied], index);
            {
                let mut log = self.log.write();
                for (key, _) in &before_images {
                    log.unrecord(version, key);
                }
            }
            txn.finish(TxnState::Aborted);
            drop(commit_guard);
            self.retire(id, TxnState::Aborted);
            tracing::warn!(id, error = %e, "commit apply failed, transaction rolled back");
            return Err(e);
        }

        self.version.store(version, Ordering::Release);
        let writes = txn.finish(TxnState::Committed);
        drop(commit_guard);

        self.counters.committed.fetch_add(1, Ordering::Relaxed);
        self.retire(id, TxnState::Committed);
        tracing::trace!(id, version, writes = writes.len(), "transaction committed");

        Ok(CommitInfo {
            id,
            version,
            writes: writes.into_iter().collect(),
        })
    }

    /// Discard a transaction's sets and mark it Aborted
    pub fn abort(&self, id: TxnId) -> Result<()> {
        let handle = self.handle(id)?;
        let mut txn = handle.lock();
        txn.ensure_active()?;
        txn.finish(TxnState::Aborted);
        drop(txn);

        self.retire(id, TxnState::Aborted);
        Ok(())
    }

    /// Run a non-transactional mutation of `key`
    ///
    /// With no transaction active this is just `apply()`. Otherwise the
    /// key's before-image is logged under a fresh version so snapshots and
    /// commit validation see the change like any other commit.
    pub fn direct_write<R>(
        &self,
        key: &[u8],
        index: &HashIndex,
        apply: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        let _gate = self.write_gate.read();
        if self.active_count.load(Ordering::Acquire) == 0 {
            return apply();
        }

        let _commit = self.commit_lock.lock();
        let version = self.current_version() + 1;
        let before = index.get(key)?;
        self.log
            .write()
            .record(version, Bytes::copy_from_slice(key), before);

        match apply() {
            Ok(result) => {
                self.version.store(version, Ordering::Release);
                Ok(result)
            }
            Err(e) => {
                self.log.write().unrecord(version, key);
                Err(e)
            }
        }
    }

    /// Abort every transaction older than the configured timeout
    pub fn reap_expired(&self) -> usize {
        let Some(timeout) = self.options.timeout else {
            return 0;
        };

        let expired: Vec<(TxnId, Arc<Mutex<Transaction>>)> = self
            .active
            .lock()
            .iter()
            .filter(|(_, entry)| entry.started.elapsed() > timeout)
            .map(|(id, entry)| (*id, Arc::clone(&entry.handle)))
            .collect();

        expired
            .into_iter()
            .filter(|(id, handle)| self.expire(*id, handle))
            .count()
    }

    /// State of a transaction, if its id was ever issued
    pub fn state(&self, id: TxnId) -> Result<TxnState> {
        let handle = self.active.lock().get(&id).map(|e| Arc::clone(&e.handle));
        match handle {
            Some(handle) => Ok(handle.lock().state()),
            None => match self.not_active(id) {
                SlabError::InvalidTransactionState { state, .. } => Ok(state),
                other => Err(other),
            },
        }
    }

    /// Fail unless `id` is an Active transaction (applies the timeout)
    pub fn ensure_active(&self, id: TxnId) -> Result<()> {
        let handle = self.handle(id)?;
        let txn = handle.lock();
        txn.ensure_active()
    }

    /// Inspection snapshot of an Active transaction
    pub fn info(&self, id: TxnId) -> Result<TxnInfo> {
        let handle = self.handle(id)?;
        let info = handle.lock().info();
        Ok(info)
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> TxnStats {
        let committed = self.counters.committed.load(Ordering::Relaxed);
        let elapsed = self.created_at.elapsed().as_secs_f64();
        TxnStats {
            begun: self.counters.begun.load(Ordering::Relaxed),
            committed,
            aborted: self.counters.aborted.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            active: self.active_count(),
            version: self.current_version(),
            version_log_entries: self.log.read().len(),
            commits_per_sec: if elapsed > 0.0 {
                committed as f64 / elapsed
            } else {
                0.0
            },
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Active transaction handle, enforcing the timeout policy
    fn handle(&self, id: TxnId) -> Result<Arc<Mutex<Transaction>>> {
        let entry = self
            .active
            .lock()
            .get(&id)
            .map(|e| (e.started, Arc::clone(&e.handle)));

        let Some((started, handle)) = entry else {
            return Err(self.not_active(id));
        };

        if let Some(timeout) = self.options.timeout {
            if started.elapsed() > timeout {
                self.expire(id, &handle);
                return Err(SlabError::InvalidTransactionState {
                    id,
                    state: TxnState::Aborted,
                });
            }
        }
        Ok(handle)
    }

    /// Abort a timed-out transaction; false if it already left Active
    fn expire(&self, id: TxnId, handle: &Mutex<Transaction>) -> bool {
        let mut txn = handle.lock();
        if txn.state() != TxnState::Active {
            return false;
        }
        txn.finish(TxnState::Aborted);
        drop(txn);

        self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
        self.retire(id, TxnState::Aborted);
        tracing::warn!(id, "transaction aborted after exceeding timeout");
        true
    }

    fn not_active(&self, id: TxnId) -> SlabError {
        if let Some(state) = self.finished.lock().states.get(&id) {
            return SlabError::InvalidTransactionState { id, state: *state };
        }
        if id != 0 && id < self.next_id.load(Ordering::SeqCst) {
            return SlabError::InvalidTransactionState {
                id,
                state: TxnState::Finished,
            };
        }
        SlabError::UnknownTransaction(id)
    }

    /// Remove a terminal transaction from the active table and prune the log
    fn retire(&self, id: TxnId, state: TxnState) {
        {
            let mut active = self.active.lock();
            active.remove(&id);
            self.active_count.store(active.len(), Ordering::Release);
            let oldest_snapshot = active.values().map(|e| e.start_version).min();
            self.log.write().prune(oldest_snapshot);
        }
        self.finished.lock().push(id, state);
        if state == TxnState::Aborted {
            self.counters.aborted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Apply the write set in key order; `applied` counts keys fully written
    /// so a failure can be undone exactly
    fn apply(
        &self,
        writes: &BTreeMap<Bytes, Pending>,
        index: &HashIndex,
        applied: &mut usize,
    ) -> Result<()> {
        for (key, pending) in writes {
            match pending {
                Pending::Put { value, flags } => {
                    index.put(key, value, Expiry::Keep, *flags | RecordFlags::TXN_WRITTEN)?;
                }
                Pending::Delete => {
                    index.delete(key)?;
                }
            }
            *applied += 1;
        }
        Ok(())
    }

    /// Undo applied writes newest first
    ///
    /// A failed put or delete leaves its own key untouched, so only the
    /// prefix that succeeded is passed in. Walking it backwards frees the
    /// blocks later inserts took before earlier deletes are re-inserted.
    fn rollback(&self, applied: &[BeforeImage], index: &HashIndex) {
        for (key, before) in applied.iter().rev() {
            if let Err(e) = index.restore(key, before.as_ref()) {
                tracing::error!(key = ?key, error = %e, "rollback could not restore key");
            }
        }
    }
}
