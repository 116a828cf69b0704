//! Engine Module
//!
//! The context object that owns and coordinates every component.
//!
//! ## Responsibilities
//! - Build the pool allocator, hash index, transaction manager and plugin
//!   registry from one validated [`Config`]
//! - Run plugin hooks around every point operation
//! - Route direct writes through the transaction manager so open snapshots
//!   stay consistent
//! - Execute decoded [`Command`]s
//!
//! Nothing here is global: independent engines can coexist in one process.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::command::{Command, Reply};
use crate::config::Config;
use crate::error::{Result, SlabError};
use crate::index::{HashIndex, IndexOptions, PutOutcome};
use crate::plugin::{
    DispatchOutcome, ExtensionPoint, HookContext, PluginDescriptor, PluginInfo, PluginRegistry,
};
use crate::pool::{PoolStats, RawStats, SizeClassAllocator};
use crate::record::{Expiry, RecordFlags, RecordGuard, RecordInfo};
use crate::txn::{
    CommitInfo, IsolationLevel, Pending, TransactionManager, TxnId, TxnInfo, TxnOptions, TxnState,
    TxnStats,
};

/// Point-in-time statistics for the whole engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub entry_count: usize,
    pub bucket_count: usize,
    pub load_factor: f64,
    pub resize_count: u64,
    pub longest_chain: usize,
    /// One entry per size class, smallest first
    pub pools: Vec<PoolStats>,
    pub raw: RawStats,
    pub transactions: TxnStats,
    pub plugins: usize,
}

/// The main engine
///
/// ## Concurrency Model
///
/// Every method takes `&self`; share an engine across threads with `Arc`.
///
/// - **Point reads** (get/contains/pin): hash index only (table lock shared,
///   one bucket lock)
/// - **Direct writes** (put/delete/evict): pass through the transaction
///   manager's write gate; logged for snapshots only while a transaction is
///   active
/// - **Commits**: serialized by the manager's commit lock
/// - **Hooks**: run on the calling thread without any engine lock held
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Payload memory for every record
    allocator: Arc<SizeClassAllocator>,

    /// Key → record mapping
    index: HashIndex,

    /// Optimistic transaction bookkeeping
    txns: TransactionManager,

    /// Compiled-in extensions
    plugins: PluginRegistry,
}

impl Engine {
    /// Create an engine from a validated config
    ///
    /// Steps:
    /// 1. Validate the config (no allocation on failure)
    /// 2. Build one pool per size class
    /// 3. Build the hash index over the allocator
    /// 4. Create the transaction manager and plugin registry
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let allocator = Arc::new(SizeClassAllocator::new(
            &config.size_classes,
            config.max_chunks_per_class,
        )?);

        let index = HashIndex::new(
            IndexOptions {
                initial_bucket_count: config.initial_bucket_count,
                max_load_factor: config.max_load_factor,
                hash_algorithm: config.hash_algorithm,
                max_key_len: config.max_key_len,
                max_value_len: config.max_value_len,
                default_ttl: config.default_ttl,
            },
            Arc::clone(&allocator),
        )?;

        let txns = TransactionManager::new(TxnOptions {
            max_active: config.max_active_transactions,
            timeout: config.transaction_timeout,
        });
        let plugins = PluginRegistry::new(config.max_plugins);

        tracing::info!(
            buckets = config.initial_bucket_count,
            hash = config.hash_algorithm.name(),
            size_classes = config.size_classes.len(),
            "engine created"
        );

        Ok(Self {
            config,
            allocator,
            index,
            txns,
            plugins,
        })
    }

    /// Create an engine with the default config
    pub fn with_defaults() -> Result<Self> {
        Self::new(Config::default())
    }

    /// Execute a command
    ///
    /// Routes commands to appropriate handlers. Absent keys on `Get` and
    /// `Delete` are reported as `NotFound`.
    pub fn execute(&self, command: Command) -> Result<Reply> {
        match command {
            Command::Get { key } => self
                .get(&key)?
                .map(Reply::Value)
                .ok_or(SlabError::NotFound),
            Command::Put { key, value } => {
                self.put(&key, &value)?;
                Ok(Reply::Ok)
            }
            Command::PutEx { key, value, ttl } => {
                self.put_with_ttl(&key, &value, ttl)?;
                Ok(Reply::Ok)
            }
            Command::Delete { key } => match self.delete(&key)? {
                true => Ok(Reply::Ok),
                false => Err(SlabError::NotFound),
            },
            Command::Exists { key } => Ok(Reply::Bool(self.contains(&key)?)),
            Command::Begin => Ok(Reply::Txn(self.begin()?)),
            Command::Read { txn, key } => self
                .read(txn, &key)?
                .map(Reply::Value)
                .ok_or(SlabError::NotFound),
            Command::Write { txn, key, value } => {
                self.write(txn, &key, &value)?;
                Ok(Reply::Ok)
            }
            Command::Remove { txn, key } => {
                self.remove(txn, &key)?;
                Ok(Reply::Ok)
            }
            Command::Commit { txn } => {
                let info = self.commit(txn)?;
                Ok(Reply::Committed {
                    version: info.version,
                })
            }
            Command::Abort { txn } => {
                self.abort(txn)?;
                Ok(Reply::Ok)
            }
            Command::Stats => Ok(Reply::Stats(self.stats())),
            Command::Ping => Ok(Reply::Pong),
        }
    }

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Insert or replace a value
    ///
    /// Steps:
    /// 1. Validate key/value lengths
    /// 2. Run PrePut hooks (may veto or transform the value)
    /// 3. Write to the index (logged if a transaction is active)
    /// 4. Run PostPut hooks
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<PutOutcome> {
        self.put_inner(key, value, Expiry::Keep)
    }

    /// Insert or replace a value that expires `ttl` from now
    ///
    /// A zero TTL stores a record that is already expired.
    pub fn put_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<PutOutcome> {
        self.put_inner(key, value, Expiry::Refresh(Some(ttl)))
    }

    /// Get a value by key; absent and expired keys are `Ok(None)`
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.dispatch(ExtensionPoint::PreGet, key, None, None)?;
        match self.index.get(key)? {
            Some(value) => self.post_get(key, value, None).map(Some),
            None => Ok(None),
        }
    }

    /// Delete a key; `Ok(false)` if it was absent
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.index.validate(key, None)?;
        self.dispatch(ExtensionPoint::PreDelete, key, None, None)?;

        let removed = self
            .txns
            .direct_write(key, &self.index, || self.index.delete(key))?;
        if removed {
            self.observe(ExtensionPoint::PostDelete, key, None, None);
        }
        Ok(removed)
    }

    /// Whether a live (unexpired) record exists; runs no hooks
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.index.contains(key)
    }

    /// Pin a record so its payload can be read without holding index locks
    ///
    /// The payload stays valid until the guard drops, even if the key is
    /// deleted or overwritten meanwhile. Runs no hooks.
    pub fn pin(&self, key: &[u8]) -> Result<Option<RecordGuard>> {
        self.index.pin(key)
    }

    /// Remove a record on behalf of a capacity policy
    ///
    /// Unlike [`delete`](Self::delete) this bypasses hooks and reports an
    /// absent key as `NotFound`.
    pub fn evict(&self, key: &[u8]) -> Result<()> {
        let removed = self
            .txns
            .direct_write(key, &self.index, || self.index.delete(key))?;
        if removed {
            tracing::debug!(key = ?Bytes::copy_from_slice(key), "record evicted");
            Ok(())
        } else {
            Err(SlabError::NotFound)
        }
    }

    /// Sweep all expired records; returns how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        self.index.purge_expired()
    }

    /// Record metadata without copying the value
    pub fn record_info(&self, key: &[u8]) -> Result<Option<RecordInfo>> {
        self.index.record_info(key)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a Snapshot transaction
    pub fn begin(&self) -> Result<TxnId> {
        self.begin_with(IsolationLevel::default())
    }

    pub fn begin_with(&self, isolation: IsolationLevel) -> Result<TxnId> {
        self.txns.begin(isolation)
    }

    /// Read inside a transaction; own buffered writes are visible
    pub fn read(&self, txn: TxnId, key: &[u8]) -> Result<Option<Bytes>> {
        self.txns.ensure_active(txn)?;
        self.dispatch(ExtensionPoint::PreGet, key, None, Some(txn))?;
        match self.txns.read(txn, key, &self.index)? {
            Some(value) => self.post_get(key, value, Some(txn)).map(Some),
            None => Ok(None),
        }
    }

    /// Buffer a write; PrePut hooks run now, PostPut hooks at commit
    pub fn write(&self, txn: TxnId, key: &[u8], value: &[u8]) -> Result<()> {
        self.index.validate(key, Some(value))?;
        self.txns.ensure_active(txn)?;

        let (value, flags) = self.pre_put(key, value, Some(txn))?;
        self.index.validate(key, Some(&value[..]))?;
        self.txns.write(txn, key, Pending::Put { value, flags })
    }

    /// Buffer a delete; PreDelete hooks run now, PostDelete hooks at commit
    pub fn remove(&self, txn: TxnId, key: &[u8]) -> Result<()> {
        self.index.validate(key, None)?;
        self.txns.ensure_active(txn)?;

        self.dispatch(ExtensionPoint::PreDelete, key, None, Some(txn))?;
        self.txns.write(txn, key, Pending::Delete)
    }

    /// Validate and apply a transaction, then run post-write hooks
    pub fn commit(&self, txn: TxnId) -> Result<CommitInfo> {
        let info = self.txns.commit(txn, &self.index)?;
        for (key, pending) in &info.writes {
            match pending {
                Pending::Put { value, .. } => {
                    self.observe(ExtensionPoint::PostPut, key, Some(&value[..]), Some(txn))
                }
                Pending::Delete => self.observe(ExtensionPoint::PostDelete, key, None, Some(txn)),
            }
        }
        Ok(info)
    }

    pub fn abort(&self, txn: TxnId) -> Result<()> {
        self.txns.abort(txn)
    }

    /// Abort every transaction past the configured timeout
    pub fn reap_expired_transactions(&self) -> usize {
        self.txns.reap_expired()
    }

    pub fn transaction_state(&self, txn: TxnId) -> Result<TxnState> {
        self.txns.state(txn)
    }

    pub fn transaction_info(&self, txn: TxnId) -> Result<TxnInfo> {
        self.txns.info(txn)
    }

    // =========================================================================
    // Plugins
    // =========================================================================

    pub fn register_plugin(&self, descriptor: PluginDescriptor) -> Result<()> {
        self.plugins.register(descriptor)
    }

    pub fn unregister_plugin(&self, name: &str) -> Result<()> {
        self.plugins.unregister(name)
    }

    /// Suspend (`false`) or resume (`true`) a registered plugin
    pub fn set_plugin_loaded(&self, name: &str, loaded: bool) -> Result<()> {
        self.plugins.set_loaded(name, loaded)
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.plugins.plugins()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn stats(&self) -> EngineStats {
        let allocator = self.allocator.stats();
        EngineStats {
            entry_count: self.index.len(),
            bucket_count: self.index.bucket_count(),
            load_factor: self.index.load_factor(),
            resize_count: self.index.resize_count(),
            longest_chain: self.index.longest_chain(),
            pools: allocator.classes,
            raw: allocator.raw,
            transactions: self.txns.stats(),
            plugins: self.plugins.len(),
        }
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn put_inner(&self, key: &[u8], value: &[u8], expiry: Expiry) -> Result<PutOutcome> {
        self.index.validate(key, Some(value))?;

        let (stored, flags) = self.pre_put(key, value, None)?;
        let outcome = self.txns.direct_write(key, &self.index, || {
            self.index.put(key, &stored, expiry, flags)
        })?;

        self.observe(ExtensionPoint::PostPut, key, Some(&stored[..]), None);
        Ok(outcome)
    }

    /// PrePut hooks; returns the value to store and its flags
    fn pre_put(&self, key: &[u8], value: &[u8], txn: Option<TxnId>) -> Result<(Bytes, RecordFlags)> {
        match self.dispatch(ExtensionPoint::PrePut, key, Some(value), txn)? {
            DispatchOutcome::Transformed(stored) if stored.as_ref() != value => {
                Ok((stored, RecordFlags::TRANSFORMED))
            }
            _ => Ok((Bytes::copy_from_slice(value), RecordFlags::empty())),
        }
    }

    /// PostGet hooks; may veto the read or transform what the caller sees
    fn post_get(&self, key: &[u8], value: Bytes, txn: Option<TxnId>) -> Result<Bytes> {
        Ok(self
            .dispatch(ExtensionPoint::PostGet, key, Some(&value[..]), txn)?
            .into_value()
            .unwrap_or(value))
    }

    fn dispatch(
        &self,
        point: ExtensionPoint,
        key: &[u8],
        value: Option<&[u8]>,
        txn: Option<TxnId>,
    ) -> Result<DispatchOutcome> {
        self.plugins.dispatch(HookContext {
            point,
            key,
            value,
            txn,
        })
    }

    /// Post-write hooks; the mutation already happened, so failures only log
    fn observe(&self, point: ExtensionPoint, key: &[u8], value: Option<&[u8]>, txn: Option<TxnId>) {
        if let Err(e) = self.dispatch(point, key, value, txn) {
            tracing::warn!(?point, error = %e, "post-write hook failed");
        }
    }
}
