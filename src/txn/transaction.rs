//! Transaction state
//!
//! Read and write sets for one transaction. Only the owning caller mutates
//! them (through the manager, under the transaction's own lock).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::error::{Result, SlabError};
use crate::record::RecordFlags;

use super::{IsolationLevel, TxnId, TxnState};

/// A buffered mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    /// Write `value`; `flags` are stored on the record at commit
    Put { value: Bytes, flags: RecordFlags },

    /// Tombstone
    Delete,
}

/// One optimistic transaction
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    start_version: u64,
    start_time: Instant,
    isolation: IsolationLevel,
    read_set: FxHashSet<Bytes>,
    write_set: BTreeMap<Bytes, Pending>,
    state: TxnState,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, start_version: u64, isolation: IsolationLevel) -> Self {
        Self {
            id,
            start_version,
            start_time: Instant::now(),
            isolation,
            read_set: FxHashSet::default(),
            write_set: BTreeMap::new(),
            state: TxnState::Active,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn start_version(&self) -> u64 {
        self.start_version
    }

    pub fn read_set(&self) -> &FxHashSet<Bytes> {
        &self.read_set
    }

    pub fn write_set(&self) -> &BTreeMap<Bytes, Pending> {
        &self.write_set
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.state == TxnState::Active {
            Ok(())
        } else {
            Err(SlabError::InvalidTransactionState {
                id: self.id,
                state: self.state,
            })
        }
    }

    pub(crate) fn record_read(&mut self, key: &[u8]) {
        if !self.read_set.contains(key) {
            self.read_set.insert(Bytes::copy_from_slice(key));
        }
    }

    /// Own pending write for `key`: `Some(None)` is a buffered delete
    pub(crate) fn local(&self, key: &[u8]) -> Option<Option<Bytes>> {
        self.write_set.get(key).map(|pending| match pending {
            Pending::Put { value, .. } => Some(value.clone()),
            Pending::Delete => None,
        })
    }

    pub(crate) fn buffer(&mut self, key: &[u8], pending: Pending) {
        self.write_set.insert(Bytes::copy_from_slice(key), pending);
    }

    /// Terminal transition; drops both sets
    pub(crate) fn finish(&mut self, state: TxnState) -> BTreeMap<Bytes, Pending> {
        self.state = state;
        self.read_set.clear();
        std::mem::take(&mut self.write_set)
    }

    pub(crate) fn info(&self) -> TxnInfo {
        TxnInfo {
            id: self.id,
            state: self.state,
            isolation: self.isolation,
            start_version: self.start_version,
            age: self.start_time.elapsed(),
            reads: self.read_set.len(),
            writes: self.write_set.len(),
        }
    }
}

/// Inspection snapshot of a transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxnInfo {
    pub id: TxnId,
    pub state: TxnState,
    pub isolation: IsolationLevel,
    pub start_version: u64,
    pub age: Duration,
    pub reads: usize,
    pub writes: usize,
}
