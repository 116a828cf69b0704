//! Transaction Module
//!
//! Optimistic transactions over the hash index.
//!
//! ## Responsibilities
//! - Track per-transaction read sets and buffered write sets
//! - Serve snapshot-at-begin reads while other commits land
//! - Validate read sets at commit (first committer wins)
//! - Apply write sets atomically with respect to other commits
//!
//! ## State Machine
//! ```text
//!            commit (validated)
//!   Active ─────────────────────► Committed
//!     │
//!     │ abort / conflict / timeout
//!     └─────────────────────────► Aborted
//! ```
//!
//! ## Versions
//! Every commit (and every direct write made while a transaction is
//! active) gets the next global version. Before-images of the keys it
//! touched go into the version log, so a transaction that began at version
//! `S` can still read the value a key had at `S`, and can tell at commit
//! time whether anything it read has changed since.

mod manager;
mod transaction;
mod version_log;

use bytes::Bytes;
use serde::Serialize;

pub use manager::{TransactionManager, TxnOptions, TxnStats};
pub use transaction::{Pending, Transaction, TxnInfo};

/// Transaction identifier (monotonically increasing, starts at 1)
pub type TxnId = u64;

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
    /// Terminal, but old enough that its outcome is no longer retained
    Finished,
}

/// What a transaction's reads observe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum IsolationLevel {
    /// Reads see the committed state as of `begin`; the read set is
    /// validated at commit
    #[default]
    Snapshot,

    /// Reads see the latest committed value; no read validation
    ReadCommitted,
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub id: TxnId,

    /// Global version assigned to this commit (0 for a read-only commit)
    pub version: u64,

    /// Mutations applied, in key order
    pub writes: Vec<(Bytes, Pending)>,
}
