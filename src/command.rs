//! Command definitions
//!
//! Decoded requests routed through [`Engine::execute`](crate::Engine::execute).
//! Whatever produces them (a wire codec, the CLI shell) lives outside the
//! engine; the engine never parses bytes itself.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::engine::EngineStats;
use crate::txn::TxnId;

/// A decoded command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Get a value by key
    Get { key: Vec<u8> },

    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Put a key-value pair that expires after `ttl`
    PutEx {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl: Duration,
    },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Check whether a live key exists
    Exists { key: Vec<u8> },

    /// Start a Snapshot transaction
    Begin,

    /// Read inside a transaction
    Read { txn: TxnId, key: Vec<u8> },

    /// Buffer a write inside a transaction
    Write {
        txn: TxnId,
        key: Vec<u8>,
        value: Vec<u8>,
    },

    /// Buffer a delete inside a transaction
    Remove { txn: TxnId, key: Vec<u8> },

    Commit { txn: TxnId },

    Abort { txn: TxnId },

    /// Engine statistics
    Stats,

    /// Ping (health check)
    Ping,
}

impl Command {
    /// Upper-case command name, as used by text front ends
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Put { .. } => "PUT",
            Command::PutEx { .. } => "PUTEX",
            Command::Delete { .. } => "DEL",
            Command::Exists { .. } => "EXISTS",
            Command::Begin => "BEGIN",
            Command::Read { .. } => "READ",
            Command::Write { .. } => "WRITE",
            Command::Remove { .. } => "REMOVE",
            Command::Commit { .. } => "COMMIT",
            Command::Abort { .. } => "ABORT",
            Command::Stats => "STATS",
            Command::Ping => "PING",
        }
    }

    /// Whether the command mutates committed state
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Put { .. } | Command::PutEx { .. } | Command::Delete { .. } | Command::Commit { .. }
        )
    }
}

/// Result of an executed command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Reply {
    /// Acknowledged with no payload
    Ok,

    Pong,

    Value(Bytes),

    Bool(bool),

    /// Id of a newly begun transaction
    Txn(TxnId),

    /// Commit version (0 for a read-only commit)
    Committed { version: u64 },

    Stats(EngineStats),
}
