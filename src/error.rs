//! Error types for SlabKV
//!
//! Provides a unified error type for all engine operations.

use thiserror::Error;

use crate::txn::{TxnId, TxnState};

/// Result type alias using SlabError
pub type Result<T> = std::result::Result<T, SlabError>;

/// Unified error type for SlabKV operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlabError {
    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // -------------------------------------------------------------------------
    // Input Validation Errors
    // -------------------------------------------------------------------------
    #[error("Key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    // -------------------------------------------------------------------------
    // Allocator Errors
    // -------------------------------------------------------------------------
    #[error("Out of memory: could not acquire {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Pool exhausted: size class {block_size} B reached {chunks} chunks")]
    Exhausted { block_size: usize, chunks: usize },

    #[error("Double free detected: {0}")]
    DoubleFree(String),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Transaction {id} is {state:?}, expected Active")]
    InvalidTransactionState { id: TxnId, state: TxnState },

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TxnId),

    #[error("Commit conflict on key {key:?}: modified at version {version}")]
    Conflict { key: Vec<u8>, version: u64 },

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("{resource} capacity exceeded (limit {limit})")]
    CapacityExceeded { resource: &'static str, limit: usize },

    // -------------------------------------------------------------------------
    // Plugin Errors
    // -------------------------------------------------------------------------
    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Operation vetoed by plugin '{plugin}': {reason}")]
    Vetoed { plugin: String, reason: String },
}

impl SlabError {
    /// Whether the caller may retry the same operation and expect it to succeed.
    ///
    /// Only commit conflicts qualify; the engine never retries on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SlabError::Conflict { .. })
    }
}
