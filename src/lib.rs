//! # SlabKV
//!
//! An in-memory key-value engine with:
//! - A size-classed pool allocator holding every record payload
//! - A chained, resizable hash index with lazy TTL expiry
//! - Optimistic transactions with snapshot-at-begin reads
//! - Compiled-in plugins that can veto or transform operations
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │        put / get / delete / begin / commit / execute        │
//! └───────┬──────────────────────┬──────────────────────┬───────┘
//!         │                      │                      │
//!         ▼                      ▼                      ▼
//!  ┌─────────────┐       ┌──────────────┐       ┌──────────────┐
//!  │   Plugin    │       │ Transaction  │       │  Hash Index  │
//!  │  Registry   │       │   Manager    │──────►│  (RwLock +   │
//!  │  (hooks)    │       │ (version log)│ apply │ bucket Mutex)│
//!  └─────────────┘       └──────────────┘       └──────┬───────┘
//!                                                      │
//!                                                      ▼
//!                                              ┌──────────────┐
//!                                              │ Pool Alloc.  │
//!                                              │ (size class) │
//!                                              └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use slabkv::Engine;
//!
//! let engine = Engine::with_defaults()?;
//! engine.put(b"user:1", b"alice")?;
//! assert_eq!(engine.get(b"user:1")?.as_deref(), Some(&b"alice"[..]));
//!
//! let tx = engine.begin()?;
//! engine.write(tx, b"x", b"10")?;
//! assert_eq!(engine.get(b"x")?, None);
//! engine.commit(tx)?;
//! assert_eq!(engine.get(b"x")?.as_deref(), Some(&b"10"[..]));
//! # Ok::<(), slabkv::SlabError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod pool;
pub mod record;
pub mod index;
pub mod txn;
pub mod plugin;
pub mod command;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, SlabError};
pub use config::{Config, ConfigBuilder, SizeClass};
pub use command::{Command, Reply};
pub use engine::{Engine, EngineStats};
pub use index::{HashAlgorithm, PutOutcome};
pub use plugin::{ExtensionPoint, HookContext, HookOutcome, PluginDescriptor};
pub use record::{RecordFlags, RecordGuard, RecordImage, RecordInfo};
pub use txn::{CommitInfo, IsolationLevel, Pending, TxnId, TxnState};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SlabKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
