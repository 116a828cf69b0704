//! Hash Index Module
//!
//! Maps key bytes to records with amortized O(1) point operations.
//!
//! ## Responsibilities
//! - Resolve keys to buckets with a configurable hash function
//! - Keep chains short by doubling the bucket array past the load factor
//! - Expire records lazily on access
//! - Allocate and release record payloads through the pool allocator
//!
//! ## Structure
//! ```text
//!  table (RwLock)
//!  ┌────────┬────────┬────────┬────────┐
//!  │ bkt 0  │ bkt 1  │ bkt 2  │ bkt 3  │   each bucket: Mutex<Bucket>
//!  └───┬────┴────────┴───┬────┴────────┘
//!      ▼                 ▼
//!   [rec]──►[rec]      [rec]               chain links are slot indices
//! ```
//!
//! ## Locking
//! The table lock is always taken before a bucket lock. Point operations
//! share it; resize takes it exclusively and rehashes stop-the-world.

mod bucket;
mod hash;
mod table;

pub use hash::HashAlgorithm;
pub use table::{HashIndex, IndexOptions, PutOutcome};
