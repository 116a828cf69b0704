//! Configuration for SlabKV
//!
//! Centralized configuration with sensible defaults. Everything here is fixed
//! at engine construction and checked by [`Config::validate`].

use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, SlabError};
use crate::index::HashAlgorithm;

/// Main configuration for a SlabKV engine instance
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Hash Index Configuration
    // -------------------------------------------------------------------------
    /// Number of buckets allocated at construction
    pub initial_bucket_count: usize,

    /// Resize once `entry_count / bucket_count` exceeds this
    pub max_load_factor: f64,

    /// Hash function used to place keys into buckets
    pub hash_algorithm: HashAlgorithm,

    // -------------------------------------------------------------------------
    // Pool Allocator Configuration
    // -------------------------------------------------------------------------
    /// Size classes, smallest first. Requests larger than the last class
    /// take the raw allocation path.
    pub size_classes: Vec<SizeClass>,

    /// Upper bound on chunks per size class (`None` = limited only by the system)
    pub max_chunks_per_class: Option<usize>,

    // -------------------------------------------------------------------------
    // Record Limits
    // -------------------------------------------------------------------------
    /// Maximum key length in bytes
    pub max_key_len: usize,

    /// Maximum value length in bytes
    pub max_value_len: usize,

    /// TTL applied to newly created records when the caller gives none
    pub default_ttl: Option<Duration>,

    // -------------------------------------------------------------------------
    // Transaction Configuration
    // -------------------------------------------------------------------------
    /// Max concurrently Active transactions
    pub max_active_transactions: usize,

    /// Active transactions older than this are aborted by the engine
    pub transaction_timeout: Option<Duration>,

    // -------------------------------------------------------------------------
    // Plugin Configuration
    // -------------------------------------------------------------------------
    /// Max registered plugins
    pub max_plugins: usize,
}

/// One pool size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeClass {
    /// Fixed block size served by this class
    pub block_size: usize,

    /// Bytes acquired from the system each time the pool grows
    pub chunk_bytes: usize,
}

impl SizeClass {
    pub const fn new(block_size: usize, chunk_bytes: usize) -> Self {
        Self {
            block_size,
            chunk_bytes,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_bucket_count: 64,
            max_load_factor: 0.75,
            hash_algorithm: HashAlgorithm::Xxh3,
            size_classes: vec![
                SizeClass::new(64, 64 * 1024),     // small
                SizeClass::new(512, 256 * 1024),   // medium
                SizeClass::new(4096, 1024 * 1024), // large
            ],
            max_chunks_per_class: None,
            max_key_len: 1024,
            max_value_len: 16 * 1024 * 1024, // 16 MB
            default_ttl: None,
            max_active_transactions: 1024,
            transaction_timeout: None,
            max_plugins: 32,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check every field, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.initial_bucket_count == 0 {
            return Err(invalid("initial_bucket_count must be > 0"));
        }
        if !self.max_load_factor.is_finite() || self.max_load_factor <= 0.0 {
            return Err(invalid(format!(
                "max_load_factor must be a positive number, got {}",
                self.max_load_factor
            )));
        }
        if self.size_classes.is_empty() {
            return Err(invalid("at least one size class is required"));
        }

        let mut previous = 0;
        for class in &self.size_classes {
            if class.block_size == 0 {
                return Err(invalid("size class block_size must be > 0"));
            }
            if class.block_size <= previous {
                return Err(invalid(format!(
                    "size classes must be strictly increasing ({} after {})",
                    class.block_size, previous
                )));
            }
            if class.chunk_bytes < class.block_size {
                return Err(invalid(format!(
                    "chunk of {} bytes cannot hold one {} byte block",
                    class.chunk_bytes, class.block_size
                )));
            }
            previous = class.block_size;
        }

        if self.max_chunks_per_class == Some(0) {
            return Err(invalid("max_chunks_per_class must be > 0 when set"));
        }
        if self.max_active_transactions == 0 {
            return Err(invalid("max_active_transactions must be > 0"));
        }
        if self.transaction_timeout == Some(Duration::ZERO) {
            return Err(invalid("transaction_timeout must be non-zero when set"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> SlabError {
    SlabError::InvalidConfig(message.into())
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the initial number of buckets
    pub fn initial_bucket_count(mut self, count: usize) -> Self {
        self.config.initial_bucket_count = count;
        self
    }

    /// Set the load factor that triggers a resize
    pub fn max_load_factor(mut self, factor: f64) -> Self {
        self.config.max_load_factor = factor;
        self
    }

    /// Select the hash function
    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.config.hash_algorithm = algorithm;
        self
    }

    /// Replace the size classes
    pub fn size_classes(mut self, classes: Vec<SizeClass>) -> Self {
        self.config.size_classes = classes;
        self
    }

    /// Cap the number of chunks each size class may acquire
    pub fn max_chunks_per_class(mut self, chunks: usize) -> Self {
        self.config.max_chunks_per_class = Some(chunks);
        self
    }

    /// Set the maximum key length (in bytes)
    pub fn max_key_len(mut self, len: usize) -> Self {
        self.config.max_key_len = len;
        self
    }

    /// Set the maximum value length (in bytes)
    pub fn max_value_len(mut self, len: usize) -> Self {
        self.config.max_value_len = len;
        self
    }

    /// Set the TTL given to new records by default
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = Some(ttl);
        self
    }

    /// Set the maximum number of Active transactions
    pub fn max_active_transactions(mut self, count: usize) -> Self {
        self.config.max_active_transactions = count;
        self
    }

    /// Abort transactions that stay Active longer than this
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.config.transaction_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of registered plugins
    pub fn max_plugins(mut self, count: usize) -> Self {
        self.config.max_plugins = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
