//! Hash function selection
//!
//! The function is a configuration value so it can be benchmarked or
//! substituted without touching the index.

use std::hash::Hasher;
use std::str::FromStr;

use serde::Serialize;

use crate::error::SlabError;

/// Hash functions available to the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum HashAlgorithm {
    /// XXH3 64-bit
    #[default]
    Xxh3,

    /// FxHash (rustc's hasher), very fast on short keys
    Fx,

    /// 64-bit FNV-1a
    Fnv1a,

    /// SipHash with fixed keys (std `DefaultHasher::new`)
    Sip,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Xxh3,
        HashAlgorithm::Fx,
        HashAlgorithm::Fnv1a,
        HashAlgorithm::Sip,
    ];

    #[inline]
    pub fn hash(&self, key: &[u8]) -> u64 {
        match self {
            HashAlgorithm::Xxh3 => xxhash_rust::xxh3::xxh3_64(key),
            HashAlgorithm::Fx => {
                let mut hasher = rustc_hash::FxHasher::default();
                hasher.write(key);
                hasher.finish()
            }
            HashAlgorithm::Fnv1a => key
                .iter()
                .fold(FNV_OFFSET, |h, b| (h ^ *b as u64).wrapping_mul(FNV_PRIME)),
            HashAlgorithm::Sip => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                hasher.write(key);
                hasher.finish()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Xxh3 => "xxh3",
            HashAlgorithm::Fx => "fx",
            HashAlgorithm::Fnv1a => "fnv1a",
            HashAlgorithm::Sip => "sip",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = SlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SlabError::InvalidConfig(format!("unknown hash algorithm: {}", s)))
    }
}
