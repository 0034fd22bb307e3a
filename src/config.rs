//! Runtime configuration for a trie instance.
//!
//! Constants plus a `Default`-derived struct; loading from disk/env is
//! left to the embedder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::Scalar;

/// Ceiling on the number of dirty nodes flushed in a single batched commit
/// round before the engine starts a new level-synchronous pass.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Tunables for a [`crate::trie::Trie`] instance.
///
/// A `0` capacity for either cache selects the no-op strategy (see
/// [`crate::cache::Cache`]) rather than an `LruCache` of capacity zero,
/// since `lru::LruCache` requires a `NonZeroUsize`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrieConfig {
    /// Maximum number of dirty nodes processed per batched-commit round.
    pub max_batch_size: usize,

    /// Capacity of the (address, index) -> stem cache. `0` disables caching.
    pub stem_cache_capacity: usize,

    /// Capacity of the address -> base commitment cache. `0` disables
    /// caching.
    pub address_commitment_cache_capacity: usize,

    /// Optional seed for the stem cache, keyed by `address || index`.
    #[serde(default)]
    pub preloaded_stems: HashMap<Vec<u8>, [u8; 31]>,
}

impl TrieConfig {
    pub fn preload_key(address: &[u8], index: &Scalar) -> Vec<u8> {
        let mut key = Vec::with_capacity(address.len() + 32);
        key.extend_from_slice(address);
        key.extend_from_slice(index);
        key
    }
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            stem_cache_capacity: 0,
            address_commitment_cache_capacity: 0,
            preloaded_stems: HashMap::new(),
        }
    }
}
