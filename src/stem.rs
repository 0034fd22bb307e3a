//! C2: the stem hasher.
//!
//! Derives the 31-byte stem shared by every trie key under `(address,
//! index)` as `groupToField(commit([marker, addr_lo, addr_hi, idx_lo,
//! idx_hi]))[0..31]`. The three leading scalars of that vector are constant
//! for a given address, so the address's partial commitment is cached and
//! each index only costs a two-position sparse update (C1.updateSparse)
//! rather than a fresh five-wide commit. A second cache memoizes the full
//! `(address, index) -> stem` result for repeat lookups (e.g. re-reading
//! the same storage slot). Cache strategy (bounded LRU vs no-op) is the
//! generalised `Cache` from `cache.rs`.

use std::rc::Rc;

use crate::cache::Cache;
use crate::crypto::{Commitment, CryptoBackend, Scalar};
use crate::errors::Result;
use crate::node::Stem;

/// `2 + 256 * 64`, the marker scalar distinguishing this vector's purpose
/// from other Pedersen-hash uses of the same commitment scheme.
const STEM_VECTOR_MARKER: u64 = 2 + 256 * 64;

fn marker_scalar() -> Scalar {
    let mut out = [0u8; 32];
    out[..8].copy_from_slice(&STEM_VECTOR_MARKER.to_le_bytes());
    out
}

/// Split a value into its low and high 16-byte halves, each zero-extended
/// back to 32 bytes (i.e. treated as its own little-endian scalar). `value`
/// is zero-left-padded to 32 bytes first, so a short address's meaningful
/// bytes land at the end of `padded` (in its high half) rather than being
/// treated as low-order.
fn split_halves(value: &[u8]) -> (Scalar, Scalar) {
    let mut lo = [0u8; 32];
    let mut hi = [0u8; 32];
    let mut padded = [0u8; 32];
    let len = value.len().min(32);
    padded[32 - len..].copy_from_slice(&value[..len]);
    lo[..16].copy_from_slice(&padded[..16]);
    hi[..16].copy_from_slice(&padded[16..32]);
    (lo, hi)
}

pub struct StemHasher {
    crypto: Rc<dyn CryptoBackend>,
    address_cache: Cache<Vec<u8>, Commitment>,
    stem_cache: Cache<Vec<u8>, Stem>,
}

impl StemHasher {
    pub fn new(
        crypto: Rc<dyn CryptoBackend>,
        address_cache_capacity: usize,
        stem_cache_capacity: usize,
    ) -> Self {
        Self {
            crypto,
            address_cache: Cache::new(address_cache_capacity),
            stem_cache: Cache::new(stem_cache_capacity),
        }
    }

    /// Seed the stem cache, e.g. from `TrieConfig::preloaded_stems`.
    pub fn preload_stem(&mut self, address: &[u8], index: &Scalar, stem: Stem) {
        self.stem_cache.put(stem_cache_key(address, index), stem);
    }

    fn base_commitment(&mut self, address: &[u8]) -> Result<Commitment> {
        if let Some(cached) = self.address_cache.get(&address.to_vec()) {
            return Ok(cached);
        }
        let (addr_lo, addr_hi) = split_halves(address);
        let commitment = self
            .crypto
            .commit(&[marker_scalar(), addr_lo, addr_hi])?;
        self.address_cache.put(address.to_vec(), commitment.clone());
        Ok(commitment)
    }

    /// Batched variant of [`StemHasher::compute_stem`] for a deduplicated
    /// set of indices under the same address: shares the address's base
    /// commitment and funnels every uncached index through a single
    /// `group_to_field_many` call (one batched Montgomery inversion)
    /// instead of one `group_to_field` per index.
    pub fn compute_stems_many(&mut self, address: &[u8], indices: &[Scalar]) -> Result<Vec<Stem>> {
        let mut results: Vec<Option<Stem>> = vec![None; indices.len()];
        let mut pending_positions = Vec::new();
        let mut pending_commitments = Vec::new();

        for (position, index) in indices.iter().enumerate() {
            let cache_key = stem_cache_key(address, index);
            if let Some(cached) = self.stem_cache.get(&cache_key) {
                results[position] = Some(cached);
                continue;
            }
            let base = self.base_commitment(address)?;
            let (idx_lo, idx_hi) = split_halves(index);
            let full = self.crypto.update_sparse(
                &base,
                &[3, 4],
                &[[0u8; 32], [0u8; 32]],
                &[idx_lo, idx_hi],
            )?;
            pending_positions.push(position);
            pending_commitments.push(full);
        }

        if !pending_commitments.is_empty() {
            let fields = self.crypto.group_to_field_many(&pending_commitments)?;
            for (position, field) in pending_positions.into_iter().zip(fields) {
                let mut stem: Stem = [0u8; 31];
                stem.copy_from_slice(&field[..31]);
                self.stem_cache
                    .put(stem_cache_key(address, &indices[position]), stem);
                results[position] = Some(stem);
            }
        }

        Ok(results.into_iter().map(|r| r.expect("every position filled")).collect())
    }

    pub fn compute_stem(&mut self, address: &[u8], index: &Scalar) -> Result<Stem> {
        let cache_key = stem_cache_key(address, index);
        if let Some(cached) = self.stem_cache.get(&cache_key) {
            return Ok(cached);
        }

        let base = self.base_commitment(address)?;
        let (idx_lo, idx_hi) = split_halves(index);
        let full = self.crypto.update_sparse(
            &base,
            &[3, 4],
            &[[0u8; 32], [0u8; 32]],
            &[idx_lo, idx_hi],
        )?;
        let field = self.crypto.group_to_field(&full)?;

        let mut stem: Stem = [0u8; 31];
        stem.copy_from_slice(&field[..31]);
        self.stem_cache.put(cache_key, stem);
        Ok(stem)
    }
}

fn stem_cache_key(address: &[u8], index: &Scalar) -> Vec<u8> {
    let mut key = Vec::with_capacity(address.len() + 32);
    key.extend_from_slice(address);
    key.extend_from_slice(index);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BandersnatchBackend;

    #[test]
    fn stem_is_deterministic_and_cacheable() {
        let crypto: Rc<dyn CryptoBackend> = Rc::new(BandersnatchBackend::new());
        let mut hasher = StemHasher::new(crypto, 8, 8);
        let address = [0x11u8; 20];
        let index = [0u8; 32];

        let first = hasher.compute_stem(&address, &index).unwrap();
        let second = hasher.compute_stem(&address, &index).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_indices_yield_distinct_stems() {
        let crypto: Rc<dyn CryptoBackend> = Rc::new(BandersnatchBackend::new());
        let mut hasher = StemHasher::new(crypto, 8, 8);
        let address = [0x22u8; 20];
        let mut index_a = [0u8; 32];
        let mut index_b = [0u8; 32];
        index_b[0] = 1;

        let a = hasher.compute_stem(&address, &index_a).unwrap();
        let b = hasher.compute_stem(&address, &index_b).unwrap();
        assert_ne!(a, b);
        index_a[0] = 1;
        assert_eq!(a, hasher.compute_stem(&address, &index_a).unwrap());
    }
}
