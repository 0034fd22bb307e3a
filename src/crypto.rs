//! C1: the cryptographic backend boundary.
//!
//! Every curve-specific operation the engine needs is funnelled through the
//! [`CryptoBackend`] trait so the rest of the crate only ever handles opaque
//! [`Commitment`] values and canonical [`Scalar`] bytes. The sole production
//! implementation, [`BandersnatchBackend`], wraps `banderwagon` (the
//! Bandersnatch group) and `ipa-multipoint` (the precomputed Lagrange basis
//! used for vector commitments), the same pair the reference Rust Verkle
//! clients build on.

use ark_ff::{BigInteger, PrimeField, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use banderwagon::{Element, Fr};
use ipa_multipoint::committer::{Committer, DefaultCommitter};

use crate::errors::{Result, TrieError};

/// A field element in the trie's canonical byte order: little-endian,
/// matching the backing curve library (§3.1). Endianness never leaks past
/// this module.
pub type Scalar = [u8; 32];

pub const ZERO_SCALAR: Scalar = [0u8; 32];

/// Width of the vector committed to at every Internal/Stem node.
pub const COMMITMENT_WIDTH: usize = 256;

/// An opaque vector commitment: a point on the Bandersnatch curve kept in
/// uncompressed (in-memory) form. Only [`CryptoBackend::compress`] produces
/// the 32-byte canonical encoding used for hashing and persistence.
#[derive(Clone, Debug)]
pub struct Commitment(pub(crate) Element);

impl Commitment {
    pub fn identity() -> Self {
        Commitment(Element::zero())
    }
}

impl PartialEq for Commitment {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

fn scalar_to_fr(scalar: &Scalar) -> Result<Fr> {
    Fr::deserialize_compressed(&scalar[..])
        .map_err(|e| TrieError::crypto(format!("malformed scalar: {e}")))
}

fn fr_to_scalar(fr: &Fr) -> Scalar {
    let mut out = [0u8; 32];
    let bytes = fr.into_bigint().to_bytes_le();
    out[..bytes.len().min(32)].copy_from_slice(&bytes[..bytes.len().min(32)]);
    out
}

/// Every curve/field operation the engine delegates to the crypto layer.
/// Exists as a trait, rather than a concrete type, purely so tests can swap
/// in a faster or deterministic stand-in; production code has exactly one
/// implementation (§11).
pub trait CryptoBackend {
    /// Vector-commit to up to [`COMMITMENT_WIDTH`] scalars. Missing trailing
    /// entries are treated as zero.
    fn commit(&self, scalars: &[Scalar]) -> Result<Commitment>;

    /// `commit` followed by `compress`, for callers that only need the
    /// 32-byte result (e.g. the trie root).
    fn commit_as_compressed(&self, scalars: &[Scalar]) -> Result<Scalar>;

    /// Incrementally update a commitment at a sparse set of indices:
    /// `result = prev + sum_k G_{indices[k]} * (new[k] - old[k])`.
    fn update_sparse(
        &self,
        prev: &Commitment,
        indices: &[u8],
        old: &[Scalar],
        new: &[Scalar],
    ) -> Result<Commitment>;

    /// Canonical 32-byte encoding of a commitment.
    fn compress(&self, commitment: &Commitment) -> Result<Scalar>;

    /// Map a single commitment into the scalar field (the "group to field"
    /// step that turns a child's commitment into its parent's input scalar).
    fn group_to_field(&self, commitment: &Commitment) -> Result<Scalar>;

    /// Vectorised `group_to_field`, sharing a single batched field inversion
    /// (Montgomery's trick) across all inputs. Semantically equivalent to
    /// mapping `group_to_field` over the slice.
    fn group_to_field_many(&self, commitments: &[Commitment]) -> Result<Vec<Scalar>>;

    /// Pedersen-hash an arbitrary byte string by chunking it into 16-byte
    /// little-endian scalars and committing to them. `bytes.len()` must be a
    /// multiple of 16.
    fn pedersen_hash(&self, bytes: &[u8]) -> Result<Scalar>;
}

/// Production backend: Bandersnatch group arithmetic via `banderwagon`,
/// vector commitments via `ipa-multipoint`'s precomputed Lagrange basis.
pub struct BandersnatchBackend {
    committer: DefaultCommitter,
}

impl BandersnatchBackend {
    pub fn new() -> Self {
        Self {
            committer: DefaultCommitter::new(),
        }
    }
}

impl Default for BandersnatchBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoBackend for BandersnatchBackend {
    fn commit(&self, scalars: &[Scalar]) -> Result<Commitment> {
        if scalars.len() > COMMITMENT_WIDTH {
            return Err(TrieError::invariant(format!(
                "commit input has {} scalars, max is {COMMITMENT_WIDTH}",
                scalars.len()
            )));
        }
        let mut padded = vec![Fr::zero(); COMMITMENT_WIDTH];
        for (slot, scalar) in padded.iter_mut().zip(scalars) {
            *slot = scalar_to_fr(scalar)?;
        }
        Ok(Commitment(self.committer.commit_lagrange(&padded)))
    }

    fn commit_as_compressed(&self, scalars: &[Scalar]) -> Result<Scalar> {
        let commitment = self.commit(scalars)?;
        self.compress(&commitment)
    }

    fn update_sparse(
        &self,
        prev: &Commitment,
        indices: &[u8],
        old: &[Scalar],
        new: &[Scalar],
    ) -> Result<Commitment> {
        if indices.len() != old.len() || indices.len() != new.len() {
            return Err(TrieError::invariant(
                "update_sparse: indices/old/new length mismatch",
            ));
        }
        let mut acc = prev.0;
        for ((&index, old_scalar), new_scalar) in indices.iter().zip(old).zip(new) {
            let delta = scalar_to_fr(new_scalar)? - scalar_to_fr(old_scalar)?;
            acc += self.committer.scalar_mul(delta, index as usize);
        }
        Ok(Commitment(acc))
    }

    fn compress(&self, commitment: &Commitment) -> Result<Scalar> {
        let mut out = [0u8; 32];
        commitment
            .0
            .serialize_compressed(&mut out[..])
            .map_err(|e| TrieError::crypto(format!("commitment encode failed: {e}")))?;
        Ok(out)
    }

    fn group_to_field(&self, commitment: &Commitment) -> Result<Scalar> {
        Ok(fr_to_scalar(&commitment.0.map_to_scalar_field()))
    }

    fn group_to_field_many(&self, commitments: &[Commitment]) -> Result<Vec<Scalar>> {
        let elements: Vec<Element> = commitments.iter().map(|c| c.0).collect();
        let mapped = Element::batch_map_to_scalar_field(&elements);
        Ok(mapped.iter().map(fr_to_scalar).collect())
    }

    fn pedersen_hash(&self, bytes: &[u8]) -> Result<Scalar> {
        if bytes.len() % 16 != 0 {
            return Err(TrieError::invariant(
                "pedersen_hash input must be a multiple of 16 bytes",
            ));
        }
        let scalars: Vec<Scalar> = bytes
            .chunks(16)
            .map(|chunk| {
                let mut padded = [0u8; 32];
                padded[..chunk.len()].copy_from_slice(chunk);
                padded
            })
            .collect();
        let commitment = self.commit(&scalars)?;
        self.compress(&commitment)
    }
}
