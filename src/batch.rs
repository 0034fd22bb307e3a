//! C6: the batched commitment engine.
//!
//! Recomputing a 256-wide commitment from scratch costs 256 scalar-mults
//! per node. Instead, dirty nodes enrolled by the visitors (C5) are
//! processed level-synchronously, deepest-first: each level's commitment
//! deltas are rolled up via `CryptoBackend::update_sparse` (one scalar-mult
//! per *changed* index) and the expensive group-to-field step is amortised
//! across the whole level with a single vectorised call.

use std::collections::HashMap;

use tracing::{debug, debug_span};

use crate::crypto::{Commitment, CryptoBackend, Scalar, ZERO_SCALAR};
use crate::errors::Result;
use crate::node::{Location, Node, NodeRef};

/// `insert-on-mutation` map of nodes accumulated since the last root
/// computation, keyed by location. A `NullBranch`/`NullLeaf` enrolled under
/// a non-empty location evicts its entry so a removed subtree is never
/// hashed (see [`crate::visitor::remove`]).
pub type BatchMap = HashMap<Location, NodeRef>;

/// Scalar marking a stem/extension node's four-wide commitment vector,
/// distinguishing it from a plain 256-wide Internal commitment.
const EXTENSION_MARKER: u64 = 1;

fn marker_scalar(marker: u64) -> Scalar {
    let mut out = [0u8; 32];
    out[..8].copy_from_slice(&marker.to_le_bytes());
    out
}

/// Split a leaf value into the `(low, high)` scalar pair contributed to a
/// Stem's half-vector (§4.4): `low` carries the value's first 16 bytes plus
/// a presence flag at byte 16, `high` carries the last 16 bytes — both
/// right-padded with zeros to a full scalar. `None` (an absent slot)
/// contributes the zero pair.
fn value_to_low_high(value: Option<&[u8]>) -> (Scalar, Scalar) {
    let value = match value {
        Some(v) => v,
        None => return (ZERO_SCALAR, ZERO_SCALAR),
    };
    let mut low = [0u8; 32];
    let low_len = value.len().min(16);
    low[..low_len].copy_from_slice(&value[..low_len]);
    low[16] = 1;

    let mut high = [0u8; 32];
    if value.len() > 16 {
        let high_len = (value.len() - 16).min(16);
        high[..high_len].copy_from_slice(&value[16..16 + high_len]);
    }
    (low, high)
}

pub struct BatchProcessor {
    max_batch_size: usize,
}

impl BatchProcessor {
    pub fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    /// Remove `location`'s entry (used when a subtree is deleted).
    pub fn evict(map: &mut BatchMap, location: &Location) {
        map.remove(location);
    }

    /// Run the level-synchronous flush algorithm over `map` against
    /// `root`, returning the new root hash. `map` is drained as it is
    /// processed and is empty on return.
    pub fn compute_root_hash(
        &self,
        root: &NodeRef,
        map: &mut BatchMap,
        crypto: &dyn CryptoBackend,
    ) -> Result<Scalar> {
        let mut entries: Vec<(Location, NodeRef)> = map.drain().collect();
        entries.sort_by(|a, b| b.0.depth().cmp(&a.0.depth()));

        let total_entries = entries.len();
        let mut current_depth: Option<usize> = None;
        let mut pending: Vec<NodeRef> = Vec::new();
        let mut levels_processed = 0usize;

        let mut index = 0;
        while index < entries.len() {
            let (location, node_ref) = entries[index].clone();
            index += 1;

            if location.is_root() {
                self.flush(&mut pending, crypto)?;
                levels_processed += 1;
                let hash = finalize_root(root, crypto)?;
                debug!(total_entries, levels_processed, "commit finished at root");
                return Ok(hash);
            }

            if current_depth != Some(location.depth()) || pending.len() > self.max_batch_size {
                self.flush(&mut pending, crypto)?;
                levels_processed += 1;
                current_depth = Some(location.depth());
            }

            let needs_processing = {
                let borrowed = node_ref.borrow();
                borrowed.is_dirty() || borrowed.hash().is_none()
            };
            if needs_processing {
                pending.push(node_ref);
            }
        }

        // No empty-location entry was enrolled (e.g. the trie is empty or
        // the root itself was never touched): still finalise it so the
        // returned hash reflects any flushed descendants.
        self.flush(&mut pending, crypto)?;
        let hash = finalize_root(root, crypto)?;
        debug!(total_entries, levels_processed, "commit finished (root not separately enrolled)");
        Ok(hash)
    }

    fn flush(&self, batch: &mut Vec<NodeRef>, crypto: &dyn CryptoBackend) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let span = debug_span!("flush", batch_size = batch.len());
        let _guard = span.enter();

        let stems: Vec<NodeRef> = batch
            .iter()
            .filter(|n| matches!(&*n.borrow(), Node::Stem { .. }))
            .cloned()
            .collect();
        let internals: Vec<NodeRef> = batch
            .iter()
            .filter(|n| matches!(&*n.borrow(), Node::Internal { .. }))
            .cloned()
            .collect();

        // Phase A: stem left/right sub-commitments.
        for stem_ref in &stems {
            phase_a_stem(stem_ref, crypto)?;
        }

        // Batched group-to-field for every stem's (possibly updated)
        // left/right sub-commitments, amortising the inversion across the
        // whole level.
        let half_commitments: Vec<Commitment> = stems
            .iter()
            .flat_map(|s| {
                let borrowed = s.borrow();
                match &*borrowed {
                    Node::Stem { left_commitment, right_commitment, .. } => vec![
                        left_commitment.clone().unwrap_or_else(Commitment::identity),
                        right_commitment.clone().unwrap_or_else(Commitment::identity),
                    ],
                    _ => unreachable!(),
                }
            })
            .collect();
        let half_fields = crypto.group_to_field_many(&half_commitments)?;
        for (i, stem_ref) in stems.iter().enumerate() {
            let left_hash = half_fields[2 * i];
            let right_hash = half_fields[2 * i + 1];
            let stem_scalar = {
                let borrowed = stem_ref.borrow();
                match &*borrowed {
                    Node::Stem { stem, .. } => {
                        let mut s = [0u8; 32];
                        s[..31].copy_from_slice(stem);
                        s
                    }
                    _ => unreachable!(),
                }
            };
            let commitment =
                crypto.commit(&[marker_scalar(EXTENSION_MARKER), stem_scalar, left_hash, right_hash])?;
            let mut borrowed = stem_ref.borrow_mut();
            if let Node::Stem { left_hash: lh, right_hash: rh, commitment: c, .. } = &mut *borrowed {
                *lh = Some(left_hash);
                *rh = Some(right_hash);
                *c = Some(commitment);
            }
        }

        // Phase A': full commitment update for every Internal.
        for internal_ref in &internals {
            phase_a_internal(internal_ref, crypto)?;
        }

        // Batched group-to-field -> hash, covering both stems and
        // internals finalised in this flush.
        let mut finalize_targets: Vec<NodeRef> = Vec::with_capacity(stems.len() + internals.len());
        finalize_targets.extend(stems.iter().cloned());
        finalize_targets.extend(internals.iter().cloned());

        let commitments: Vec<Commitment> = finalize_targets
            .iter()
            .map(|n| {
                let borrowed = n.borrow();
                match &*borrowed {
                    Node::Stem { commitment, .. } | Node::Internal { commitment, .. } => {
                        commitment.clone().expect("commitment computed above")
                    }
                    _ => unreachable!(),
                }
            })
            .collect();
        let hashes = crypto.group_to_field_many(&commitments)?;

        for (node_ref, hash) in finalize_targets.iter().zip(hashes) {
            let mut borrowed = node_ref.borrow_mut();
            match &mut *borrowed {
                Node::Stem { hash: h, previous_hash, dirty, .. }
                | Node::Internal { hash: h, previous_hash, dirty, .. } => {
                    *h = Some(hash);
                    *previous_hash = Some(hash);
                    *dirty = false;
                }
                _ => unreachable!(),
            }
        }

        batch.clear();
        Ok(())
    }
}

fn phase_a_stem(stem_ref: &NodeRef, crypto: &dyn CryptoBackend) -> Result<()> {
    let (children, left_commitment, right_commitment) = {
        let borrowed = stem_ref.borrow();
        match &*borrowed {
            Node::Stem { children, left_commitment, right_commitment, .. } => {
                (children.clone(), left_commitment.clone(), right_commitment.clone())
            }
            _ => unreachable!(),
        }
    };

    let mut left_indices = Vec::new();
    let mut left_old = Vec::new();
    let mut left_new = Vec::new();
    let mut right_indices = Vec::new();
    let mut right_old = Vec::new();
    let mut right_new = Vec::new();

    for (i, child) in children.iter().enumerate() {
        let ((old_low, old_high), (new_low, new_high)) = {
            let borrowed = child.borrow();
            match &*borrowed {
                Node::Stored { .. } => continue,
                Node::NullLeaf { previous } => {
                    (value_to_low_high(previous.as_deref()), value_to_low_high(None))
                }
                Node::Leaf { value, previous, .. } => {
                    (value_to_low_high(previous.as_deref()), value_to_low_high(Some(value.as_slice())))
                }
                _ => continue,
            }
        };

        // Each child occupies two scalar positions, `2*local` (low) and
        // `2*local + 1` (high), within its half's 256-wide vector.
        let local = (i % 128) as u8;
        let low_index = 2 * local;
        let high_index = 2 * local + 1;
        let (indices, olds, news) = if i < 128 {
            (&mut left_indices, &mut left_old, &mut left_new)
        } else {
            (&mut right_indices, &mut right_old, &mut right_new)
        };
        if old_low != new_low {
            indices.push(low_index);
            olds.push(old_low);
            news.push(new_low);
        }
        if old_high != new_high {
            indices.push(high_index);
            olds.push(old_high);
            news.push(new_high);
        }
    }

    let new_left = if left_indices.is_empty() {
        left_commitment.unwrap_or_else(Commitment::identity)
    } else {
        crypto.update_sparse(
            &left_commitment.unwrap_or_else(Commitment::identity),
            &left_indices,
            &left_old,
            &left_new,
        )?
    };
    let new_right = if right_indices.is_empty() {
        right_commitment.unwrap_or_else(Commitment::identity)
    } else {
        crypto.update_sparse(
            &right_commitment.unwrap_or_else(Commitment::identity),
            &right_indices,
            &right_old,
            &right_new,
        )?
    };

    // Freeze `previous` at the value just committed, so the next flush's
    // delta is computed against this round's state rather than stale data.
    for child in children.iter() {
        let mut borrowed = child.borrow_mut();
        if let Node::Leaf { value, previous, .. } = &mut *borrowed {
            *previous = Some(value.clone());
        } else if let Node::NullLeaf { previous } = &mut *borrowed {
            *previous = None;
        }
    }

    if let Node::Stem { left_commitment, right_commitment, .. } = &mut *stem_ref.borrow_mut() {
        *left_commitment = Some(new_left);
        *right_commitment = Some(new_right);
    }
    Ok(())
}

fn phase_a_internal(internal_ref: &NodeRef, crypto: &dyn CryptoBackend) -> Result<()> {
    let (children, commitment) = {
        let borrowed = internal_ref.borrow();
        match &*borrowed {
            Node::Internal { children, commitment, .. } => (children.clone(), commitment.clone()),
            _ => unreachable!(),
        }
    };

    let mut indices = Vec::new();
    let mut olds = Vec::new();
    let mut news = Vec::new();

    for (i, child) in children.iter().enumerate() {
        let (old, new) = {
            let borrowed = child.borrow();
            match &*borrowed {
                Node::Stored { .. } => continue,
                Node::NullBranch => (ZERO_SCALAR, ZERO_SCALAR),
                Node::Stem { previous_hash, hash, .. } | Node::Internal { previous_hash, hash, .. } => (
                    previous_hash.unwrap_or(ZERO_SCALAR),
                    hash.unwrap_or(ZERO_SCALAR),
                ),
                _ => continue,
            }
        };
        if old == new {
            continue;
        }
        indices.push(i as u8);
        olds.push(old);
        news.push(new);
    }

    let new_commitment = if indices.is_empty() {
        commitment.unwrap_or_else(Commitment::identity)
    } else {
        crypto.update_sparse(&commitment.unwrap_or_else(Commitment::identity), &indices, &olds, &news)?
    };

    if let Node::Internal { commitment, .. } = &mut *internal_ref.borrow_mut() {
        *commitment = Some(new_commitment);
    }
    Ok(())
}

fn finalize_root(root: &NodeRef, crypto: &dyn CryptoBackend) -> Result<Scalar> {
    let children = {
        let borrowed = root.borrow();
        match &*borrowed {
            Node::Internal { children, .. } => children.clone(),
            _ => return Err(crate::errors::TrieError::invariant("root is not an Internal node")),
        }
    };
    let child_hashes: Vec<Scalar> = children
        .iter()
        .map(|c| c.borrow().hash().unwrap_or(ZERO_SCALAR))
        .collect();

    // An empty trie (every child still the zero scalar) has root hash zero
    // by definition, without running the identity commitment through
    // compress (whose encoding of the identity point is not itself zero).
    let (commitment, hash) = if child_hashes.iter().all(|h| *h == ZERO_SCALAR) {
        (Commitment::identity(), ZERO_SCALAR)
    } else {
        let commitment = crypto.commit(&child_hashes)?;
        let hash = crypto.compress(&commitment)?;
        (commitment, hash)
    };

    let mut borrowed = root.borrow_mut();
    if let Node::Internal { commitment: c, hash: h, previous_hash, dirty, .. } = &mut *borrowed {
        *c = Some(commitment);
        *h = Some(hash);
        *previous_hash = Some(hash);
        *dirty = false;
    }
    Ok(hash)
}
