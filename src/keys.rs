//! C3: the trie-key adapter.
//!
//! Derives 32-byte trie keys for account header fields, storage slots, and
//! EVM code chunks, and chunkifies raw bytecode into 32-byte leaves whose
//! leading byte records how many bytes of PUSH immediate data spill in from
//! the previous chunk.

use primitive_types::U256;

use crate::crypto::Scalar;
use crate::errors::Result;
use crate::node::Stem;
use crate::stem::StemHasher;

pub const BASIC_DATA_LEAF_KEY: u8 = 0;
pub const CODE_HASH_LEAF_KEY: u8 = 1;
pub const HEADER_STORAGE_OFFSET: u64 = 64;
pub const CODE_OFFSET: u64 = 128;
pub const VERKLE_NODE_WIDTH: u64 = 256;
pub const VERKLE_NODE_WIDTH_LOG2: u32 = 8;
pub const HEADER_STORAGE_SIZE: u64 = CODE_OFFSET;

/// `2^(256 - VERKLE_NODE_WIDTH_LOG2)`, computed as a left-shift rather than
/// `pow` to match the reference clients bit-for-bit (see design notes:
/// this is load-bearing for the S-series test vectors, not a style choice).
pub fn main_storage_offset_shift() -> U256 {
    U256::one() << (256 - VERKLE_NODE_WIDTH_LOG2 as usize)
}

fn u256_to_scalar(value: U256) -> Scalar {
    let mut bytes_be = [0u8; 32];
    value.to_big_endian(&mut bytes_be);
    bytes_be.reverse();
    bytes_be
}

/// Tree-key index and in-stem suffix for a header field (`BASIC_DATA` or
/// `CODE_HASH`). Header fields live at stem index 0.
pub fn header_key_parts(leaf_key: u8) -> (Scalar, u8) {
    ([0u8; 32], leaf_key)
}

/// Tree-key index and in-stem suffix for storage slot `slot`.
pub fn storage_key_parts(slot: U256) -> (Scalar, u8) {
    if slot < U256::from(HEADER_STORAGE_SIZE) {
        let position = slot + U256::from(HEADER_STORAGE_OFFSET);
        let index = position / U256::from(VERKLE_NODE_WIDTH);
        let suffix = (position % U256::from(VERKLE_NODE_WIDTH)).low_u32() as u8;
        (u256_to_scalar(index), suffix)
    } else {
        let index = (slot >> VERKLE_NODE_WIDTH_LOG2 as usize) + main_storage_offset_shift();
        let suffix = slot.low_u32() as u8;
        (u256_to_scalar(index), suffix)
    }
}

/// Tree-key index and in-stem suffix for code chunk `chunk_id`.
pub fn code_chunk_key_parts(chunk_id: u64) -> (Scalar, u8) {
    let offset = CODE_OFFSET + chunk_id;
    let index = U256::from(offset / VERKLE_NODE_WIDTH);
    let suffix = (offset % VERKLE_NODE_WIDTH) as u8;
    (u256_to_scalar(index), suffix)
}

/// A fully-derived 32-byte trie key: stem (31 bytes) followed by an
/// in-stem suffix byte.
pub fn assemble_key(stem: &Stem, suffix: u8) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..31].copy_from_slice(stem);
    key[31] = suffix;
    key
}

pub fn header_key(stems: &mut StemHasher, address: &[u8], leaf_key: u8) -> Result<[u8; 32]> {
    let (index, suffix) = header_key_parts(leaf_key);
    let stem = stems.compute_stem(address, &index)?;
    Ok(assemble_key(&stem, suffix))
}

pub fn storage_key(stems: &mut StemHasher, address: &[u8], slot: U256) -> Result<[u8; 32]> {
    let (index, suffix) = storage_key_parts(slot);
    let stem = stems.compute_stem(address, &index)?;
    Ok(assemble_key(&stem, suffix))
}

pub fn code_chunk_key(stems: &mut StemHasher, address: &[u8], chunk_id: u64) -> Result<[u8; 32]> {
    let (index, suffix) = code_chunk_key_parts(chunk_id);
    let stem = stems.compute_stem(address, &index)?;
    Ok(assemble_key(&stem, suffix))
}

/// Derive keys for a mixed batch of header fields, storage slots, and code
/// chunks in one call, deduplicating stem indices so each distinct
/// `(address, index)` is resolved once via `StemHasher::compute_stems_many`.
pub fn many_stems(
    stems: &mut StemHasher,
    address: &[u8],
    header_leaf_keys: &[u8],
    storage_slots: &[U256],
    code_chunk_ids: &[u64],
) -> Result<Vec<[u8; 32]>> {
    let mut parts: Vec<(Scalar, u8)> = Vec::new();
    for &leaf_key in header_leaf_keys {
        parts.push(header_key_parts(leaf_key));
    }
    for &slot in storage_slots {
        parts.push(storage_key_parts(slot));
    }
    for &chunk_id in code_chunk_ids {
        parts.push(code_chunk_key_parts(chunk_id));
    }

    let mut unique_indices: Vec<Scalar> = Vec::new();
    let mut index_of: Vec<usize> = Vec::with_capacity(parts.len());
    for (index, _) in &parts {
        let position = unique_indices.iter().position(|seen| seen == index);
        match position {
            Some(p) => index_of.push(p),
            None => {
                index_of.push(unique_indices.len());
                unique_indices.push(*index);
            }
        }
    }

    let stems_resolved = stems.compute_stems_many(address, &unique_indices)?;
    Ok(parts
        .iter()
        .zip(index_of)
        .map(|((_, suffix), position)| assemble_key(&stems_resolved[position], *suffix))
        .collect())
}

/// Chunkify EVM bytecode into 32-byte leaves: 31 bytes of code, prefixed
/// with `min(nPushData, 31)` where `nPushData` is the number of bytes at
/// the start of the chunk that are PUSH immediate data spilling over from
/// an instruction in a previous chunk.
pub fn chunkify_bytecode(code: &[u8]) -> Vec<[u8; 32]> {
    if code.is_empty() {
        return Vec::new();
    }

    let mut push_data = vec![false; code.len()];
    let mut i = 0;
    while i < code.len() {
        let op = code[i];
        if (0x60..=0x7f).contains(&op) {
            let immediate_len = (op - 0x60 + 1) as usize;
            for j in (i + 1)..(i + 1 + immediate_len).min(code.len()) {
                push_data[j] = true;
            }
            i += 1 + immediate_len;
        } else {
            i += 1;
        }
    }

    let mut padded_len = code.len();
    if padded_len % 31 != 0 {
        padded_len += 31 - (padded_len % 31);
    }
    let num_chunks = padded_len / 31;

    let mut chunks = Vec::with_capacity(num_chunks);
    for chunk_index in 0..num_chunks {
        let start = chunk_index * 31;
        let end = (start + 31).min(code.len());

        let mut leading = 0usize;
        for &flagged in push_data.iter().skip(start).take(31) {
            if flagged {
                leading += 1;
            } else {
                break;
            }
        }

        let mut leaf = [0u8; 32];
        leaf[0] = leading.min(31) as u8;
        if start < end {
            leaf[1..1 + (end - start)].copy_from_slice(&code[start..end]);
        }
        chunks.push(leaf);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keys_share_stem_index_zero() {
        let (basic_idx, basic_suffix) = header_key_parts(BASIC_DATA_LEAF_KEY);
        let (code_idx, code_suffix) = header_key_parts(CODE_HASH_LEAF_KEY);
        assert_eq!(basic_idx, [0u8; 32]);
        assert_eq!(code_idx, [0u8; 32]);
        assert_eq!(basic_suffix, 0);
        assert_eq!(code_suffix, 1);
    }

    #[test]
    fn storage_slot_below_header_size_maps_into_header_stem() {
        let (index, suffix) = storage_key_parts(U256::from(0));
        assert_eq!(index, [0u8; 32]);
        assert_eq!(suffix, HEADER_STORAGE_OFFSET as u8);
    }

    #[test]
    fn storage_slot_above_header_size_uses_main_storage_offset() {
        let (index, _) = storage_key_parts(U256::from(HEADER_STORAGE_SIZE));
        let expected = U256::from(HEADER_STORAGE_SIZE >> VERKLE_NODE_WIDTH_LOG2 as u64)
            + main_storage_offset_shift();
        assert_eq!(index, u256_to_scalar(expected));
    }

    #[test]
    fn code_chunking_preserves_byte_count_and_pads_to_31() {
        let code = vec![0x00u8; 40];
        let chunks = chunkify_bytecode(&code);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn push_immediate_data_carries_nonzero_prefix_into_next_chunk() {
        // PUSH32 at offset 29 consumes bytes 30..=61 as immediate data,
        // spilling 31 bytes past the first 31-byte chunk boundary.
        let mut code = vec![0x00u8; 29];
        code.push(0x7f); // PUSH32
        code.extend(vec![0xAAu8; 32]);
        let chunks = chunkify_bytecode(&code);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[1][0], 31);
    }

    #[test]
    fn empty_bytecode_has_no_chunks() {
        assert!(chunkify_bytecode(&[]).is_empty());
    }
}
