//! # Hashing Utilities
//!
//! Hash functions used for block hashes, transaction ids, and the
//! transaction-set Merkle root committed to in a block header.
//!
//! - **BLAKE3** — the default. Fast, parallelizable, used for everything
//!   that is internal to this protocol.
//! - **SHA-256** — kept for callers that need a widely interoperable
//!   digest (e.g. hex fingerprints exchanged with external tooling).

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Compute the BLAKE3 hash of the input data, returned as a fixed array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash multiple byte slices together without a concatenation allocation.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Compute a Merkle root from a list of leaf hashes using BLAKE3.
///
/// Odd levels duplicate the last leaf, matching the common Bitcoin-style
/// construction. Callers are responsible for rejecting duplicate
/// transactions before hashing a block's leaves — that sidesteps the
/// well-known CVE-2012-2459 ambiguity this construction would otherwise
/// permit.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut current_level: Vec<[u8; 32]> = leaves.to_vec();

    if current_level.len() == 1 {
        return blake3_hash_multi(&[current_level[0].as_slice(), current_level[0].as_slice()]);
    }

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity((current_level.len() + 1) / 2);

        for chunk in current_level.chunks(2) {
            let left = &chunk[0];
            let right = if chunk.len() == 2 { &chunk[1] } else { &chunk[0] };
            next_level.push(blake3_hash_multi(&[left.as_slice(), right.as_slice()]));
        }

        current_level = next_level;
    }

    current_level[0]
}
