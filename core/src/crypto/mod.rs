//! # Cryptographic Primitives
//!
//! Everything signing- and hashing-related flows through here: Ed25519 for
//! transaction and vote signatures, BLAKE3/SHA-256 for block and
//! transaction hashing. No bespoke primitives — thin, typed wrappers around
//! audited crates only.

pub mod hash;
pub mod keys;

pub use hash::{blake3_hash, blake3_hash_multi, merkle_root, sha256};
pub use keys::{KeyError, NodeKeypair, NodePublicKey, NodeSignature};
