//! # Key Management
//!
//! Ed25519 keypair generation and serialization for node identities.
//!
//! Every validator and every client submitting a transaction holds one of
//! these. The consensus port signs proposals and votes with it; the
//! producer checks transaction signatures against it.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (thanks, ed25519-dalek).
//! - We use OS-level RNG (`OsRng`) for key generation.
//! - Key bytes are never logged.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// A node identity keypair wrapping Ed25519 signing and verification keys.
///
/// `NodeKeypair` intentionally does NOT implement `Serialize`/`Deserialize`
/// directly — serializing private keys should be a deliberate act. Use
/// `to_bytes()` / `from_bytes()` explicitly.
pub struct NodeKeypair {
    signing_key: SigningKey,
}

/// The public half of a node identity, safe to share with peers.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePublicKey {
    bytes: [u8; 32],
}

/// An Ed25519 signature over a message. Always exactly 64 bytes for a
/// signature produced by this module; stored as `Vec<u8>` for serde
/// convenience when decoding attacker-controlled wire data.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSignature {
    bytes: Vec<u8>,
}

impl NodeKeypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Constructs a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    pub fn from_bytes(secret_key_bytes: &[u8; SECRET_KEY_LENGTH]) -> Result<Self, KeyError> {
        Ok(Self::from_seed(secret_key_bytes))
    }

    /// Reconstruct a keypair from a hex-encoded secret key. Used when
    /// loading a persisted validator key from disk.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidSecretKey)?;
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(KeyError::InvalidSecretKey);
        }
        let mut arr = [0u8; SECRET_KEY_LENGTH];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    pub fn public_key(&self) -> NodePublicKey {
        NodePublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message. Ed25519 signatures are deterministic — no nonce
    /// management, no RNG needed at signing time.
    pub fn sign(&self, message: &[u8]) -> NodeSignature {
        let sig = self.signing_key.sign(message);
        NodeSignature {
            bytes: sig.to_bytes().to_vec(),
        }
    }

    pub fn verify(&self, message: &[u8], signature: &NodeSignature) -> bool {
        self.public_key().verify(message, signature)
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.secret_key_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl Clone for NodeKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKeypair(pub={})", self.public_key().to_hex())
    }
}

impl PartialEq for NodeKeypair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key_bytes() == other.public_key_bytes()
    }
}

impl Eq for NodeKeypair {}

impl NodePublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        if slice.len() != 32 {
            return Err(KeyError::InvalidPublicKey);
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn verify(&self, message: &[u8], signature: &NodeSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let sig_bytes: [u8; 64] = match signature.bytes.as_slice().try_into() {
            Ok(b) => b,
            Err(_) => return false,
        };
        let dalek_sig = DalekSignature::from_bytes(&sig_bytes);
        verifying_key.verify(message, &dalek_sig).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self { bytes: arr })
    }
}

impl Hash for NodePublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for NodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePublicKey({})", &self.to_hex()[..16])
    }
}

impl NodeSignature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 64 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Display for NodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        if hex_str.len() >= 128 {
            write!(f, "NodeSignature({}...{})", &hex_str[..8], &hex_str[120..])
        } else {
            write!(f, "NodeSignature({})", hex_str)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_keypair() {
        let kp = NodeKeypair::generate();
        assert_eq!(kp.public_key_bytes().len(), 32);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let kp = NodeKeypair::generate();
        let msg = b"commit block 42";
        let sig = kp.sign(msg);
        assert!(kp.verify(msg, &sig));
    }

    #[test]
    fn wrong_message_fails_verification() {
        let kp = NodeKeypair::generate();
        let sig = kp.sign(b"correct");
        assert!(!kp.verify(b"wrong", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = NodeKeypair::generate();
        let kp2 = NodeKeypair::generate();
        let sig = kp1.sign(b"message");
        assert!(!kp2.verify(b"message", &sig));
    }

    #[test]
    fn hex_roundtrip_secret() {
        let kp = NodeKeypair::generate();
        let hex_str = kp.to_hex();
        let restored = NodeKeypair::from_hex(&hex_str).unwrap();
        assert_eq!(kp.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(NodeKeypair::from_hex("deadbeef").is_err());
        assert!(NodeKeypair::from_hex("not-hex-at-all").is_err());
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let kp = NodeKeypair::generate();
        let pk = kp.public_key();
        let recovered = NodePublicKey::from_hex(&pk.to_hex()).unwrap();
        assert_eq!(pk, recovered);
    }

    #[test]
    fn deterministic_from_seed() {
        let seed = [42u8; 32];
        let kp1 = NodeKeypair::from_seed(&seed);
        let kp2 = NodeKeypair::from_seed(&seed);
        assert_eq!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn deterministic_signatures() {
        let kp = NodeKeypair::generate();
        let msg = b"deterministic";
        assert_eq!(kp.sign(msg).as_bytes(), kp.sign(msg).as_bytes());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = NodeKeypair::generate();
        let debug_str = format!("{:?}", kp);
        assert!(debug_str.starts_with("NodeKeypair(pub="));
        assert!(!debug_str.contains("signing_key"));
    }

    #[test]
    fn public_key_try_from_slice_rejects_wrong_length() {
        let short = [0u8; 16];
        assert!(NodePublicKey::try_from_slice(&short).is_err());
    }

    #[test]
    fn signature_hex_roundtrip() {
        let kp = NodeKeypair::generate();
        let sig = kp.sign(b"test");
        let recovered = NodeSignature::from_hex(&sig.to_hex()).unwrap();
        assert_eq!(sig, recovered);
    }
}
