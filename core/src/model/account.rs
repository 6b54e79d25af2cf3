//! Account state: the balance/nonce ledger entries the state machine mutates
//! when a block is applied.

use serde::{Deserialize, Serialize};

/// A 32-byte address: the raw Ed25519 public key bytes of its owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", &self.to_hex()[..16])
    }
}

/// An account's ledger entry: balance and the next expected nonce.
///
/// Accounts are never deleted once created, even if their balance reaches
/// zero — a zero-balance account with a nonzero nonce still records history
/// that transaction replay needs to reject stale submissions against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
    pub frozen: bool,
}

impl Account {
    pub fn new(balance: u64) -> Self {
        Self {
            balance,
            nonce: 0,
            frozen: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            balance: 0,
            nonce: 0,
            frozen: false,
        }
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::empty()
    }
}
