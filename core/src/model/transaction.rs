//! Transaction: the unit of client intent that flows from the mempool into
//! a produced block.

use crate::crypto::{blake3_hash, NodePublicKey, NodeSignature};
use crate::model::account::Address;
use serde::{Deserialize, Serialize};

/// A signed transfer of value between two accounts.
///
/// `hash` is derived deterministically from the signed fields and is never
/// trusted from the wire without recomputation — `Transaction::verify`
/// recomputes it and checks both the hash and the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub amount: u64,
    pub fee: u64,
    pub nonce: u64,
    pub signature: NodeSignature,
}

/// Errors produced while validating a transaction in isolation (no state
/// lookups — those live in the producer/state layer).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction signature does not verify against the sender's public key")]
    InvalidSignature,
    #[error("transaction amount must be greater than zero")]
    ZeroAmount,
    #[error("sender and recipient must differ")]
    SelfTransfer,
}

impl Transaction {
    /// Builds and signs a transaction with the given keypair, which must
    /// correspond to `sender`.
    pub fn new_signed(
        keypair: &crate::crypto::NodeKeypair,
        sender: Address,
        recipient: Address,
        amount: u64,
        fee: u64,
        nonce: u64,
    ) -> Self {
        let signature = keypair.sign(&Self::signing_payload(&sender, &recipient, amount, fee, nonce));
        Self {
            sender,
            recipient,
            amount,
            fee,
            nonce,
            signature,
        }
    }

    fn signing_payload(
        sender: &Address,
        recipient: &Address,
        amount: u64,
        fee: u64,
        nonce: u64,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 32 + 8 + 8 + 8);
        buf.extend_from_slice(sender.as_bytes());
        buf.extend_from_slice(recipient.as_bytes());
        buf.extend_from_slice(&amount.to_le_bytes());
        buf.extend_from_slice(&fee.to_le_bytes());
        buf.extend_from_slice(&nonce.to_le_bytes());
        buf
    }

    /// Deterministic transaction id, used for mempool keys and dedup.
    pub fn id(&self) -> [u8; 32] {
        let mut buf = Self::signing_payload(&self.sender, &self.recipient, self.amount, self.fee, self.nonce);
        buf.extend_from_slice(self.signature.as_bytes());
        blake3_hash(&buf)
    }

    /// Structural + cryptographic validity, independent of account state.
    pub fn verify(&self, sender_key: &NodePublicKey) -> Result<(), TransactionError> {
        if self.amount == 0 {
            return Err(TransactionError::ZeroAmount);
        }
        if self.sender == self.recipient {
            return Err(TransactionError::SelfTransfer);
        }
        let payload = Self::signing_payload(&self.sender, &self.recipient, self.amount, self.fee, self.nonce);
        if !sender_key.verify(&payload, &self.signature) {
            return Err(TransactionError::InvalidSignature);
        }
        Ok(())
    }
}
