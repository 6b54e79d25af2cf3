//! Block and block header: the unit the producer builds and the repository
//! persists.

use crate::crypto::{blake3_hash_multi, merkle_root, NodePublicKey, NodeSignature};
use crate::model::account::Address;
use crate::model::transaction::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub parent_hash: [u8; 32],
    pub transactions_root: [u8; 32],
    pub state_root: [u8; 32],
    pub timestamp: u64,
    pub proposer: Address,
}

impl BlockHeader {
    /// The header hash is the block's identity. It does not cover the
    /// proposer's signature, which signs over this hash.
    pub fn hash(&self) -> [u8; 32] {
        blake3_hash_multi(&[
            &self.height.to_le_bytes(),
            &self.parent_hash,
            &self.transactions_root,
            &self.state_root,
            &self.timestamp.to_le_bytes(),
            self.proposer.as_bytes(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub proposer_signature: NodeSignature,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("transactions_root does not match the committed transaction set")]
    TransactionsRootMismatch,
    #[error("proposer signature does not verify against the declared proposer")]
    InvalidProposerSignature,
}

impl Block {
    pub fn new_signed(
        keypair: &crate::crypto::NodeKeypair,
        height: u64,
        parent_hash: [u8; 32],
        proposer: Address,
        transactions: Vec<Transaction>,
        state_root: [u8; 32],
        timestamp: u64,
    ) -> Self {
        let transactions_root = Self::compute_transactions_root(&transactions);
        let header = BlockHeader {
            height,
            parent_hash,
            transactions_root,
            state_root,
            timestamp,
            proposer,
        };
        let proposer_signature = keypair.sign(&header.hash());
        Self {
            header,
            transactions,
            proposer_signature,
        }
    }

    pub fn compute_transactions_root(transactions: &[Transaction]) -> [u8; 32] {
        let leaves: Vec<[u8; 32]> = transactions.iter().map(|tx| tx.id()).collect();
        merkle_root(&leaves)
    }

    pub fn hash(&self) -> [u8; 32] {
        self.header.hash()
    }

    /// Structural integrity check: the committed Merkle root matches the
    /// carried transaction set and the proposer's signature verifies.
    /// Does not check state-transition validity — that is the producer's
    /// / repository's job during apply.
    pub fn verify(&self, proposer_key: &NodePublicKey) -> Result<(), BlockError> {
        if Self::compute_transactions_root(&self.transactions) != self.header.transactions_root {
            return Err(BlockError::TransactionsRootMismatch);
        }
        if !proposer_key.verify(&self.header.hash(), &self.proposer_signature) {
            return Err(BlockError::InvalidProposerSignature);
        }
        Ok(())
    }
}
