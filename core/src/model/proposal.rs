//! Consensus round artifacts: the candidate block a proposer puts forward
//! for a round, and the votes validators cast on it.

use crate::crypto::{NodePublicKey, NodeSignature};
use crate::model::account::Address;
use crate::model::block::Block;
use serde::{Deserialize, Serialize};

/// A candidate block proposed for a given consensus round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub round: u64,
    pub block: Block,
    pub proposer: Address,
}

impl Proposal {
    pub fn height(&self) -> u64 {
        self.block.header.height
    }

    pub fn block_hash(&self) -> [u8; 32] {
        self.block.hash()
    }
}

/// The phase a vote is cast in. Solo policy never produces these; the
/// multi-phase BFT policies use `Prepare`/`Commit` to match the classic
/// two-phase voting pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotePhase {
    Prepare,
    Commit,
}

/// A single validator's signed vote on a proposal within a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub round: u64,
    pub block_hash: [u8; 32],
    pub phase: VotePhase,
    pub voter: Address,
    pub signature: NodeSignature,
}

impl Vote {
    pub fn signing_payload(round: u64, block_hash: &[u8; 32], phase: VotePhase) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 32 + 1);
        buf.extend_from_slice(&round.to_le_bytes());
        buf.extend_from_slice(block_hash);
        buf.push(match phase {
            VotePhase::Prepare => 0,
            VotePhase::Commit => 1,
        });
        buf
    }

    pub fn new_signed(
        keypair: &crate::crypto::NodeKeypair,
        round: u64,
        block_hash: [u8; 32],
        phase: VotePhase,
        voter: Address,
    ) -> Self {
        let signature = keypair.sign(&Self::signing_payload(round, &block_hash, phase));
        Self {
            round,
            block_hash,
            phase,
            voter,
            signature,
        }
    }

    pub fn verify(&self, voter_key: &NodePublicKey) -> bool {
        voter_key.verify(
            &Self::signing_payload(self.round, &self.block_hash, self.phase),
            &self.signature,
        )
    }
}
