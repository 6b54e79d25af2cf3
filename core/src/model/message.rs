//! Wire messages the gossip switch fans out to the transport, and the
//! taxonomy peers use to tell them apart without inspecting the payload.

use crate::crypto::blake3_hash;
use crate::model::block::Block;
use crate::model::proposal::{Proposal, Vote};
use crate::model::transaction::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Transaction,
    Block,
    Proposal,
    Vote,
}

/// A message as it travels between the propagators, the gossip switch, and
/// the transport. `id()` is the dedup key the switch's seen-cache keys on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SwitchMessage {
    Transaction(Transaction),
    Block(Block),
    Proposal(Proposal),
    Vote(Vote),
}

impl SwitchMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SwitchMessage::Transaction(_) => MessageKind::Transaction,
            SwitchMessage::Block(_) => MessageKind::Block,
            SwitchMessage::Proposal(_) => MessageKind::Proposal,
            SwitchMessage::Vote(_) => MessageKind::Vote,
        }
    }

    /// Deduplication identity. Uses bincode's deterministic encoding rather
    /// than re-deriving a payload-specific hash per variant — the switch
    /// only needs "have I seen these exact bytes," not a stable content
    /// address across versions.
    pub fn id(&self) -> [u8; 32] {
        let encoded = bincode::serialize(self).unwrap_or_default();
        blake3_hash(&encoded)
    }
}
