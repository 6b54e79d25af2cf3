//! Domain events published on the event bus. Every subscriber receives a
//! clone — events are small and cheap to duplicate, and cloning avoids any
//! argument about ownership between an arbitrary number of subscribers.

use crate::model::account::Address;
use crate::model::block::Block;
use crate::model::transaction::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A transaction passed mempool admission and is now pending inclusion.
    /// The only event `Mempool::insert` may emit.
    AddTxToTxPool { tx: Transaction },
    /// The consensus port reached quorum and the repository durably wrote
    /// the block. Fired exactly once per height.
    BlockCommitted { block: Block },
    /// Distinct, separately-subscribable from `BlockCommitted` for forward
    /// compatibility with a write-ordering split the reference repository
    /// does not implement; never fired by `InMemoryRepository`.
    BlockWritten { block: Block },
    /// The repository rejected a proposed block during apply.
    BlockCommitFailed { round: u64, reason: String },
    /// A proposal failed structural or signature verification.
    BlockVerifyFailed { round: u64, reason: String },
    /// The consensus policy returned a fatal, non-recoverable error for the
    /// in-flight round.
    ConsensusFailed { round: u64, reason: String },
    /// A view-change: the master for the upcoming round changed without an
    /// intervening commit.
    MasterChange { round: u64, new_master: Address },
    /// Fired once the consensus policy's online wizard completes.
    Online,
    /// The round's block was produced with an empty transaction set.
    BlockWithoutTxs { round: u64 },
}

/// One variant per [`Event`] shape, used as the event bus's subscription key.
/// Kept distinct from `Event` itself so a subscriber can register interest
/// before any payload of that shape exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    AddTxToTxPool,
    BlockCommitted,
    BlockWritten,
    BlockCommitFailed,
    BlockVerifyFailed,
    ConsensusFailed,
    MasterChange,
    Online,
    BlockWithoutTxs,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::AddTxToTxPool { .. } => EventType::AddTxToTxPool,
            Event::BlockCommitted { .. } => EventType::BlockCommitted,
            Event::BlockWritten { .. } => EventType::BlockWritten,
            Event::BlockCommitFailed { .. } => EventType::BlockCommitFailed,
            Event::BlockVerifyFailed { .. } => EventType::BlockVerifyFailed,
            Event::ConsensusFailed { .. } => EventType::ConsensusFailed,
            Event::MasterChange { .. } => EventType::MasterChange,
            Event::Online => EventType::Online,
            Event::BlockWithoutTxs { .. } => EventType::BlockWithoutTxs,
        }
    }
}
