//! Single-validator consensus: whatever this node proposes is immediately
//! final. No votes are collected because there is nobody else to vote.

use super::{ConsensusPolicy, ConsensusPortError, ConsensusResult, VoteOutcome};
use crate::event_bus::EventBus;
use crate::model::{Address, Event, Proposal, Vote};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct SoloPort {
    self_address: Address,
    round: AtomicU64,
    pending: RwLock<Option<Proposal>>,
    events: RwLock<Option<EventBus>>,
}

impl SoloPort {
    pub fn new(self_address: Address) -> Self {
        Self {
            self_address,
            round: AtomicU64::new(0),
            pending: RwLock::new(None),
            events: RwLock::new(None),
        }
    }

    /// Master is always this node; the `master` parameter exists only so
    /// the facade signature matches the other policies.
    pub fn initialization(&self, _master: Address, _participants: Vec<Address>, events: EventBus, _online_flag: bool) {
        *self.events.write() = Some(events);
    }

    /// Commits immediately — a solo validator needs no votes to reach
    /// agreement with itself.
    pub async fn to_consensus(&self, proposal: Proposal) -> Result<(), ConsensusPortError> {
        self.propose(proposal)?;
        *self.pending.write() = None;
        Ok(())
    }

    pub fn online(&self) {
        if let Some(events) = self.events.read().clone() {
            let _ = events.notify(Event::Online);
        }
    }

    pub fn get_consensus_result(&self) -> ConsensusResult {
        ConsensusResult {
            view: self.round.load(Ordering::Relaxed),
            participants: vec![self.self_address],
            master: self.self_address,
        }
    }

    pub fn proposer_for_round(&self, _round: u64) -> Option<Address> {
        Some(self.self_address)
    }

    pub fn pending_block_hash(&self) -> Option<[u8; 32]> {
        self.pending.read().as_ref().map(|p| p.block_hash())
    }
}

impl ConsensusPolicy for SoloPort {
    fn propose(&self, proposal: Proposal) -> Result<(), ConsensusPortError> {
        let round = proposal.round;
        let mut pending = self.pending.write();
        if pending.is_some() {
            return Err(ConsensusPortError::DuplicateProposal(round));
        }
        *pending = Some(proposal);
        self.round.store(round, Ordering::Relaxed);
        Ok(())
    }

    fn register_vote(&self, _vote: Vote) -> Result<VoteOutcome, ConsensusPortError> {
        Err(ConsensusPortError::NotApplicable)
    }

    fn current_round(&self) -> u64 {
        self.round.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NodeKeypair;
    use crate::model::Block;

    fn proposal(round: u64, proposer: Address) -> Proposal {
        let kp = NodeKeypair::generate();
        let block = Block::new_signed(&kp, round, [0u8; 32], proposer, vec![], [0u8; 32], round);
        Proposal { round, block, proposer }
    }

    #[tokio::test]
    async fn to_consensus_finalizes_without_votes() {
        let addr = Address::from_bytes([1u8; 32]);
        let port = SoloPort::new(addr);
        port.to_consensus(proposal(0, addr)).await.unwrap();
        assert_eq!(port.current_round(), 0);
    }

    #[tokio::test]
    async fn second_proposal_in_same_round_is_rejected_if_not_cleared() {
        let addr = Address::from_bytes([1u8; 32]);
        let port = SoloPort::new(addr);
        port.propose(proposal(0, addr)).unwrap();
        assert_eq!(port.propose(proposal(0, addr)), Err(ConsensusPortError::DuplicateProposal(0)));
    }

    #[tokio::test]
    async fn get_consensus_result_reports_self_as_master() {
        let addr = Address::from_bytes([1u8; 32]);
        let port = SoloPort::new(addr);
        port.to_consensus(proposal(0, addr)).await.unwrap();
        let result = port.get_consensus_result();
        assert_eq!(result.master, addr);
        assert_eq!(result.participants, vec![addr]);
        assert_eq!(result.view, 0);
    }

    #[tokio::test]
    async fn online_fires_event_when_events_bus_is_set() {
        let addr = Address::from_bytes([1u8; 32]);
        let port = SoloPort::new(addr);
        let bus = EventBus::new();
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = seen.clone();
        bus.subscribe(crate::model::EventType::Online, move |_| {
            flag.store(true, Ordering::SeqCst);
        });
        port.initialization(addr, vec![addr], bus, false);
        port.online();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn self_is_always_the_proposer() {
        let addr = Address::from_bytes([1u8; 32]);
        let port = SoloPort::new(addr);
        assert_eq!(port.proposer_for_round(42), Some(addr));
    }
}
