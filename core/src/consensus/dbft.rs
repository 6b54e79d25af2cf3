//! Classic two-phase BFT voting: a proposal needs `2f+1` `Prepare` votes
//! before validators move to voting `Commit`, and `2f+1` `Commit` votes
//! before the block is final. The prepare phase exists to let validators
//! discover whether the rest of the network saw the same proposal before
//! anyone commits to it — it is the extra round trip FBFT forgoes.
//!
//! Master only ever changes through an explicit view change: if `to_consensus`
//! times out waiting for commit quorum, this port rotates `current_master`
//! itself and fires [`Event::MasterChange`]. Nothing else moves it —
//! repeated calls to `initialization` with the same master are no-ops on
//! this field, matching a network where the round-robin role plugin is
//! expected to keep proposing the existing master until a timeout proves
//! otherwise.

use super::{ConsensusPolicy, ConsensusPortError, ConsensusResult, ValidatorSet, VoteOutcome};
use crate::crypto::NodePublicKey;
use crate::event_bus::EventBus;
use crate::model::{Address, Event, Proposal, Vote, VotePhase};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_millis(1500);

pub struct DbftPort {
    self_address: Address,
    validators: RwLock<ValidatorSet>,
    current_master: RwLock<Address>,
    round: AtomicU64,
    pending: RwLock<Option<Proposal>>,
    prepare_votes: RwLock<HashSet<Address>>,
    commit_votes: RwLock<HashSet<Address>>,
    phase_advanced: RwLock<bool>,
    events: RwLock<Option<EventBus>>,
    outcome: Mutex<Option<Result<(), ConsensusPortError>>>,
    notify: Notify,
    commit_timeout: Duration,
}

impl DbftPort {
    pub fn new(self_address: Address, validators: ValidatorSet) -> Self {
        Self::with_timeout(self_address, validators, DEFAULT_COMMIT_TIMEOUT)
    }

    pub fn with_timeout(self_address: Address, validators: ValidatorSet, commit_timeout: Duration) -> Self {
        let current_master = validators.proposer_for_round(0).unwrap_or(self_address);
        Self {
            self_address,
            validators: RwLock::new(validators),
            current_master: RwLock::new(current_master),
            round: AtomicU64::new(0),
            pending: RwLock::new(None),
            prepare_votes: RwLock::new(HashSet::new()),
            commit_votes: RwLock::new(HashSet::new()),
            phase_advanced: RwLock::new(false),
            events: RwLock::new(None),
            outcome: Mutex::new(None),
            notify: Notify::new(),
            commit_timeout,
        }
    }

    pub fn validators(&self) -> ValidatorSet {
        self.validators.read().clone()
    }

    pub fn initialization(&self, master: Address, participants: Vec<Address>, events: EventBus, _online_flag: bool) {
        *self.validators.write() = ValidatorSet::new(participants);
        *self.current_master.write() = master;
        *self.events.write() = Some(events);
    }

    pub async fn to_consensus(&self, proposal: Proposal) -> Result<(), ConsensusPortError> {
        self.propose(proposal)?;
        *self.outcome.lock() = None;
        let wait = async {
            loop {
                if let Some(result) = self.outcome.lock().take() {
                    return result;
                }
                self.notify.notified().await;
            }
        };
        match tokio::time::timeout(self.commit_timeout, wait).await {
            Ok(result) => result,
            Err(_) => self.handle_timeout(),
        }
    }

    pub fn online(&self) {
        if let Some(events) = self.events.read().clone() {
            let _ = events.notify(Event::Online);
        }
    }

    pub fn get_consensus_result(&self) -> ConsensusResult {
        ConsensusResult {
            view: self.round.load(Ordering::Relaxed),
            participants: self.validators.read().members(),
            master: *self.current_master.read(),
        }
    }

    pub fn pending_block_hash(&self) -> Option<[u8; 32]> {
        self.pending.read().as_ref().map(|p| p.block_hash())
    }

    fn handle_timeout(&self) -> Result<(), ConsensusPortError> {
        let round = self.round.load(Ordering::Relaxed);
        let current = *self.current_master.read();
        if let Some(next) = self.validators.read().next_after(current) {
            *self.current_master.write() = next;
            if let Some(events) = self.events.read().clone() {
                let _ = events.notify(Event::MasterChange { round, new_master: next });
            }
        }
        Err(ConsensusPortError::Timeout(round))
    }

    fn verify_vote(&self, vote: &Vote) -> Result<(), ConsensusPortError> {
        let round = self.round.load(Ordering::Relaxed);
        if vote.round != round {
            return Err(ConsensusPortError::StaleRound { voted: vote.round, current: round });
        }
        if !self.validators.read().contains(&vote.voter) {
            return Err(ConsensusPortError::UnknownVoter(vote.voter.to_hex()));
        }
        let key = NodePublicKey::from_bytes(*vote.voter.as_bytes());
        if !vote.verify(&key) {
            return Err(ConsensusPortError::InvalidVote);
        }
        Ok(())
    }
}

impl ConsensusPolicy for DbftPort {
    fn propose(&self, proposal: Proposal) -> Result<(), ConsensusPortError> {
        let round = proposal.round;
        let mut pending = self.pending.write();
        if pending.is_some() {
            return Err(ConsensusPortError::DuplicateProposal(round));
        }
        *pending = Some(proposal);
        self.round.store(round, Ordering::Relaxed);
        self.prepare_votes.write().clear();
        self.commit_votes.write().clear();
        *self.phase_advanced.write() = false;
        Ok(())
    }

    fn register_vote(&self, vote: Vote) -> Result<VoteOutcome, ConsensusPortError> {
        self.verify_vote(&vote)?;
        let hash = {
            let pending = self.pending.read();
            let Some(proposal) = pending.as_ref() else {
                return Err(ConsensusPortError::NoActiveProposal);
            };
            proposal.block_hash()
        };
        if vote.block_hash != hash {
            return Err(ConsensusPortError::InvalidVote);
        }

        let quorum = self.validators.read().quorum_threshold();
        let outcome = match vote.phase {
            VotePhase::Prepare => {
                self.prepare_votes.write().insert(vote.voter);
                let mut advanced = self.phase_advanced.write();
                if !*advanced && self.prepare_votes.read().len() >= quorum {
                    *advanced = true;
                    VoteOutcome::AdvancedPhase
                } else {
                    VoteOutcome::Pending
                }
            }
            VotePhase::Commit => {
                if !*self.phase_advanced.read() {
                    VoteOutcome::Pending
                } else {
                    self.commit_votes.write().insert(vote.voter);
                    if self.commit_votes.read().len() >= quorum {
                        VoteOutcome::Committed { block_hash: hash }
                    } else {
                        VoteOutcome::Pending
                    }
                }
            }
        };

        if let VoteOutcome::Committed { .. } = &outcome {
            self.round.fetch_add(1, Ordering::Relaxed);
            *self.outcome.lock() = Some(Ok(()));
            self.notify.notify_waiters();
        }
        Ok(outcome)
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

    struct Validator {
        kp: NodeKeypair,
        addr: Address,
    }

    fn make_validators(n: usize) -> Vec<Validator> {
        (0..n)
            .map(|_| {
                let kp = NodeKeypair::generate();
                let addr = Address::from_bytes(kp.public_key_bytes());
                Validator { kp, addr }
            })
            .collect()
    }

    fn proposal_for(validators: &[Validator], round: u64) -> Proposal {
        let proposer = &validators[0];
        let block = Block::new_signed(&proposer.kp, round, [0u8; 32], proposer.addr, vec![], [0u8; 32], round);
        Proposal { round, block, proposer: proposer.addr }
    }

    fn vote(v: &Validator, round: u64, hash: [u8; 32], phase: VotePhase) -> Vote {
        Vote::new_signed(&v.kp, round, hash, phase, v.addr)
    }

    fn port_for(validators: &[Validator]) -> DbftPort {
        let set = ValidatorSet::new(validators.iter().map(|v| v.addr).collect());
        DbftPort::new(validators[0].addr, set)
    }

    #[tokio::test]
    async fn to_consensus_wakes_up_once_votes_arrive_concurrently() {
        let validators = make_validators(4);
        let port = std::sync::Arc::new(port_for(&validators));
        let proposal = proposal_for(&validators, 0);
        let hash = proposal.block_hash();

        let waiter = tokio::spawn({
            let port = port.clone();
            async move { port.to_consensus(proposal).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        for v in validators.iter().take(3) {
            port.register_vote(vote(v, 0, hash, VotePhase::Prepare)).unwrap();
        }
        for v in validators.iter().take(3) {
            port.register_vote(vote(v, 0, hash, VotePhase::Commit)).unwrap();
        }

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(port.current_round(), 1);
    }

    #[tokio::test]
    async fn register_vote_reaches_quorum_directly() {
        let validators = make_validators(4);
        let port = port_for(&validators);
        let proposal = proposal_for(&validators, 0);
        let hash = proposal.block_hash();
        port.propose(proposal).unwrap();

        let mut advanced = false;
        for v in validators.iter().take(3) {
            let outcome = port.register_vote(vote(v, 0, hash, VotePhase::Prepare)).unwrap();
            if outcome == VoteOutcome::AdvancedPhase {
                advanced = true;
            }
        }
        assert!(advanced);

        let mut committed = false;
        for v in validators.iter().take(3) {
            let outcome = port.register_vote(vote(v, 0, hash, VotePhase::Commit)).unwrap();
            if matches!(outcome, VoteOutcome::Committed { .. }) {
                committed = true;
            }
        }
        assert!(committed);
        assert_eq!(port.current_round(), 1);
    }

    #[tokio::test]
    async fn commit_votes_before_prepare_quorum_are_ignored() {
        let validators = make_validators(4);
        let port = port_for(&validators);
        let proposal = proposal_for(&validators, 0);
        let hash = proposal.block_hash();
        port.propose(proposal).unwrap();

        let outcome = port.register_vote(vote(&validators[0], 0, hash, VotePhase::Commit)).unwrap();
        assert_eq!(outcome, VoteOutcome::Pending);
    }

    #[tokio::test]
    async fn vote_from_unknown_validator_is_rejected() {
        let validators = make_validators(4);
        let set = ValidatorSet::new(validators.iter().take(3).map(|v| v.addr).collect());
        let port = DbftPort::new(validators[0].addr, set);
        let proposal = proposal_for(&validators, 0);
        let hash = proposal.block_hash();
        port.propose(proposal).unwrap();
        assert!(matches!(
            port.register_vote(vote(&validators[3], 0, hash, VotePhase::Prepare)),
            Err(ConsensusPortError::UnknownVoter(_))
        ));
    }

    #[tokio::test]
    async fn stale_round_vote_is_rejected() {
        let validators = make_validators(4);
        let port = port_for(&validators);
        port.propose(proposal_for(&validators, 0)).unwrap();
        port.propose(proposal_for(&validators, 1)).unwrap();
        let hash = proposal_for(&validators, 0).block_hash();
        assert_eq!(
            port.register_vote(vote(&validators[0], 0, hash, VotePhase::Prepare)),
            Err(ConsensusPortError::StaleRound { voted: 0, current: 1 })
        );
    }

    #[tokio::test]
    async fn timeout_rotates_master_and_fires_event() {
        let validators = make_validators(4);
        let set = ValidatorSet::new(validators.iter().map(|v| v.addr).collect());
        let port = DbftPort::with_timeout(validators[0].addr, set, Duration::from_millis(20));
        let bus = EventBus::new();
        let seen = std::sync::Arc::new(Mutex::new(None));
        let slot = seen.clone();
        bus.subscribe(crate::model::EventType::MasterChange, move |payload| {
            if let Some(Event::MasterChange { new_master, .. }) = payload {
                *slot.lock() = Some(*new_master);
            }
        });
        port.initialization(validators[0].addr, validators.iter().map(|v| v.addr).collect(), bus, false);

        let result = port.to_consensus(proposal_for(&validators, 0)).await;
        assert!(matches!(result, Err(ConsensusPortError::Timeout(0))));
        assert_eq!(port.get_consensus_result().master, validators[1].addr);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock(), Some(validators[1].addr));
    }
}
