//! Single-phase BFT voting: validators vote `Commit` directly on a
//! proposal with no separate prepare phase. One fewer network round trip
//! than dBFT at the cost of one extra round of exposure to an equivocating
//! proposer — a validator that commits before seeing how the rest of the
//! network voted cannot detect a proposer double-signing two conflicting
//! blocks for the same round until after the fact.
//!
//! Master rotates round-robin on every successful commit; there is no
//! explicit view-change path here, since a timeout just means the next
//! round's proposer tries again under the same rotation rather than a
//! policy-internal reassignment.

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

pub struct FbftPort {
    self_address: Address,
    validators: RwLock<ValidatorSet>,
    round: AtomicU64,
    pending: RwLock<Option<Proposal>>,
    commit_votes: RwLock<HashSet<Address>>,
    events: RwLock<Option<EventBus>>,
    outcome: Mutex<Option<Result<(), ConsensusPortError>>>,
    notify: Notify,
    commit_timeout: Duration,
}

impl FbftPort {
    pub fn new(self_address: Address, validators: ValidatorSet) -> Self {
        Self::with_timeout(self_address, validators, DEFAULT_COMMIT_TIMEOUT)
    }

    pub fn with_timeout(self_address: Address, validators: ValidatorSet, commit_timeout: Duration) -> Self {
        Self {
            self_address,
            validators: RwLock::new(validators),
            round: AtomicU64::new(0),
            pending: RwLock::new(None),
            commit_votes: RwLock::new(HashSet::new()),
            events: RwLock::new(None),
            outcome: Mutex::new(None),
            notify: Notify::new(),
            commit_timeout,
        }
    }

    pub fn validators(&self) -> ValidatorSet {
        self.validators.read().clone()
    }

    /// `master` is accepted only for facade-signature symmetry with the
    /// other policies; FBFT derives master from its own rotation counter
    /// rather than trusting the caller's value.
    pub fn initialization(&self, _master: Address, participants: Vec<Address>, events: EventBus, _online_flag: bool) {
        *self.validators.write() = ValidatorSet::new(participants);
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
        let round = self.round.load(Ordering::Relaxed);
        tokio::time::timeout(self.commit_timeout, wait)
            .await
            .unwrap_or(Err(ConsensusPortError::Timeout(round)))
    }

    pub fn online(&self) {
        if let Some(events) = self.events.read().clone() {
            let _ = events.notify(Event::Online);
        }
    }

    pub fn get_consensus_result(&self) -> ConsensusResult {
        let round = self.round.load(Ordering::Relaxed);
        let validators = self.validators.read();
        let master = validators.proposer_for_round(round).unwrap_or(self.self_address);
        ConsensusResult { view: round, participants: validators.members(), master }
    }

    pub fn pending_block_hash(&self) -> Option<[u8; 32]> {
        self.pending.read().as_ref().map(|p| p.block_hash())
    }

    fn verify_vote(&self, vote: &Vote) -> Result<(), ConsensusPortError> {
        let round = self.round.load(Ordering::Relaxed);
        if vote.round != round {
            return Err(ConsensusPortError::StaleRound { voted: vote.round, current: round });
        }
        if !self.validators.read().contains(&vote.voter) {
            return Err(ConsensusPortError::UnknownVoter(vote.voter.to_hex()));
        }
        Ok(())
    }
}

impl ConsensusPolicy for FbftPort {
    fn propose(&self, proposal: Proposal) -> Result<(), ConsensusPortError> {
        let round = proposal.round;
        let mut pending = self.pending.write();
        if pending.is_some() {
            return Err(ConsensusPortError::DuplicateProposal(round));
        }
        *pending = Some(proposal);
        self.round.store(round, Ordering::Relaxed);
        self.commit_votes.write().clear();
        Ok(())
    }

    fn register_vote(&self, vote: Vote) -> Result<VoteOutcome, ConsensusPortError> {
        self.verify_vote(&vote)?;
        if vote.phase != VotePhase::Commit {
            // FBFT skips the prepare phase entirely; a stray Prepare vote
            // (e.g. from a node misconfigured with the wrong policy) is
            // simply not counted rather than treated as a protocol error.
            return Ok(VoteOutcome::Pending);
        }
        let key = NodePublicKey::from_bytes(*vote.voter.as_bytes());
        if !vote.verify(&key) {
            return Err(ConsensusPortError::InvalidVote);
        }
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

        self.commit_votes.write().insert(vote.voter);
        let quorum = self.validators.read().quorum_threshold();
        if self.commit_votes.read().len() >= quorum {
            self.round.fetch_add(1, Ordering::Relaxed);
            *self.outcome.lock() = Some(Ok(()));
            self.notify.notify_waiters();
            return Ok(VoteOutcome::Committed { block_hash: hash });
        }
        Ok(VoteOutcome::Pending)
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

    fn port_for(validators: &[Validator]) -> FbftPort {
        let set = ValidatorSet::new(validators.iter().map(|v| v.addr).collect());
        FbftPort::new(validators[0].addr, set)
    }

    #[tokio::test]
    async fn commits_in_a_single_vote_phase() {
        let validators = make_validators(4);
        let port = port_for(&validators);
        let proposal = proposal_for(&validators, 0);
        let hash = proposal.block_hash();
        port.propose(proposal).unwrap();

        let mut committed = false;
        for v in validators.iter().take(3) {
            let vote = Vote::new_signed(&v.kp, 0, hash, VotePhase::Commit, v.addr);
            if matches!(port.register_vote(vote).unwrap(), VoteOutcome::Committed { .. }) {
                committed = true;
            }
        }
        assert!(committed);
        assert_eq!(port.current_round(), 1);
    }

    #[tokio::test]
    async fn master_rotates_after_successful_commit() {
        let validators = make_validators(4);
        let port = port_for(&validators);
        assert_eq!(port.get_consensus_result().master, validators[0].addr);
        let proposal = proposal_for(&validators, 0);
        let hash = proposal.block_hash();
        port.propose(proposal).unwrap();
        for v in validators.iter().take(3) {
            let vote = Vote::new_signed(&v.kp, 0, hash, VotePhase::Commit, v.addr);
            port.register_vote(vote).unwrap();
        }
        assert_eq!(port.get_consensus_result().master, validators[1].addr);
    }

    #[tokio::test]
    async fn prepare_votes_are_ignored_not_rejected() {
        let validators = make_validators(4);
        let port = port_for(&validators);
        let proposal = proposal_for(&validators, 0);
        port.propose(proposal).unwrap();
        let vote = Vote::new_signed(&validators[1].kp, 0, [0u8; 32], VotePhase::Prepare, validators[1].addr);
        assert_eq!(port.register_vote(vote), Ok(VoteOutcome::Pending));
    }

    #[tokio::test]
    async fn minority_commit_votes_do_not_finalize() {
        let validators = make_validators(4);
        let port = port_for(&validators);
        let proposal = proposal_for(&validators, 0);
        let hash = proposal.block_hash();
        port.propose(proposal).unwrap();
        let vote = Vote::new_signed(&validators[0].kp, 0, hash, VotePhase::Commit, validators[0].addr);
        assert_eq!(port.register_vote(vote), Ok(VoteOutcome::Pending));
    }

    #[tokio::test]
    async fn to_consensus_times_out_without_quorum() {
        let validators = make_validators(4);
        let set = ValidatorSet::new(validators.iter().map(|v| v.addr).collect());
        let port = FbftPort::with_timeout(validators[0].addr, set, Duration::from_millis(20));
        let result = port.to_consensus(proposal_for(&validators, 0)).await;
        assert_eq!(result, Err(ConsensusPortError::Timeout(0)));
    }
}
