//! # Consensus Port
//!
//! Pluggable agreement policy behind a four-operation facade: `initialization`
//! primes a policy for a round with the current roster and master,
//! `to_consensus` drives a proposal to finality (or a timeout), `online`
//! signals the policy that the node has joined the network, and
//! `get_consensus_result` reports the policy's current view of who is master
//! and who is participating. The round driver only ever calls these four
//! operations; everything else in this module is how a given policy
//! implements them.
//!
//! Three policies ship, chosen once at node startup and never mixed at
//! runtime:
//!
//! - [`solo::SoloPort`] — a single validator, no voting. Used for `--dev`
//!   and single-node deployments. Master is always this node.
//! - [`dbft::DbftPort`] — classic two-phase (prepare, commit) BFT voting
//!   requiring `2f+1` signatures at each phase before advancing. Master
//!   changes only through an explicit timeout-driven view change, which
//!   fires [`crate::model::Event::MasterChange`].
//! - [`fbft::FbftPort`] — a single-phase BFT variant: validators vote
//!   `Commit` directly without a separate prepare round. Master rotates
//!   round-robin on every successful commit.
//!
//! `ConsensusPort` is a tagged union over the three rather than a trait
//! object: every node process runs exactly one policy for its entire
//! lifetime, chosen from configuration at startup, so there is no runtime
//! polymorphism to buy and a `match` is both faster and easier to
//! exhaustively reason about than a vtable call.
//!
//! Vote delivery between validator processes is not wired to a transport in
//! this crate — the gossip switches move transactions and blocks, not votes.
//! `register_vote` is the seam a real multi-process deployment would feed
//! from the network; here it is called directly by whoever observes a vote
//! (tests, or a future vote-gossip channel).

pub mod dbft;
pub mod fbft;
pub mod solo;

use crate::event_bus::EventBus;
use crate::model::{Address, Proposal, Vote};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusPortError {
    #[error("proposal for round {0} was already registered")]
    DuplicateProposal(u64),
    #[error("vote references round {voted}, but the port is at round {current}")]
    StaleRound { voted: u64, current: u64 },
    #[error("vote signature does not verify")]
    InvalidVote,
    #[error("voter {0} is not a member of the active validator set")]
    UnknownVoter(String),
    #[error("no proposal registered for the current round")]
    NoActiveProposal,
    #[error("round {0} timed out waiting for quorum")]
    Timeout(u64),
    #[error("vote delivery is not meaningful for this policy")]
    NotApplicable,
}

/// The active validator roster for a round. Carries no stake weight — every
/// policy treats one validator as one vote.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<Address>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Address>) -> Self {
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.validators.contains(addr)
    }

    pub fn members(&self) -> Vec<Address> {
        self.validators.clone()
    }

    /// Round-robin proposer selection. Every multi-validator policy uses
    /// this same rotation rule; policies differ only in how many signatures
    /// are required to finalize what the proposer sends, and in whether a
    /// timeout can additionally force a rotation outside this schedule.
    pub fn proposer_for_round(&self, round: u64) -> Option<Address> {
        if self.validators.is_empty() {
            return None;
        }
        let idx = (round as usize) % self.validators.len();
        Some(self.validators[idx])
    }

    /// The validator immediately after `addr` in rotation order. Falls back
    /// to the first validator if `addr` is not a current member.
    pub fn next_after(&self, addr: Address) -> Option<Address> {
        if self.validators.is_empty() {
            return None;
        }
        let idx = self.validators.iter().position(|v| *v == addr).unwrap_or(0);
        Some(self.validators[(idx + 1) % self.validators.len()])
    }

    /// `(2n/3) + 1` — the standard BFT quorum threshold tolerating up to
    /// `f = (n-1)/3` byzantine validators.
    pub fn quorum_threshold(&self) -> usize {
        quorum_threshold(self.validators.len())
    }
}

pub fn quorum_threshold(validator_count: usize) -> usize {
    (2 * validator_count / 3) + 1
}

/// Result of registering a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Quorum not yet reached for the current phase.
    Pending,
    /// Quorum reached at an intermediate phase (dBFT's prepare phase).
    /// The port expects a second round of votes for the next phase.
    AdvancedPhase,
    /// Quorum reached and the block is final.
    Committed { block_hash: [u8; 32] },
}

/// What `to_consensus` left behind once a round concludes, positively or
/// not: who the policy currently considers master, and who it considers
/// active participants. Reported by `get_consensus_result` regardless of
/// whether the round just committed, timed out, or never started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusResult {
    pub view: u64,
    pub participants: Vec<Address>,
    pub master: Address,
}

/// The internal surface a concrete policy exposes to its own facade
/// methods. Not implemented by `ConsensusPort` itself — each variant wires
/// its inherent `to_consensus`/`register_vote` through these instead, since
/// the vote machinery differs enough between Solo (none) and dBFT/FBFT
/// (phased vs. single-phase) that a shared default would not save much.
pub trait ConsensusPolicy {
    fn propose(&self, proposal: Proposal) -> Result<(), ConsensusPortError>;
    fn register_vote(&self, vote: Vote) -> Result<VoteOutcome, ConsensusPortError>;
    fn current_round(&self) -> u64;
}

pub use dbft::DbftPort;
pub use fbft::FbftPort;
pub use solo::SoloPort;

/// The consensus port a running node holds: exactly one policy for the
/// node's lifetime.
pub enum ConsensusPort {
    Solo(SoloPort),
    Dbft(DbftPort),
    Fbft(FbftPort),
}

impl ConsensusPort {
    /// Primes the policy for the rounds ahead: who is master, who is
    /// participating, which bus to publish view-change and online events
    /// on, and whether the node should behave as already online. Called
    /// once by the online wizard and again whenever the role plugin
    /// reassigns master between rounds.
    pub fn initialization(&self, master: Address, participants: Vec<Address>, events: EventBus, online_flag: bool) {
        match self {
            ConsensusPort::Solo(p) => p.initialization(master, participants, events, online_flag),
            ConsensusPort::Dbft(p) => p.initialization(master, participants, events, online_flag),
            ConsensusPort::Fbft(p) => p.initialization(master, participants, events, online_flag),
        }
    }

    /// Drives `proposal` to finality. Resolves once quorum (or, for Solo,
    /// self-agreement) is reached, or once the policy's internal timeout
    /// expires.
    pub async fn to_consensus(&self, proposal: Proposal) -> Result<(), ConsensusPortError> {
        match self {
            ConsensusPort::Solo(p) => p.to_consensus(proposal).await,
            ConsensusPort::Dbft(p) => p.to_consensus(proposal).await,
            ConsensusPort::Fbft(p) => p.to_consensus(proposal).await,
        }
    }

    /// Tells the policy the node is now online. Solo fires `Event::Online`
    /// immediately; dBFT/FBFT also fire it, having no network handshake of
    /// their own to wait on in this crate.
    pub fn online(&self) {
        match self {
            ConsensusPort::Solo(p) => p.online(),
            ConsensusPort::Dbft(p) => p.online(),
            ConsensusPort::Fbft(p) => p.online(),
        }
    }

    pub fn get_consensus_result(&self) -> ConsensusResult {
        match self {
            ConsensusPort::Solo(p) => p.get_consensus_result(),
            ConsensusPort::Dbft(p) => p.get_consensus_result(),
            ConsensusPort::Fbft(p) => p.get_consensus_result(),
        }
    }

    /// The hash of whatever proposal is currently registered for this
    /// round, if any. Exists for observability and tests that need to cast
    /// votes against the exact candidate a proposer put forward without
    /// re-deriving it themselves.
    pub fn pending_block_hash(&self) -> Option<[u8; 32]> {
        match self {
            ConsensusPort::Solo(p) => p.pending_block_hash(),
            ConsensusPort::Dbft(p) => p.pending_block_hash(),
            ConsensusPort::Fbft(p) => p.pending_block_hash(),
        }
    }

    /// Feeds an observed vote into the policy. A no-op surface for Solo
    /// (which never votes); see the module's vote-delivery note above.
    pub fn register_vote(&self, vote: Vote) -> Result<VoteOutcome, ConsensusPortError> {
        match self {
            ConsensusPort::Solo(_) => Err(ConsensusPortError::NotApplicable),
            ConsensusPort::Dbft(p) => p.register_vote(vote),
            ConsensusPort::Fbft(p) => p.register_vote(vote),
        }
    }
}
