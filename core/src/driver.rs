//! # Round Driver
//!
//! Drives consensus rounds end to end: waits out the configured round
//! interval, asks the [`ParticipatesPlugin`]/[`RolePlugin`] pair who is
//! master this round, and — if this node is master — produces a block,
//! hands it to the consensus port, and commits it once finality is
//! reached. The driver never polls for an outcome; it subscribes to the
//! event bus once at construction and turns the events that matter into
//! [`DriverMessage`]s on its own inbox, which [`run`](Self::run) drains in
//! a `tokio::select!` loop alongside the process shutdown signal.
//!
//! Which message leads to which next step differs by consensus policy:
//! Solo and dBFT re-query the participates/role plugins on every new round
//! (dBFT's one exception being a `ChangeMaster` view change, which instead
//! pulls the port's own [`ConsensusResult`](crate::consensus::ConsensusResult)
//! directly and skips the round-interval sleep); FBFT never asks the role
//! plugin after the first round, since it already knows who is master from
//! its own round-robin rotation.

use crate::consensus::{ConsensusPort, ConsensusPortError, ConsensusResult};
use crate::event_bus::EventBus;
use crate::model::{Address, Event, EventType, Proposal};
use crate::producer::BlockProducer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Consensus(#[from] ConsensusPortError),
    #[error(transparent)]
    Production(#[from] crate::producer::BlockProductionError),
    #[error(transparent)]
    Repository(#[from] crate::repository::RepositoryError),
}

/// Who gets to propose this round. A static roster (`StaticParticipates`)
/// is enough for every policy this crate ships; the trait exists so a
/// future deployment can swap in a stake- or reputation-weighted roster
/// without touching the driver.
pub trait ParticipatesPlugin: Send + Sync {
    fn participants(&self) -> Vec<Address>;
}

pub struct StaticParticipates {
    roster: Vec<Address>,
}

impl StaticParticipates {
    pub fn new(roster: Vec<Address>) -> Self {
        Self { roster }
    }
}

impl ParticipatesPlugin for StaticParticipates {
    fn participants(&self) -> Vec<Address> {
        self.roster.clone()
    }
}

/// Decides who is master among the current participants for a given round.
pub trait RolePlugin: Send + Sync {
    fn assign(&self, participants: &[Address], round: u64) -> Address;
}

/// Rotates master round-robin through the roster, same rule the consensus
/// policies themselves use for proposer rotation.
pub struct RoundRobinRole;

impl RolePlugin for RoundRobinRole {
    fn assign(&self, participants: &[Address], round: u64) -> Address {
        if participants.is_empty() {
            return Address::from_bytes([0u8; 32]);
        }
        participants[(round as usize) % participants.len()]
    }
}

/// What the driver's inbox carries. Seven of these arrive from the event
/// bus subscriptions the driver wires up at construction; `RoundRunFailed`
/// is the driver's own self-notification when block production itself
/// fails (there is no bus event for that — it never leaves the process);
/// `NodeServiceStopped` is sent directly by `Node::shutdown`, bypassing the
/// bus entirely since it is a command, not an observation.
#[derive(Debug, Clone)]
pub enum DriverMessage {
    BlockCommitSuccess,
    BlockCommitFailed { reason: String },
    BlockVerifyFailed { reason: String },
    ToConsensusFailed { reason: String },
    ChangeMaster { new_master: Address },
    Online,
    BlockWithoutTx,
    RoundRunFailed { reason: String },
    NodeServiceStopped,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub round_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            round_interval: Duration::from_secs(2),
        }
    }
}

pub struct RoundDriver {
    consensus: Arc<ConsensusPort>,
    producer: Arc<BlockProducer>,
    events: EventBus,
    self_address: Address,
    participates: Arc<dyn ParticipatesPlugin>,
    role: Arc<dyn RolePlugin>,
    config: DriverConfig,
    round: AtomicU64,
    inbox_tx: mpsc::UnboundedSender<DriverMessage>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<DriverMessage>>>,
}

impl RoundDriver {
    pub fn new(
        consensus: Arc<ConsensusPort>,
        producer: Arc<BlockProducer>,
        events: EventBus,
        self_address: Address,
        participates: Arc<dyn ParticipatesPlugin>,
        role: Arc<dyn RolePlugin>,
        config: DriverConfig,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let driver = Self {
            consensus,
            producer,
            events,
            self_address,
            participates,
            role,
            config,
            round: AtomicU64::new(0),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
        };
        driver.register_event_bridges();
        driver
    }

    /// A handle onto the driver's own inbox, used by `Node::shutdown` to
    /// deliver `NodeServiceStopped` directly — the one message that never
    /// comes from the event bus.
    pub fn sender(&self) -> mpsc::UnboundedSender<DriverMessage> {
        self.inbox_tx.clone()
    }

    pub fn current_round(&self) -> u64 {
        self.round.load(Ordering::Relaxed)
    }

    fn register_event_bridges(&self) {
        let tx = self.inbox_tx.clone();
        self.events.subscribe(EventType::BlockCommitted, move |_| {
            let _ = tx.send(DriverMessage::BlockCommitSuccess);
        });
        let tx = self.inbox_tx.clone();
        self.events.subscribe(EventType::BlockCommitFailed, move |payload| {
            if let Some(Event::BlockCommitFailed { reason, .. }) = payload {
                let _ = tx.send(DriverMessage::BlockCommitFailed { reason: reason.clone() });
            }
        });
        let tx = self.inbox_tx.clone();
        self.events.subscribe(EventType::BlockVerifyFailed, move |payload| {
            if let Some(Event::BlockVerifyFailed { reason, .. }) = payload {
                let _ = tx.send(DriverMessage::BlockVerifyFailed { reason: reason.clone() });
            }
        });
        let tx = self.inbox_tx.clone();
        self.events.subscribe(EventType::ConsensusFailed, move |payload| {
            if let Some(Event::ConsensusFailed { reason, .. }) = payload {
                let _ = tx.send(DriverMessage::ToConsensusFailed { reason: reason.clone() });
            }
        });
        let tx = self.inbox_tx.clone();
        self.events.subscribe(EventType::MasterChange, move |payload| {
            if let Some(Event::MasterChange { new_master, .. }) = payload {
                let _ = tx.send(DriverMessage::ChangeMaster { new_master: *new_master });
            }
        });
        let tx = self.inbox_tx.clone();
        self.events.subscribe(EventType::Online, move |_| {
            let _ = tx.send(DriverMessage::Online);
        });
        let tx = self.inbox_tx.clone();
        self.events.subscribe(EventType::BlockWithoutTxs, move |_| {
            let _ = tx.send(DriverMessage::BlockWithoutTx);
        });
    }

    /// Primes the consensus port with the initial roster and master and
    /// tells it the node has joined the network. Runs once before the
    /// round loop starts.
    pub fn online_wizard(&self) {
        let participants = self.participates.participants();
        let master = self.role.assign(&participants, self.round.load(Ordering::Relaxed));
        self.consensus.initialization(master, participants, self.events.clone(), true);
        self.consensus.online();
    }

    /// A full round: sleeps out the round interval, re-queries the
    /// participates/role plugins, then enters the round with whatever they
    /// returned.
    pub async fn round(&self) -> Result<(), DriverError> {
        tokio::time::sleep(self.config.round_interval).await;
        let participants = self.participates.participants();
        let master = self.role.assign(&participants, self.round.load(Ordering::Relaxed));
        self.enter_round(master, participants).await
    }

    /// Primes the consensus port for `master`/`participants` and, if this
    /// node is master, produces and proposes a block. Skips the
    /// round-interval sleep — used by the fast paths that already know who
    /// is master without asking the role plugin.
    async fn enter_round(&self, master: Address, participants: Vec<Address>) -> Result<(), DriverError> {
        self.consensus.initialization(master, participants.clone(), self.events.clone(), true);
        if master == self.self_address {
            let timestamp = wall_clock_timestamp();
            self.block_factory(master, timestamp).await
        } else {
            Ok(())
        }
    }

    async fn block_factory(&self, proposer: Address, timestamp: u64) -> Result<(), DriverError> {
        let round = self.round.load(Ordering::Relaxed);
        let produced = match self.producer.produce_block(timestamp) {
            Ok(produced) => produced,
            Err(err) => {
                let _ = self.inbox_tx.send(DriverMessage::RoundRunFailed { reason: err.to_string() });
                return Err(DriverError::Production(err));
            }
        };
        if produced.block.transactions.is_empty() {
            let _ = self.events.notify(Event::BlockWithoutTxs { round });
        }

        let proposal = Proposal { round, block: produced.block.clone(), proposer };
        match self.consensus.to_consensus(proposal).await {
            Ok(()) => {
                self.producer.commit_block(&produced).await?;
                Ok(())
            }
            Err(err) => {
                let _ = self.events.notify(Event::ConsensusFailed { round, reason: err.to_string() });
                Err(DriverError::Consensus(err))
            }
        }
    }

    /// Decides the next round's entry point given which message just
    /// arrived, following each consensus policy's own rule for when it is
    /// safe to skip re-querying the role plugin.
    async fn next_round(&self, msg: &DriverMessage) -> Result<(), DriverError> {
        match &*self.consensus {
            ConsensusPort::Fbft(_) => {
                let ConsensusResult { master, participants, .. } = self.consensus.get_consensus_result();
                self.enter_round(master, participants).await
            }
            ConsensusPort::Dbft(_) => match msg {
                DriverMessage::ChangeMaster { .. } => {
                    let ConsensusResult { master, participants, .. } = self.consensus.get_consensus_result();
                    self.enter_round(master, participants).await
                }
                _ => self.round().await,
            },
            ConsensusPort::Solo(_) => self.round().await,
        }
    }

    /// Handles one inbox message. Returns `true` once the driver should
    /// stop its round loop.
    async fn dispatch(&self, msg: DriverMessage) -> bool {
        match msg {
            DriverMessage::NodeServiceStopped => {
                tracing::info!("round driver received stop message");
                return true;
            }
            DriverMessage::BlockCommitSuccess => {
                self.round.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = self.next_round(&DriverMessage::BlockCommitSuccess).await {
                    tracing::warn!(error = %err, "round after commit failed");
                }
            }
            DriverMessage::ChangeMaster { new_master } => {
                if let Err(err) = self.next_round(&DriverMessage::ChangeMaster { new_master }).await {
                    tracing::warn!(error = %err, "round after master change failed");
                }
            }
            DriverMessage::BlockCommitFailed { reason } => {
                tracing::warn!(%reason, "block commit failed, retrying round");
                if let Err(err) = self.round().await {
                    tracing::warn!(error = %err, "retry after commit failure also failed");
                }
            }
            DriverMessage::BlockVerifyFailed { reason } => {
                tracing::warn!(%reason, "block verify failed, retrying round");
                if let Err(err) = self.round().await {
                    tracing::warn!(error = %err, "retry after verify failure also failed");
                }
            }
            DriverMessage::ToConsensusFailed { reason } => {
                tracing::warn!(%reason, "consensus failed, retrying round");
                if let Err(err) = self.round().await {
                    tracing::warn!(error = %err, "retry after consensus failure also failed");
                }
            }
            DriverMessage::RoundRunFailed { reason } => {
                tracing::warn!(%reason, "round run failed, retrying");
                if let Err(err) = self.round().await {
                    tracing::warn!(error = %err, "retry after round failure also failed");
                }
            }
            DriverMessage::BlockWithoutTx => {
                tracing::debug!("round produced a block with no transactions");
            }
            DriverMessage::Online => {
                tracing::debug!("node online");
            }
        }
        false
    }

    /// Runs the online wizard, kicks off the first round, then drains the
    /// inbox until `shutdown` signals `true` or a `NodeServiceStopped`
    /// message arrives.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.online_wizard();
        let mut inbox = self
            .inbox_rx
            .lock()
            .take()
            .expect("RoundDriver::run called more than once");

        if let Err(err) = self.round().await {
            tracing::warn!(error = %err, "initial round failed");
        }

        loop {
            tokio::select! {
                msg = inbox.recv() => {
                    let Some(msg) = msg else { break; };
                    if self.dispatch(msg).await {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("round driver shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn wall_clock_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::dbft::DbftPort;
    use crate::consensus::fbft::FbftPort;
    use crate::consensus::solo::SoloPort;
    use crate::consensus::ValidatorSet;
    use crate::crypto::NodeKeypair;
    use crate::mempool::{Mempool, MempoolConfig};
    use crate::model::{Vote, VotePhase};
    use crate::producer::ProducerConfig;
    use crate::repository::{InMemoryRepository, Repository};

    fn solo_driver() -> (RoundDriver, Arc<InMemoryRepository>, Address) {
        let kp = NodeKeypair::generate();
        let addr = Address::from_bytes(kp.public_key_bytes());
        let events = EventBus::new();
        let repo = Arc::new(InMemoryRepository::new(events.clone()));
        let mempool = Mempool::new(MempoolConfig::default());
        let producer = Arc::new(BlockProducer::new(mempool, repo.clone(), kp, ProducerConfig::default()));
        let consensus = Arc::new(ConsensusPort::Solo(SoloPort::new(addr)));
        let driver = RoundDriver::new(
            consensus,
            producer,
            events,
            addr,
            Arc::new(StaticParticipates::new(vec![addr])),
            Arc::new(RoundRobinRole),
            DriverConfig { round_interval: Duration::ZERO },
        );
        (driver, repo, addr)
    }

    #[tokio::test]
    async fn solo_round_commits_a_block() {
        let (driver, repo, _addr) = solo_driver();
        driver.round().await.unwrap();
        assert_eq!(repo.chain_tip().map(|(h, _)| h), Some(0));
    }

    #[tokio::test]
    async fn dispatching_commit_success_advances_round_and_produces_next_block() {
        let (driver, repo, _addr) = solo_driver();
        driver.round().await.unwrap();
        assert_eq!(driver.current_round(), 0);
        let stop = driver.dispatch(DriverMessage::BlockCommitSuccess).await;
        assert!(!stop);
        assert_eq!(driver.current_round(), 1);
        assert_eq!(repo.chain_tip().map(|(h, _)| h), Some(1));
    }

    #[tokio::test]
    async fn node_service_stopped_halts_the_loop() {
        let (driver, _repo, _addr) = solo_driver();
        assert!(driver.dispatch(DriverMessage::NodeServiceStopped).await);
    }

    #[tokio::test]
    async fn non_master_round_produces_nothing() {
        let kp = NodeKeypair::generate();
        let self_addr = Address::from_bytes([1u8; 32]);
        let other = Address::from_bytes(kp.public_key_bytes());
        let events = EventBus::new();
        let repo = Arc::new(InMemoryRepository::new(events.clone()));
        let mempool = Mempool::new(MempoolConfig::default());
        let producer = Arc::new(BlockProducer::new(mempool, repo.clone(), kp, ProducerConfig::default()));
        let consensus = Arc::new(ConsensusPort::Solo(SoloPort::new(other)));
        let driver = RoundDriver::new(
            consensus,
            producer,
            events,
            self_addr,
            Arc::new(StaticParticipates::new(vec![other])),
            Arc::new(RoundRobinRole),
            DriverConfig { round_interval: Duration::ZERO },
        );
        driver.round().await.unwrap();
        assert_eq!(repo.chain_tip(), None);
    }

    fn make_validators(n: usize) -> Vec<(NodeKeypair, Address)> {
        (0..n)
            .map(|_| {
                let kp = NodeKeypair::generate();
                let addr = Address::from_bytes(kp.public_key_bytes());
                (kp, addr)
            })
            .collect()
    }

    #[tokio::test]
    async fn fbft_round_times_out_without_quorum_and_leaves_tip_untouched() {
        let validators = make_validators(4);
        let addrs: Vec<Address> = validators.iter().map(|(_, a)| *a).collect();
        let (proposer_kp, proposer_addr) = (&validators[0].0, validators[0].1);

        let events = EventBus::new();
        let repo = Arc::new(InMemoryRepository::new(events.clone()));
        let mempool = Mempool::new(MempoolConfig::default());
        let producer = Arc::new(BlockProducer::new(mempool, repo.clone(), proposer_kp.clone(), ProducerConfig::default()));
        let set = ValidatorSet::new(addrs.clone());
        let consensus = Arc::new(ConsensusPort::Fbft(FbftPort::with_timeout(
            proposer_addr,
            set,
            Duration::from_millis(20),
        )));

        let driver = RoundDriver::new(
            consensus,
            producer,
            events,
            proposer_addr,
            Arc::new(StaticParticipates::new(addrs.clone())),
            Arc::new(RoundRobinRole),
            DriverConfig { round_interval: Duration::ZERO },
        );

        // Nobody votes, so to_consensus times out and block_factory never
        // gets to commit the candidate it produced.
        let result = driver.round().await;
        assert!(matches!(result, Err(DriverError::Consensus(ConsensusPortError::Timeout(0)))));
        assert_eq!(repo.chain_tip(), None);
    }

    #[tokio::test]
    async fn fbft_round_commits_when_external_votes_reach_quorum() {
        let validators = make_validators(4);
        let addrs: Vec<Address> = validators.iter().map(|(_, a)| *a).collect();
        let (proposer_kp, proposer_addr) = (&validators[0].0, validators[0].1);

        let events = EventBus::new();
        let repo = Arc::new(InMemoryRepository::new(events.clone()));
        let mempool = Mempool::new(MempoolConfig::default());
        let producer = Arc::new(BlockProducer::new(mempool, repo.clone(), proposer_kp.clone(), ProducerConfig::default()));
        let set = ValidatorSet::new(addrs.clone());
        let consensus = Arc::new(ConsensusPort::Fbft(FbftPort::with_timeout(proposer_addr, set, Duration::from_secs(5))));

        let driver = Arc::new(RoundDriver::new(
            consensus,
            producer,
            events,
            proposer_addr,
            Arc::new(StaticParticipates::new(addrs.clone())),
            Arc::new(RoundRobinRole),
            DriverConfig { round_interval: Duration::ZERO },
        ));

        let waiter = tokio::spawn({
            let driver = driver.clone();
            async move { driver.round().await }
        });

        // Wait for block_factory to finish producing and proposing before
        // asking the port for the hash it actually registered.
        let hash = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(h) = driver.consensus.pending_block_hash() {
                    return h;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("block_factory did not register a proposal in time");
        assert_eq!(repo.chain_tip(), None, "block should not commit before quorum");

        for (kp, addr) in validators.iter().take(3) {
            let vote = Vote::new_signed(kp, 0, hash, VotePhase::Commit, *addr);
            let outcome = driver.consensus.register_vote(vote);
            assert!(outcome.is_ok(), "vote rejected: {outcome:?}");
        }

        waiter.await.unwrap().unwrap();
        assert_eq!(repo.chain_tip().map(|(h, _)| h), Some(0));
    }

    #[tokio::test]
    async fn dbft_timeout_fires_change_master_without_committing() {
        let validators = make_validators(4);
        let addrs: Vec<Address> = validators.iter().map(|(_, a)| *a).collect();
        let (proposer_kp, proposer_addr) = (&validators[0].0, validators[0].1);

        let events = EventBus::new();
        let repo = Arc::new(InMemoryRepository::new(events.clone()));
        let mempool = Mempool::new(MempoolConfig::default());
        let producer = Arc::new(BlockProducer::new(mempool, repo.clone(), proposer_kp.clone(), ProducerConfig::default()));
        let set = ValidatorSet::new(addrs.clone());
        let dbft = DbftPort::with_timeout(proposer_addr, set, Duration::from_millis(20));
        let consensus = Arc::new(ConsensusPort::Dbft(dbft));

        let driver = RoundDriver::new(
            consensus,
            producer,
            events,
            proposer_addr,
            Arc::new(StaticParticipates::new(addrs.clone())),
            Arc::new(RoundRobinRole),
            DriverConfig { round_interval: Duration::ZERO },
        );

        let result = driver.round().await;
        assert!(matches!(result, Err(DriverError::Consensus(ConsensusPortError::Timeout(0)))));
        assert_eq!(driver.consensus.get_consensus_result().master, addrs[1]);
        assert_eq!(repo.chain_tip(), None);
    }
}
