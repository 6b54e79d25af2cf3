//! # Node Aggregate
//!
//! Wires every component — event bus, mempool, the two gossip switches, the
//! two propagators, repository, consensus port, producer, round driver —
//! into the single object the binary constructs once at startup and drives
//! for the lifetime of the process.
//!
//! Each switch's `RemoteIn`/`LocalIn` worker pulls from its own
//! [`crate::transport::Transport`] handle. `LoopbackTransport`'s inbound
//! side is a single-consumer queue, so the tx and block propagators are
//! each given their own transport instance rather than sharing one — two
//! consumers racing on one queue would misdeliver messages by kind.

use crate::consensus::{ConsensusPort, DbftPort, FbftPort, SoloPort, ValidatorSet};
use crate::crypto::NodeKeypair;
use crate::driver::{DriverConfig, DriverMessage, ParticipatesPlugin, RolePlugin, RoundDriver, RoundRobinRole, StaticParticipates};
use crate::event_bus::EventBus;
use crate::mempool::{Mempool, MempoolConfig};
use crate::model::{Account, Address, SwitchMessage, Transaction};
use crate::producer::{BlockProducer, ProducerConfig};
use crate::propagator::{BlockPropagator, BlockPropagatorError, TxPropagator, TxPropagatorError};
use crate::repository::{InMemoryRepository, Repository};
use crate::switch::{FilterResult, GossipSwitch, Port, PortSink, SwitchConfig, SwitchError, SwitchKind};
use crate::sync::{BlockSyncer, SyncConfig};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Which agreement policy a node runs, chosen once at startup from
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusPolicyKind {
    Solo,
    Dbft,
    Fbft,
}

#[derive(Debug, Error)]
pub enum NodeStartError {
    #[error(transparent)]
    Switch(#[from] SwitchError),
    #[error(transparent)]
    BlockPropagator(#[from] BlockPropagatorError),
    #[error(transparent)]
    TxPropagator(#[from] TxPropagatorError),
}

pub struct NodeParams {
    pub keypair: NodeKeypair,
    pub validators: Vec<Address>,
    pub policy: ConsensusPolicyKind,
    /// Transport the tx switch's propagator broadcasts on and receives from.
    pub tx_transport: Arc<dyn Transport>,
    /// Transport the block switch's propagator broadcasts on and receives
    /// from. Must be a distinct instance from `tx_transport` — see the
    /// module doc comment.
    pub block_transport: Arc<dyn Transport>,
    pub mempool: MempoolConfig,
    pub tx_switch: SwitchConfig,
    pub block_switch: SwitchConfig,
    pub producer: ProducerConfig,
    pub driver: DriverConfig,
    pub sync: SyncConfig,
}

/// Feeds whatever the tx switch's `LocalOut` delivers (a transaction
/// accepted from either origin) into the mempool. Bound once, at
/// construction; admission failures (duplicates, a full pool) are dropped
/// rather than surfaced here — the switch has already accepted the message.
struct MempoolAdmission {
    mempool: Mempool,
}

#[async_trait]
impl PortSink for MempoolAdmission {
    async fn accept(&self, message: SwitchMessage) {
        if let SwitchMessage::Transaction(tx) = message {
            if let Err(err) = self.mempool.insert(tx) {
                tracing::debug!(%err, "mempool declined a switch-admitted transaction");
            }
        }
    }
}

/// Feeds whatever the block switch's `LocalOut` delivers into the
/// repository. A block only reaches here by way of `RemoteIn` — a block
/// this node produces itself never enters the switch, so there is no risk
/// of double-applying a block the driver already committed directly.
/// Applying it fires `BlockCommitted`, which the block propagator's own
/// event subscription turns into a rebroadcast to the rest of the network.
struct BlockApplication {
    repository: Arc<dyn Repository>,
}

#[async_trait]
impl PortSink for BlockApplication {
    async fn accept(&self, message: SwitchMessage) {
        if let SwitchMessage::Block(block) = message {
            if let Err(err) = self.repository.apply_block(&block).await {
                tracing::debug!(%err, "repository declined a switch-admitted block");
            }
        }
    }
}

fn signature_filter<F>(verify: F) -> crate::switch::Filter
where
    F: Fn(&SwitchMessage) -> Result<(), String> + Send + Sync + 'static,
{
    Arc::new(move |message: SwitchMessage| match verify(&message) {
        Ok(()) => FilterResult::Pass(message),
        Err(reason) => FilterResult::Reject(reason),
    })
}

fn tx_signature_filter() -> crate::switch::Filter {
    signature_filter(|message| {
        let SwitchMessage::Transaction(tx) = message else {
            return Ok(());
        };
        let key = crate::crypto::NodePublicKey::from_bytes(*tx.sender.as_bytes());
        tx.verify(&key).map_err(|err| err.to_string())
    })
}

fn block_signature_filter() -> crate::switch::Filter {
    signature_filter(|message| {
        let SwitchMessage::Block(block) = message else {
            return Ok(());
        };
        let key = crate::crypto::NodePublicKey::from_bytes(*block.header.proposer.as_bytes());
        block.verify(&key).map_err(|err| err.to_string())
    })
}

/// The assembled node: every component plus the handles the binary needs
/// to drive the round loop and serve the status/metrics surface.
pub struct Node {
    pub events: EventBus,
    pub mempool: Mempool,
    pub tx_switch: Arc<GossipSwitch>,
    pub block_switch: Arc<GossipSwitch>,
    pub tx_propagator: Arc<TxPropagator>,
    pub block_propagator: Arc<BlockPropagator>,
    pub repository: Arc<dyn Repository>,
    repository_impl: Arc<InMemoryRepository>,
    pub syncer: Arc<BlockSyncer>,
    pub consensus: Arc<ConsensusPort>,
    pub driver: Arc<RoundDriver>,
    pub self_address: Address,
    tx_transport: Arc<dyn Transport>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Node {
    pub fn new(params: NodeParams) -> Self {
        let events = EventBus::new();
        let self_address = Address::from_bytes(params.keypair.public_key_bytes());

        let mempool = Mempool::new(params.mempool).with_event_bus(events.clone());
        let repository_impl = Arc::new(InMemoryRepository::new(events.clone()));
        let repository: Arc<dyn Repository> = repository_impl.clone();
        let syncer = Arc::new(BlockSyncer::new(repository.clone(), params.sync));

        let tx_switch = Arc::new(GossipSwitch::new(SwitchKind::Tx, params.tx_switch));
        let block_switch = Arc::new(GossipSwitch::new(SwitchKind::Block, params.block_switch));

        if params.tx_switch.verify_signature {
            for port in [Port::LocalIn, Port::RemoteIn] {
                tx_switch
                    .add_filter(port, tx_signature_filter())
                    .expect("LocalIn/RemoteIn accept filters");
            }
        }
        if params.block_switch.verify_signature {
            for port in [Port::LocalIn, Port::RemoteIn] {
                block_switch
                    .add_filter(port, block_signature_filter())
                    .expect("LocalIn/RemoteIn accept filters");
            }
        }

        tx_switch
            .bind_sink(Port::LocalOut, Arc::new(MempoolAdmission { mempool: mempool.clone() }))
            .expect("LocalOut is bound exactly once, here");

        let tx_transport = params.tx_transport;
        let tx_propagator = Arc::new(TxPropagator::new(tx_switch.clone(), tx_transport.clone(), events.clone()));
        tx_switch
            .bind_sink(Port::RemoteOut, tx_propagator.clone())
            .expect("RemoteOut is bound exactly once, here");
        block_switch
            .bind_sink(Port::LocalOut, Arc::new(BlockApplication { repository: repository.clone() }))
            .expect("LocalOut is bound exactly once, here");
        let block_propagator = Arc::new(BlockPropagator::new(block_switch.clone(), params.block_transport, events.clone()));

        let producer = Arc::new(BlockProducer::new(
            mempool.clone(),
            repository.clone(),
            params.keypair,
            params.producer,
        ));

        let validator_set = ValidatorSet::new(params.validators.clone());
        let consensus = Arc::new(match params.policy {
            ConsensusPolicyKind::Solo => ConsensusPort::Solo(SoloPort::new(self_address)),
            ConsensusPolicyKind::Dbft => ConsensusPort::Dbft(DbftPort::new(self_address, validator_set)),
            ConsensusPolicyKind::Fbft => ConsensusPort::Fbft(FbftPort::new(self_address, validator_set)),
        });

        let participates: Arc<dyn ParticipatesPlugin> = Arc::new(StaticParticipates::new(params.validators));
        let role: Arc<dyn RolePlugin> = Arc::new(RoundRobinRole);

        let driver = Arc::new(RoundDriver::new(
            consensus.clone(),
            producer,
            events.clone(),
            self_address,
            participates,
            role,
            params.driver,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            events,
            mempool,
            tx_switch,
            block_switch,
            tx_propagator,
            block_propagator,
            repository,
            repository_impl,
            syncer,
            consensus,
            driver,
            self_address,
            tx_transport,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Seeds an account balance directly. Used for genesis and `--dev`
    /// prefunding; bypasses transaction replay entirely.
    pub fn seed_account(&self, address: Address, balance: u64) {
        self.repository_impl.seed_account(address, balance);
    }

    /// Starts both switches and both propagators. Must run before
    /// `spawn_background_tasks`, since the driver's first round may commit
    /// a block that the block propagator needs to be listening for.
    pub fn start_network(self: &Arc<Self>) -> Result<(), NodeStartError> {
        self.tx_switch.start()?;
        self.block_switch.start()?;
        self.tx_propagator.start()?;
        self.block_propagator.start()?;
        Ok(())
    }

    /// Accepts a transaction submitted directly by a client (the JSON-RPC
    /// `submit_transaction` method) by feeding it into the tx switch's
    /// `LocalIn` port, the same entry point a peer-relayed transaction
    /// reaches via `RemoteIn`.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<(), SwitchError> {
        self.tx_switch.submit(Port::LocalIn, SwitchMessage::Transaction(tx)).await
    }

    pub fn chain_tip(&self) -> Option<(u64, [u8; 32])> {
        self.repository.chain_tip()
    }

    pub fn get_account(&self, address: &Address) -> Account {
        self.repository.get_account(address)
    }

    /// Peer count as observed by the tx transport; the block transport
    /// talks to the same peer set over a distinct connection.
    pub fn peer_count(&self) -> usize {
        self.tx_transport.peer_count()
    }

    /// Spawns the round driver and the mempool reaper as background
    /// tasks. Returns their join handles so the binary can await them
    /// during shutdown.
    pub fn spawn_background_tasks(&self, reap_interval: Duration) -> Vec<tokio::task::JoinHandle<()>> {
        let driver = self.driver.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        let driver_handle = tokio::spawn(async move {
            driver.run(shutdown_rx).await;
        });
        let reaper_handle = self.mempool.spawn_reaper(reap_interval, self.shutdown_rx.clone());
        vec![driver_handle, reaper_handle]
    }

    /// Signals all background tasks to stop: the shutdown watch channel
    /// (observed by the reaper and as one arm of the driver's select) and
    /// the driver's own inbox directly, since `NodeServiceStopped` is a
    /// command the driver treats as higher priority than a generic
    /// shutdown observation.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.driver.sender().send(DriverMessage::NodeServiceStopped);
    }
}
