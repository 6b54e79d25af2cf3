//! # Transport (external collaborator)
//!
//! The gossip switch needs a way to put bytes on the wire and get bytes
//! back, but this crate does not ship a P2P stack — that is an external
//! concern the binary wires in. `Transport` is the seam: implement it
//! against libp2p, QUIC, or a test harness and the switch does not notice
//! the difference.

use crate::model::SwitchMessage;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// Sends messages to connected peers and yields messages peers sent to us.
/// Implementations decide fanout, connection management, and backpressure;
/// the switch and propagators only need "this message is now somebody
/// else's problem" and "here is what a peer just sent."
#[async_trait]
pub trait Transport: Send + Sync {
    async fn broadcast(&self, message: &SwitchMessage);

    /// Waits for the next message a peer sent us. Returns `None` once the
    /// transport is permanently closed; propagators treat that as their
    /// signal to stop their receive loop.
    async fn recv(&self) -> Option<SwitchMessage>;

    /// Number of peers currently reachable. Used for status reporting and
    /// by the consensus port to decide whether quorum is even reachable.
    fn peer_count(&self) -> usize;
}

/// An in-memory transport that records every broadcast message instead of
/// sending it anywhere, and whose inbound side is driven by test code via
/// `inject`. Used by tests and by single-node `--dev` runs where there are
/// no peers to gossip to.
pub struct LoopbackTransport {
    sent: parking_lot::Mutex<Vec<SwitchMessage>>,
    inbound_tx: mpsc::UnboundedSender<SwitchMessage>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<SwitchMessage>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx: AsyncMutex::new(inbound_rx),
        }
    }

    pub fn sent_messages(&self) -> Vec<SwitchMessage> {
        self.sent.lock().clone()
    }

    /// Test/`--dev` helper simulating a peer delivering `message` to us.
    pub fn inject(&self, message: SwitchMessage) {
        let _ = self.inbound_tx.send(message);
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn broadcast(&self, message: &SwitchMessage) {
        self.sent.lock().push(message.clone());
    }

    async fn recv(&self) -> Option<SwitchMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    fn peer_count(&self) -> usize {
        0
    }
}
