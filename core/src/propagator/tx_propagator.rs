//! Bridges the tx switch's `RemoteIn` port, the Event Bus, and `RemoteOut`
//! to the P2P transport.
//!
//! Outbound broadcast has two apparent triggers in the source this was
//! distilled from: a subscription on `AddTxToTxPool`, and a sink bound to
//! `RemoteOut`. Both fire for the same transaction (the switch fans every
//! accepted input to `RemoteOut`, and mempool admission is origin-agnostic),
//! so wiring both as broadcasts would send every transaction onto the wire
//! twice. This mirrors the block propagator's `BlockCommitted`/
//! `BlockWritten` collapse: the `RemoteOut` sink is the one mechanism that
//! actually calls `Transport::broadcast`; the event subscription only
//! counts admissions for observability.

use crate::event_bus::{EventBus, Subscriber};
use crate::model::{Event, EventType, SwitchMessage};
use crate::switch::{GossipSwitch, Port, PortSink};
use crate::transport::Transport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxPropagatorError {
    #[error("tx propagator has already been started; restart is not permitted")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropagatorState {
    Idle,
    Running,
    Stopped,
}

pub struct TxPropagator {
    switch: Arc<GossipSwitch>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    state: Mutex<PropagatorState>,
    subscription: Mutex<Option<Subscriber>>,
    quit_tx: watch::Sender<bool>,
    quit_rx: watch::Receiver<bool>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    admissions_seen: AtomicU64,
}

impl TxPropagator {
    pub fn new(switch: Arc<GossipSwitch>, transport: Arc<dyn Transport>, events: EventBus) -> Self {
        let (quit_tx, quit_rx) = watch::channel(false);
        Self {
            switch,
            transport,
            events,
            state: Mutex::new(PropagatorState::Idle),
            subscription: Mutex::new(None),
            quit_tx,
            quit_rx,
            receive_task: Mutex::new(None),
            admissions_seen: AtomicU64::new(0),
        }
    }

    /// Subscribes to `AddTxToTxPool` and launches the inbound receive loop.
    /// The caller is still responsible for binding `self` (as `Arc<dyn
    /// PortSink>`) onto the tx switch's `RemoteOut` port before calling this.
    pub fn start(self: &Arc<Self>) -> Result<(), TxPropagatorError> {
        {
            let mut state = self.state.lock();
            match *state {
                PropagatorState::Idle => *state = PropagatorState::Running,
                _ => return Err(TxPropagatorError::AlreadyRunning),
            }
        }

        let this = self.clone();
        let sub = self.events.subscribe(EventType::AddTxToTxPool, move |payload| {
            if matches!(payload, Some(Event::AddTxToTxPool { .. })) {
                this.admissions_seen.fetch_add(1, Ordering::Relaxed);
            }
        });
        *self.subscription.lock() = Some(sub);

        let switch = self.switch.clone();
        let transport = self.transport.clone();
        let mut quit = self.quit_rx.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = transport.recv() => {
                        match message {
                            Some(SwitchMessage::Transaction(tx)) => {
                                if switch.submit(Port::RemoteIn, SwitchMessage::Transaction(tx)).await.is_err() {
                                    break;
                                }
                            }
                            Some(_) => continue,
                            None => break,
                        }
                    }
                    changed = quit.changed() => {
                        if changed.is_err() || *quit.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *self.receive_task.lock() = Some(handle);
        Ok(())
    }

    /// Unsubscribes from the bus, signals the receive loop to exit, and
    /// waits for it to drain.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != PropagatorState::Running {
                return;
            }
            *state = PropagatorState::Stopped;
        }
        if let Some(sub) = self.subscription.lock().take() {
            let _ = self.events.unsubscribe(EventType::AddTxToTxPool, sub);
        }
        let _ = self.quit_tx.send(true);
        let handle = self.receive_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn admissions_seen(&self) -> u64 {
        self.admissions_seen.load(Ordering::Relaxed)
    }
}

/// Bound onto the tx switch's `RemoteOut` port: any transaction the switch
/// accepted, whether it entered through local ingress or a peer, is put
/// onto the wire.
#[async_trait]
impl PortSink for TxPropagator {
    async fn accept(&self, message: SwitchMessage) {
        if let SwitchMessage::Transaction(_) = &message {
            self.transport.broadcast(&message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NodeKeypair;
    use crate::model::{Address, Transaction};
    use crate::switch::SwitchConfig;
    use crate::transport::LoopbackTransport;
    use std::time::Duration;

    fn sample_tx() -> Transaction {
        let kp = NodeKeypair::generate();
        let sender = Address::from_bytes(kp.public_key_bytes());
        Transaction::new_signed(&kp, sender, Address::from_bytes([9u8; 32]), 10, 1, 0)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn wired() -> (Arc<GossipSwitch>, Arc<TxPropagator>, Arc<LoopbackTransport>) {
        let events = EventBus::new();
        let switch = Arc::new(GossipSwitch::new(crate::switch::SwitchKind::Tx, SwitchConfig::default()));
        let transport = Arc::new(LoopbackTransport::new());
        let propagator = Arc::new(TxPropagator::new(switch.clone(), transport.clone(), events));
        switch.bind_sink(Port::RemoteOut, propagator.clone()).unwrap();
        (switch, propagator, transport)
    }

    #[tokio::test]
    async fn locally_submitted_tx_reaches_remote_out_and_is_broadcast() {
        let (switch, propagator, transport) = wired();
        switch.start().unwrap();
        propagator.start().unwrap();

        switch.submit(Port::LocalIn, SwitchMessage::Transaction(sample_tx())).await.unwrap();
        settle().await;

        assert_eq!(transport.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn remote_tx_is_relayed_to_further_peers() {
        let (switch, propagator, transport) = wired();
        switch.start().unwrap();
        propagator.start().unwrap();

        switch.submit(Port::RemoteIn, SwitchMessage::Transaction(sample_tx())).await.unwrap();
        settle().await;

        assert_eq!(transport.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn inbound_transport_message_is_forwarded_into_remote_in() {
        let (switch, propagator, transport) = wired();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        struct Recorder(Arc<parking_lot::Mutex<Vec<SwitchMessage>>>);
        #[async_trait]
        impl PortSink for Recorder {
            async fn accept(&self, message: SwitchMessage) {
                self.0.lock().push(message);
            }
        }
        switch.bind_sink(Port::LocalOut, Arc::new(Recorder(seen.clone()))).unwrap();
        switch.start().unwrap();
        propagator.start().unwrap();

        transport.inject(SwitchMessage::Transaction(sample_tx()));
        settle().await;

        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn admissions_seen_counts_pool_admission_events() {
        let events = EventBus::new();
        let switch = Arc::new(GossipSwitch::new(crate::switch::SwitchKind::Tx, SwitchConfig::default()));
        let transport = Arc::new(LoopbackTransport::new());
        let propagator = Arc::new(TxPropagator::new(switch, transport, events.clone()));
        propagator.start().unwrap();

        events.notify(Event::AddTxToTxPool { tx: sample_tx() }).unwrap();
        settle().await;

        assert_eq!(propagator.admissions_seen(), 1);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let (_switch, propagator, _transport) = wired();
        propagator.start().unwrap();
        assert_eq!(propagator.start(), Err(TxPropagatorError::AlreadyRunning));
    }
}
