//! Bridges the block switch's `RemoteIn` port and the Event Bus to the P2P
//! transport: a block this node just committed is broadcast outward: a
//! block a peer sends inward is forwarded into the switch, where the
//! signature/structure filter chain decides whether it is admitted.
//!
//! `BlockWritten` is subscribed alongside `BlockCommitted` even though the
//! reference repository never fires it — the two are collapsed onto the
//! same broadcast action, matching how the original node wires one handler
//! to both.

use crate::event_bus::{EventBus, Subscriber};
use crate::model::{Event, EventType, SwitchMessage};
use crate::switch::{GossipSwitch, Port};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockPropagatorError {
    #[error("block propagator has already been started; restart is not permitted")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropagatorState {
    Idle,
    Running,
    Stopped,
}

pub struct BlockPropagator {
    switch: Arc<GossipSwitch>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    state: Mutex<PropagatorState>,
    subscriptions: Mutex<Vec<(EventType, Subscriber)>>,
    quit_tx: watch::Sender<bool>,
    quit_rx: watch::Receiver<bool>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl BlockPropagator {
    pub fn new(switch: Arc<GossipSwitch>, transport: Arc<dyn Transport>, events: EventBus) -> Self {
        let (quit_tx, quit_rx) = watch::channel(false);
        Self {
            switch,
            transport,
            events,
            state: Mutex::new(PropagatorState::Idle),
            subscriptions: Mutex::new(Vec::new()),
            quit_tx,
            quit_rx,
            receive_task: Mutex::new(None),
        }
    }

    /// Subscribes to `BlockCommitted`/`BlockWritten` and launches the
    /// inbound receive loop. A second `start` on an already-running
    /// propagator is a configuration error.
    pub fn start(self: &Arc<Self>) -> Result<(), BlockPropagatorError> {
        {
            let mut state = self.state.lock();
            match *state {
                PropagatorState::Idle => *state = PropagatorState::Running,
                _ => return Err(BlockPropagatorError::AlreadyRunning),
            }
        }

        {
            let mut subs = self.subscriptions.lock();
            for event_type in [EventType::BlockCommitted, EventType::BlockWritten] {
                let transport = self.transport.clone();
                let sub = self.events.subscribe(event_type, move |payload| {
                    let block = match payload {
                        Some(Event::BlockCommitted { block }) | Some(Event::BlockWritten { block }) => block.clone(),
                        _ => return,
                    };
                    let transport = transport.clone();
                    tokio::spawn(async move {
                        transport.broadcast(&SwitchMessage::Block(block)).await;
                    });
                });
                subs.push((event_type, sub));
            }
        }

        let switch = self.switch.clone();
        let transport = self.transport.clone();
        let mut quit = self.quit_rx.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = transport.recv() => {
                        match message {
                            Some(SwitchMessage::Block(block)) => {
                                if switch.submit(Port::RemoteIn, SwitchMessage::Block(block)).await.is_err() {
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
        for (event_type, sub) in self.subscriptions.lock().drain(..) {
            let _ = self.events.unsubscribe(event_type, sub);
        }
        let _ = self.quit_tx.send(true);
        let handle = self.receive_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
