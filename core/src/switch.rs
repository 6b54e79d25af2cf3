//! # Gossip Switch
//!
//! A 2-in / 2-out port router sitting between the propagators (which know
//! what a transaction or a block *means*) and whatever consumes it locally
//! (the mempool, the repository). `LocalIn` carries what the RPC gateway or
//! this node produced; `RemoteIn` carries what a peer relayed. Both inputs
//! run their filter chain and, on success, fan the message out to both
//! `LocalOut` and `RemoteOut`. This is not a network-level gossip protocol —
//! it is the in-node router that decides what a message reaches next.

use crate::model::{MessageKind, SwitchMessage};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    Tx,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    LocalIn,
    RemoteIn,
    LocalOut,
    RemoteOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// A filter either passes a (possibly transformed) message on, or rejects it
/// with a reason the switch logs and counts. Rejection never becomes an
/// error the submitter sees — it is a drop, not a round-level failure.
pub enum FilterResult {
    Pass(SwitchMessage),
    Reject(String),
}

pub type Filter = Arc<dyn Fn(SwitchMessage) -> FilterResult + Send + Sync>;

/// A bound output sink. At most one may be bound per output port.
#[async_trait]
pub trait PortSink: Send + Sync {
    async fn accept(&self, message: SwitchMessage);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwitchError {
    #[error("message kind {kind:?} does not match this switch's shape {switch:?}")]
    WrongShape { kind: MessageKind, switch: SwitchKind },
    #[error("switch is not running")]
    NotRunning,
    #[error("switch has already been started; restart is not permitted")]
    AlreadyRunning,
    #[error("this port is not an input port")]
    NotAnInputPort,
    #[error("this port is not an output port")]
    NotAnOutputPort,
    #[error("output port already has a bound sink")]
    AlreadyBound,
}

#[derive(Debug, Clone, Copy)]
pub struct SwitchConfig {
    /// Whether the LocalIn filter chain must include a signature verifier
    /// for this switch's shape. Installed by the caller that builds the
    /// switch (the Node aggregate), not by the switch itself.
    pub verify_signature: bool,
    pub channel_capacity: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            verify_signature: true,
            channel_capacity: 256,
        }
    }
}

struct InputPort {
    filters: RwLock<Vec<Filter>>,
    tx: mpsc::Sender<SwitchMessage>,
    rx: Mutex<Option<mpsc::Receiver<SwitchMessage>>>,
}

impl InputPort {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            filters: RwLock::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn add_filter(&self, filter: Filter) {
        self.filters.write().push(filter);
    }

    fn filters_snapshot(&self) -> Vec<Filter> {
        self.filters.read().clone()
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<SwitchMessage>> {
        self.rx.lock().take()
    }
}

struct OutputPort {
    sink: RwLock<Option<Arc<dyn PortSink>>>,
}

impl OutputPort {
    fn new() -> Self {
        Self {
            sink: RwLock::new(None),
        }
    }

    fn bind(&self, sink: Arc<dyn PortSink>) -> Result<(), SwitchError> {
        let mut guard = self.sink.write();
        if guard.is_some() {
            return Err(SwitchError::AlreadyBound);
        }
        *guard = Some(sink);
        Ok(())
    }

    async fn deliver(&self, message: SwitchMessage) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.accept(message).await;
        }
    }
}

/// A 2-in/2-out router for one message shape (`SwitchKind::Tx` or
/// `SwitchKind::Block`). `Start` launches one worker per input port; `Stop`
/// signals them to exit. Restart after `Stop` is not permitted.
pub struct GossipSwitch {
    kind: SwitchKind,
    local_in: InputPort,
    remote_in: InputPort,
    local_out: OutputPort,
    remote_out: OutputPort,
    state: Mutex<SwitchState>,
    quit_tx: watch::Sender<bool>,
    quit_rx: watch::Receiver<bool>,
    forwarded_total: AtomicU64,
    dropped_total: AtomicU64,
}

impl GossipSwitch {
    pub fn new(kind: SwitchKind, config: SwitchConfig) -> Self {
        let (quit_tx, quit_rx) = watch::channel(false);
        Self {
            kind,
            local_in: InputPort::new(config.channel_capacity),
            remote_in: InputPort::new(config.channel_capacity),
            local_out: OutputPort::new(),
            remote_out: OutputPort::new(),
            state: Mutex::new(SwitchState::Idle),
            quit_tx,
            quit_rx,
            forwarded_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> SwitchKind {
        self.kind
    }

    pub fn state(&self) -> SwitchState {
        *self.state.lock()
    }

    /// Installs `filter` at the end of `port`'s chain. Must be called before
    /// `Start`; filter chains are wired once and never mutated afterwards.
    pub fn add_filter(&self, port: Port, filter: Filter) -> Result<(), SwitchError> {
        match port {
            Port::LocalIn => self.local_in.add_filter(filter),
            Port::RemoteIn => self.remote_in.add_filter(filter),
            Port::LocalOut | Port::RemoteOut => return Err(SwitchError::NotAnInputPort),
        }
        Ok(())
    }

    /// Binds `sink` as `port`'s sole output sink. A second bind on the same
    /// port is a configuration error.
    pub fn bind_sink(&self, port: Port, sink: Arc<dyn PortSink>) -> Result<(), SwitchError> {
        match port {
            Port::LocalOut => self.local_out.bind(sink),
            Port::RemoteOut => self.remote_out.bind(sink),
            Port::LocalIn | Port::RemoteIn => Err(SwitchError::NotAnOutputPort),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), SwitchError> {
        {
            let mut state = self.state.lock();
            match *state {
                SwitchState::Idle => *state = SwitchState::Running,
                _ => return Err(SwitchError::AlreadyRunning),
            }
        }
        for (input, port) in [(&self.local_in, Port::LocalIn), (&self.remote_in, Port::RemoteIn)] {
            let rx = input
                .take_receiver()
                .expect("each input port's receiver is taken exactly once, at start");
            let filters = input.filters_snapshot();
            let switch = self.clone();
            let quit = self.quit_rx.clone();
            tokio::spawn(async move { switch.run_worker(port, rx, filters, quit).await });
        }
        Ok(())
    }

    /// Signals both input workers to exit. Does not block for them to
    /// finish draining; outputs are drained best-effort.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                SwitchState::Running => *state = SwitchState::Stopping,
                _ => return,
            }
        }
        let _ = self.quit_tx.send(true);
        *self.state.lock() = SwitchState::Stopped;
    }

    /// Submits `message` to `port`. Backpressures (blocks) if the port's
    /// channel is full; the switch never drops a message it has accepted
    /// here — drops only happen inside the filter chain.
    pub async fn submit(&self, port: Port, message: SwitchMessage) -> Result<(), SwitchError> {
        if message.kind() != self.expected_kind() {
            return Err(SwitchError::WrongShape {
                kind: message.kind(),
                switch: self.kind,
            });
        }
        if !matches!(self.state(), SwitchState::Running) {
            return Err(SwitchError::NotRunning);
        }
        let input = match port {
            Port::LocalIn => &self.local_in,
            Port::RemoteIn => &self.remote_in,
            Port::LocalOut | Port::RemoteOut => return Err(SwitchError::NotAnInputPort),
        };
        input.tx.send(message).await.map_err(|_| SwitchError::NotRunning)
    }

    pub fn forwarded_total(&self) -> u64 {
        self.forwarded_total.load(Ordering::Relaxed)
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    fn expected_kind(&self) -> MessageKind {
        match self.kind {
            SwitchKind::Tx => MessageKind::Transaction,
            SwitchKind::Block => MessageKind::Block,
        }
    }

    async fn run_worker(
        self: Arc<Self>,
        port: Port,
        mut rx: mpsc::Receiver<SwitchMessage>,
        filters: Vec<Filter>,
        mut quit: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(message) => {
                            tracing::trace!(?port, "switch worker received message");
                            self.run_filter_chain(message, &filters).await
                        }
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
    }

    async fn run_filter_chain(&self, message: SwitchMessage, filters: &[Filter]) {
        let mut current = message;
        for filter in filters {
            match filter(current) {
                FilterResult::Pass(next) => current = next,
                FilterResult::Reject(reason) => {
                    self.dropped_total.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(reason = %reason, "gossip switch dropped a message");
                    return;
                }
            }
        }
        self.forwarded_total.fetch_add(1, Ordering::Relaxed);
        self.local_out.deliver(current.clone()).await;
        self.remote_out.deliver(current).await;
    }
}
